//! On-disk catalogs and kernel binaries for tests.
//!
//! ```no_run
//! use gemm_rs::problem::{DataType, Operation, TypeSignature};
//! use gemm_rs_backend_ref::fixtures::CatalogBuilder;
//!
//! let dir = gemm_rs_backend_ref::fixtures::temp_library()?;
//! CatalogBuilder::new("gfx90a")
//!     .general(TypeSignature::uniform(DataType::Float), Operation::None, Operation::None, 4)
//!     .write_lazy(dir.path())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gemm_rs::catalog::format::{
    CatalogFile, LaunchGeometry, OverrideFile, PerformancePoint, Predicates, SolutionRecord,
    WorkspaceModel,
};
use gemm_rs::config::{CatalogEncoding, FatalPolicy, HostConfig, DEFAULT_CATALOG_NAME};
use gemm_rs::problem::{Operation, TypeSignature};
use tempfile::TempDir;

/// Fresh temporary directory to hold one catalog tree.
pub fn temp_library() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("gemm-rs-library-")
        .tempdir()
        .context("create temporary library directory")
}

/// Config that reads catalogs from `dir` and reports fatal errors instead of
/// aborting.
pub fn config_for(dir: &Path) -> HostConfig {
    HostConfig::default()
        .with_library_path(dir)
        .with_fatal_policy(FatalPolicy::Report)
}

/// Name of the code object holding kernels of one signature and transpose pair.
pub fn code_object_name(arch: &str, types: TypeSignature, trans_a: Operation, trans_b: Operation) -> String {
    format!(
        "Kernels_{}_{}{}_{arch}",
        types.tag(),
        trans_a.as_char(),
        trans_b.as_char()
    )
}

/// Solution without size restrictions: 64x64 macro tile, no workspace and one
/// benchmark point at 1024^3 running at `gflops`.
pub fn general_solution(
    index: i32,
    arch: &str,
    types: TypeSignature,
    trans_a: Operation,
    trans_b: Operation,
    gflops: f64,
) -> SolutionRecord {
    let name = format!(
        "Cijk_{}{}_{}_MT64x64_SN{index}",
        trans_a.as_char(),
        trans_b.as_char(),
        types.tag()
    );
    SolutionRecord {
        index,
        kernel: name.clone(),
        name,
        code_object: code_object_name(arch, types, trans_a, trans_b),
        types,
        trans_a,
        trans_b,
        predicates: Predicates::default(),
        workspace: WorkspaceModel::default(),
        launch: LaunchGeometry {
            macro_tile: [64, 64],
            workgroup: [256, 1, 1],
            lds_bytes: 16 * 1024,
        },
        performance: vec![PerformancePoint {
            m: 1024,
            n: 1024,
            k: 1024,
            batch: 1,
            device_gflops: gflops,
            cu_gflops: None,
        }],
    }
}

/// Collects solution records and writes them in the eager or lazy layout.
#[derive(Debug, Clone)]
pub struct CatalogBuilder {
    arch: String,
    encoding: CatalogEncoding,
    solutions: Vec<SolutionRecord>,
}

impl CatalogBuilder {
    pub fn new(arch: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            encoding: CatalogEncoding::default(),
            solutions: Vec::new(),
        }
    }

    pub fn with_encoding(mut self, encoding: CatalogEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn push(mut self, record: SolutionRecord) -> Self {
        self.solutions.push(record);
        self
    }

    /// Appends `count` unrestricted solutions with consecutive indices. Later
    /// solutions are predicted to run slightly faster.
    pub fn general(
        mut self,
        types: TypeSignature,
        trans_a: Operation,
        trans_b: Operation,
        count: usize,
    ) -> Self {
        let start = self.next_index();
        for offset in 0..count {
            let index = start + offset as i32;
            self.solutions.push(general_solution(
                index,
                &self.arch,
                types,
                trans_a,
                trans_b,
                1_000.0 + f64::from(index),
            ));
        }
        self
    }

    pub fn solutions(&self) -> &[SolutionRecord] {
        &self.solutions
    }

    pub fn next_index(&self) -> i32 {
        self.solutions
            .iter()
            .map(|record| record.index + 1)
            .max()
            .unwrap_or(0)
    }

    fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.encoding.extension())
    }

    /// Writes `GemmLibrary_<arch>` with every solution listed, plus kernel
    /// binaries.
    pub fn write_eager(&self, dir: &Path) -> Result<PathBuf> {
        let mut file = CatalogFile::new(self.arch.clone());
        file.solutions = self.solutions.clone();
        let path = dir.join(self.file_name(&format!("{DEFAULT_CATALOG_NAME}_{}", self.arch)));
        file.save(&path)
            .with_context(|| format!("write eager catalog {}", path.display()))?;
        self.write_code_objects(dir)?;
        Ok(path)
    }

    /// Writes the lazy manifest `GemmLibrary_lazy_<arch>`, one group file per
    /// signature and transpose pair, plus kernel binaries.
    pub fn write_lazy(&self, dir: &Path) -> Result<PathBuf> {
        let mut eager = CatalogFile::new(self.arch.clone());
        eager.solutions = self.solutions.clone();
        let (manifest, groups) = eager.split_into_groups(DEFAULT_CATALOG_NAME);
        for (stem, group) in &groups {
            let path = dir.join(self.file_name(stem));
            group
                .save(&path)
                .with_context(|| format!("write solution group {}", path.display()))?;
        }
        let path = dir.join(self.file_name(&format!(
            "{DEFAULT_CATALOG_NAME}_lazy_{}",
            self.arch
        )));
        manifest
            .save(&path)
            .with_context(|| format!("write lazy manifest {}", path.display()))?;
        self.write_code_objects(dir)?;
        Ok(path)
    }

    /// Writes one placeholder binary per distinct code object name.
    pub fn write_code_objects(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let names: BTreeSet<&str> = self
            .solutions
            .iter()
            .map(|record| record.code_object.as_str())
            .collect();
        let mut written = Vec::with_capacity(names.len());
        for name in names {
            let path = dir.join(format!("{name}.co"));
            fs::write(&path, name.as_bytes())
                .with_context(|| format!("write code object {}", path.display()))?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Writes an override file as JSON.
pub fn write_overrides(path: &Path, overrides: &OverrideFile) -> Result<()> {
    let text = serde_json::to_string_pretty(overrides).context("encode overrides")?;
    fs::write(path, text).with_context(|| format!("write overrides {}", path.display()))
}
