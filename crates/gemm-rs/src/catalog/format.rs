//! Persisted catalog layout.
//!
//! A catalog file lists solutions directly (eager layout) or points at group
//! files through placeholders (lazy layout). Both encodings carry the same
//! structs: JSON for inspection and bincode for installed catalogs.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::CatalogEncoding;
use crate::error::CatalogError;
use crate::problem::{ArithmeticUnit, Operation, ScalarClass, TypeSignature};

pub const CATALOG_FORMAT_VERSION: u32 = 1;

/// Inclusive size interval; `max == None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: usize,
    pub max: Option<usize>,
}

impl SizeRange {
    pub const ANY: SizeRange = SizeRange { min: 0, max: None };

    pub fn contains(&self, value: usize) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }
}

/// Conditions a problem and device must meet for a solution to apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicates {
    #[serde(default)]
    pub m: SizeRange,
    #[serde(default)]
    pub n: SizeRange,
    #[serde(default)]
    pub k: SizeRange,
    #[serde(default)]
    pub batch: SizeRange,
    /// Required divisor of M; zero and one mean none.
    #[serde(default)]
    pub m_multiple: usize,
    #[serde(default)]
    pub n_multiple: usize,
    #[serde(default)]
    pub k_multiple: usize,
    /// The kernel reduces in a fixed order (no atomics).
    #[serde(default)]
    pub deterministic: bool,
    #[serde(default)]
    pub strided_batched: Option<bool>,
    #[serde(default)]
    pub c_equals_d: Option<bool>,
    #[serde(default)]
    pub alpha: ScalarClass,
    #[serde(default)]
    pub beta: ScalarClass,
    #[serde(default)]
    pub high_precision_accumulate: Option<bool>,
    #[serde(default)]
    pub arithmetic_unit: ArithmeticUnit,
    #[serde(default)]
    pub fp16_alt_impl: Option<bool>,
    #[serde(default)]
    pub fp16_alt_impl_round: Option<bool>,
    /// Architecture the kernel was tuned for; `None` runs anywhere.
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub min_compute_units: u32,
}

/// Scratch memory a solution needs, as a function of the problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceModel {
    /// Global split-U factor; above one, partial tiles go through workspace.
    #[serde(default)]
    pub global_split_u: u32,
    #[serde(default)]
    pub fixed_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchGeometry {
    /// Output tile computed by one workgroup, `[m, n]`.
    pub macro_tile: [u32; 2],
    pub workgroup: [u32; 3],
    #[serde(default)]
    pub lds_bytes: u32,
}

/// Benchmarked throughput of a solution at one problem size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformancePoint {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    #[serde(default = "one")]
    pub batch: usize,
    pub device_gflops: f64,
    #[serde(default)]
    pub cu_gflops: Option<f64>,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    /// Stable 0-based index; exposed to callers as `index + 1`.
    pub index: i32,
    pub name: String,
    pub kernel: String,
    pub code_object: String,
    pub types: TypeSignature,
    pub trans_a: Operation,
    pub trans_b: Operation,
    #[serde(default)]
    pub predicates: Predicates,
    #[serde(default)]
    pub workspace: WorkspaceModel,
    pub launch: LaunchGeometry,
    #[serde(default)]
    pub performance: Vec<PerformancePoint>,
}

/// Lazy-layout stand-in for every solution of one problem type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRecord {
    pub types: TypeSignature,
    pub trans_a: Operation,
    pub trans_b: Operation,
    /// File stem of the group file, resolved next to the manifest.
    pub group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub version: u32,
    pub architecture: String,
    #[serde(default)]
    pub solutions: Vec<SolutionRecord>,
    #[serde(default)]
    pub placeholders: Vec<PlaceholderRecord>,
}

impl CatalogFile {
    pub fn new(architecture: impl Into<String>) -> Self {
        Self {
            version: CATALOG_FORMAT_VERSION,
            architecture: architecture.into(),
            solutions: Vec::new(),
            placeholders: Vec::new(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        !self.placeholders.is_empty()
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let encoding = encoding_of(path)?;
        let bytes = fs::read(path).map_err(|err| CatalogError::io(path, err))?;
        let file: CatalogFile = decode(path, encoding, &bytes)?;
        file.validate(path)?;
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<(), CatalogError> {
        let bytes = encode(path, encoding_of(path)?, self)?;
        fs::write(path, bytes).map_err(|err| CatalogError::io(path, err))
    }

    /// Splits the listed solutions into a lazy manifest and one group file per
    /// type signature and transpose pair.
    ///
    /// Group stems are `<name>_<arch>_<types>_<TA><TB>`. Placeholders already in
    /// `self` are carried over to the manifest.
    pub fn split_into_groups(&self, name: &str) -> (CatalogFile, Vec<(String, CatalogFile)>) {
        let mut grouped: BTreeMap<(TypeSignature, Operation, Operation), Vec<SolutionRecord>> =
            BTreeMap::new();
        for record in &self.solutions {
            grouped
                .entry((record.types, record.trans_a, record.trans_b))
                .or_default()
                .push(record.clone());
        }

        let mut manifest = CatalogFile::new(self.architecture.clone());
        manifest.placeholders = self.placeholders.clone();
        let mut groups = Vec::with_capacity(grouped.len());
        for ((types, trans_a, trans_b), solutions) in grouped {
            let stem = format!(
                "{name}_{}_{}_{}{}",
                self.architecture,
                types.tag(),
                trans_a.as_char(),
                trans_b.as_char()
            );
            manifest.placeholders.push(PlaceholderRecord {
                types,
                trans_a,
                trans_b,
                group: stem.clone(),
            });
            let mut group = CatalogFile::new(self.architecture.clone());
            group.solutions = solutions;
            groups.push((stem, group));
        }
        (manifest, groups)
    }

    fn validate(&self, path: &Path) -> Result<(), CatalogError> {
        if self.version != CATALOG_FORMAT_VERSION {
            return Err(CatalogError::Version {
                path: path.to_path_buf(),
                found: self.version,
                expected: CATALOG_FORMAT_VERSION,
            });
        }
        let mut seen = HashSet::with_capacity(self.solutions.len());
        for record in &self.solutions {
            if record.index < 0 {
                return Err(CatalogError::NegativeIndex {
                    path: path.to_path_buf(),
                    index: record.index,
                });
            }
            if !seen.insert(record.index) {
                return Err(CatalogError::DuplicateIndex {
                    path: path.to_path_buf(),
                    index: record.index,
                });
            }
        }
        Ok(())
    }
}

/// One entry of a problem override file: problems of this exact shape use the
/// given 1-based solution index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub types: TypeSignature,
    pub trans_a: Operation,
    pub trans_b: Operation,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    #[serde(default = "one")]
    pub batch: usize,
    pub solution: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideFile {
    #[serde(default)]
    pub overrides: Vec<OverrideRecord>,
}

impl OverrideFile {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|err| CatalogError::io(path, err))?;
        serde_json::from_str(&text).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Path of a sibling file with the same encoding as `manifest`.
pub fn sibling_path(manifest: &Path, stem: &str) -> PathBuf {
    let dir = manifest.parent().unwrap_or_else(|| Path::new("."));
    match manifest.extension() {
        Some(ext) => dir.join(stem).with_extension(ext),
        None => dir.join(stem),
    }
}

fn encoding_of(path: &Path) -> Result<CatalogEncoding, CatalogError> {
    CatalogEncoding::from_path(path).ok_or_else(|| CatalogError::Encoding {
        path: path.to_path_buf(),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(
    path: &Path,
    encoding: CatalogEncoding,
    bytes: &[u8],
) -> Result<T, CatalogError> {
    match encoding {
        CatalogEncoding::Json => serde_json::from_slice(bytes).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        }),
        CatalogEncoding::Binary => bincode::deserialize(bytes).map_err(|source| {
            CatalogError::Bincode {
                path: path.to_path_buf(),
                source,
            }
        }),
    }
}

fn encode<T: Serialize>(path: &Path, encoding: CatalogEncoding, value: &T) -> Result<Vec<u8>, CatalogError> {
    match encoding {
        CatalogEncoding::Json => serde_json::to_vec_pretty(value).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        }),
        CatalogEncoding::Binary => bincode::serialize(value).map_err(|source| CatalogError::Bincode {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::DataType;

    fn record(index: i32) -> SolutionRecord {
        SolutionRecord {
            index,
            name: format!("Cijk_Ailk_Bljk_S_MT64x64_{index}"),
            kernel: format!("Cijk_Ailk_Bljk_S_MT64x64_{index}"),
            code_object: "GemmKernels_gfx90a".into(),
            types: TypeSignature::uniform(DataType::Float),
            trans_a: Operation::None,
            trans_b: Operation::None,
            predicates: Predicates::default(),
            workspace: WorkspaceModel::default(),
            launch: LaunchGeometry {
                macro_tile: [64, 64],
                workgroup: [256, 1, 1],
                lds_bytes: 0,
            },
            performance: vec![PerformancePoint {
                m: 1024,
                n: 1024,
                k: 1024,
                batch: 1,
                device_gflops: 10_000.0,
                cu_gflops: None,
            }],
        }
    }

    #[test]
    fn json_records_fill_optional_fields_with_defaults() {
        let text = r#"{
            "version": 1,
            "architecture": "gfx90a",
            "solutions": [{
                "index": 0,
                "name": "s0",
                "kernel": "s0",
                "code_object": "co",
                "types": { "input": "s", "output": "s", "compute": "s" },
                "trans_a": "N",
                "trans_b": "T",
                "launch": { "macro_tile": [64, 64], "workgroup": [256, 1, 1] }
            }]
        }"#;
        let file: CatalogFile = serde_json::from_str(text).expect("parse catalog");
        let solution = &file.solutions[0];
        assert_eq!(solution.trans_b, Operation::Transpose);
        assert_eq!(solution.predicates.alpha, ScalarClass::Any);
        assert_eq!(solution.predicates.m, SizeRange::ANY);
        assert!(solution.performance.is_empty());
        assert!(!file.is_lazy());
    }

    #[test]
    fn binary_catalog_survives_save_and_load() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("GemmLibrary_gfx90a.dat");
        let mut file = CatalogFile::new("gfx90a");
        file.solutions = vec![record(0), record(1)];
        file.save(&path).expect("save catalog");
        let loaded = CatalogFile::load(&path).expect("load catalog");
        assert_eq!(loaded, file);
    }

    #[test]
    fn duplicate_indices_are_rejected() {
        let mut file = CatalogFile::new("gfx90a");
        file.solutions = vec![record(3), record(3)];
        let err = file
            .validate(Path::new("GemmLibrary.json"))
            .expect_err("duplicate index");
        assert!(matches!(err, CatalogError::DuplicateIndex { index: 3, .. }));
    }

    #[test]
    fn split_groups_by_types_and_transposes() {
        let mut file = CatalogFile::new("gfx90a");
        let mut transposed = record(2);
        transposed.trans_b = Operation::Transpose;
        file.solutions = vec![record(0), transposed, record(1)];

        let (manifest, groups) = file.split_into_groups("GemmLibrary");
        assert!(manifest.is_lazy());
        assert!(manifest.solutions.is_empty());
        let stems: Vec<_> = groups.iter().map(|(stem, _)| stem.as_str()).collect();
        assert_eq!(stems, vec!["GemmLibrary_gfx90a_sss_NN", "GemmLibrary_gfx90a_sss_NT"]);
        assert_eq!(groups[0].1.solutions.len(), 2);
        assert_eq!(manifest.placeholders[1].trans_b, Operation::Transpose);
    }

    #[test]
    fn sibling_paths_keep_the_manifest_extension() {
        assert_eq!(
            sibling_path(Path::new("/lib/GemmLibrary_lazy_gfx90a.dat"), "GemmLibrary_gfx90a_sss_NN"),
            PathBuf::from("/lib/GemmLibrary_gfx90a_sss_NN.dat")
        );
    }
}
