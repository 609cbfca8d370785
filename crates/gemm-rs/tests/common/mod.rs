#![allow(dead_code)]

use std::sync::Arc;

use gemm_rs::config::HostConfig;
use gemm_rs::device::Platform;
use gemm_rs::problem::{ContractionArgs, DataType, DevicePtr, Operation, TypeSignature};
use gemm_rs::{DispatchEngine, HostRegistry};
use gemm_rs_backend_ref::fixtures::{config_for, temp_library, CatalogBuilder};
use gemm_rs_backend_ref::SimulatedPlatform;
use tempfile::TempDir;

pub const ARCH: &str = "gfx90a";

pub fn float() -> TypeSignature {
    TypeSignature::uniform(DataType::Float)
}

/// Catalog with `count` unrestricted NN float solutions; the last is fastest.
pub fn float_catalog(count: usize) -> CatalogBuilder {
    CatalogBuilder::new(ARCH).general(float(), Operation::None, Operation::None, count)
}

/// In-place float GEMM with non-null operands.
pub fn sgemm(m: usize, n: usize, k: usize) -> ContractionArgs {
    ContractionArgs::gemm(float(), Operation::None, Operation::None, m, n, k)
        .expect("float gemm")
        .with_pointers(
            DevicePtr(0x1000),
            DevicePtr(0x2000),
            DevicePtr(0x3000),
            DevicePtr(0x3000),
        )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Eager,
    Lazy,
    /// Nothing written; every catalog lookup fails.
    Empty,
}

pub struct Harness {
    pub dir: TempDir,
    pub platform: Arc<SimulatedPlatform>,
    pub registry: Arc<HostRegistry>,
    pub engine: DispatchEngine,
}

impl Harness {
    pub fn new(catalog: &CatalogBuilder, layout: Layout, platform: SimulatedPlatform) -> Self {
        Self::with_config(catalog, layout, platform, |config| config)
    }

    pub fn with_config(
        catalog: &CatalogBuilder,
        layout: Layout,
        platform: SimulatedPlatform,
        configure: impl FnOnce(HostConfig) -> HostConfig,
    ) -> Self {
        let dir = temp_library().expect("library dir");
        match layout {
            Layout::Eager => {
                catalog.write_eager(dir.path()).expect("write eager catalog");
            }
            Layout::Lazy => {
                catalog.write_lazy(dir.path()).expect("write lazy catalog");
            }
            Layout::Empty => {}
        }
        let platform = Arc::new(platform);
        let config = configure(config_for(dir.path()));
        let registry = Arc::new(HostRegistry::new(
            Arc::clone(&platform) as Arc<dyn Platform>,
            config,
        ));
        let engine = DispatchEngine::new(Arc::clone(&registry));
        Self {
            dir,
            platform,
            registry,
            engine,
        }
    }

    pub fn launches(&self) -> usize {
        self.platform.log().launch_count()
    }
}
