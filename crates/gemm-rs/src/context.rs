use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::catalog::SolutionLibrary;
use crate::device::{DeviceProperties, Hardware, KernelLauncher};

/// Everything dispatch needs for one physical device.
///
/// Built once by [`crate::registry::HostRegistry`] and immutable afterward. The
/// catalog is shared with every other device of the same architecture.
pub struct DeviceContext {
    properties: DeviceProperties,
    hardware: Hardware,
    catalog: Arc<dyn SolutionLibrary>,
    launcher: Box<dyn KernelLauncher>,
    library_dir: PathBuf,
}

impl DeviceContext {
    pub fn new(
        properties: DeviceProperties,
        catalog: Arc<dyn SolutionLibrary>,
        launcher: Box<dyn KernelLauncher>,
        library_dir: impl Into<PathBuf>,
    ) -> Self {
        let hardware = properties.hardware();
        Self {
            properties,
            hardware,
            catalog,
            launcher,
            library_dir: library_dir.into(),
        }
    }

    pub fn device_id(&self) -> usize {
        self.properties.device_id
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn catalog(&self) -> &Arc<dyn SolutionLibrary> {
        &self.catalog
    }

    pub fn launcher(&self) -> &dyn KernelLauncher {
        self.launcher.as_ref()
    }

    /// Directory the catalog and kernel binaries were read from.
    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.properties.device_id)
            .field("arch", &self.properties.arch)
            .field("catalog", &self.catalog.architecture())
            .field("code_objects", &self.launcher.loaded_code_objects())
            .finish()
    }
}
