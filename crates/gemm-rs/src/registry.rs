//! Process-wide map from device id to [`DeviceContext`].
//!
//! Each device slot is initialized at most once. Readers first look at the
//! published context (acquire); on a miss they take the slot's gate, look again,
//! and only then run the slow load and publish the result (release). Devices do
//! not share gates, so a slow or failing device never blocks another.
//!
//! Catalogs are cached per architecture and xnack mode and shared by every
//! device of that kind.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;

use crate::catalog::locate::{self, CatalogLocation};
use crate::catalog::{SolutionCatalog, SolutionLibrary};
use crate::config::{FatalPolicy, HostConfig};
use crate::context::DeviceContext;
use crate::device::{DeviceProperties, KernelLauncher, Platform, XnackMode};
use crate::diagnostics::Diagnostics;
use crate::error::InitError;

type CatalogCell = OnceLock<Result<Arc<SolutionCatalog>, InitError>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatalogKey {
    arch: String,
    xnack: XnackMode,
}

#[derive(Default)]
struct DeviceSlot {
    context: OnceLock<Result<Arc<DeviceContext>, InitError>>,
    gate: Mutex<()>,
}

#[derive(Debug, Default)]
struct LoadCounters {
    catalog_loads: AtomicUsize,
    code_objects: AtomicUsize,
    devices: AtomicUsize,
}

/// Snapshot of the registry's load counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub catalog_loads: usize,
    pub code_objects_registered: usize,
    pub devices_initialized: usize,
}

pub struct HostRegistry {
    config: HostConfig,
    platform: Arc<dyn Platform>,
    diagnostics: Diagnostics,
    slots: OnceLock<Result<Box<[DeviceSlot]>, InitError>>,
    catalogs: Mutex<HashMap<CatalogKey, Arc<CatalogCell>>>,
    eager_requested: AtomicBool,
    warned_no_code_objects: AtomicBool,
    counters: LoadCounters,
}

impl HostRegistry {
    pub fn new(platform: Arc<dyn Platform>, config: HostConfig) -> Self {
        let diagnostics = Diagnostics::new(&config);
        Self {
            config,
            platform,
            diagnostics,
            slots: OnceLock::new(),
            catalogs: Mutex::new(HashMap::new()),
            eager_requested: AtomicBool::new(false),
            warned_no_code_objects: AtomicBool::new(false),
            counters: LoadCounters::default(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn stats(&self) -> LoadStats {
        LoadStats {
            catalog_loads: self.counters.catalog_loads.load(Ordering::Acquire),
            code_objects_registered: self.counters.code_objects.load(Ordering::Acquire),
            devices_initialized: self.counters.devices.load(Ordering::Acquire),
        }
    }

    /// Whether at least one device finished initialization.
    pub fn is_initialized(&self) -> bool {
        self.counters.devices.load(Ordering::Acquire) > 0
    }

    /// Number of device slots, querying the platform on first use.
    pub fn device_count(&self) -> Result<usize, InitError> {
        self.slots().map(<[DeviceSlot]>::len)
    }

    /// Context for `device`, loading it on first use.
    ///
    /// Concurrent first callers block until one of them finishes the load, then
    /// all observe the same context. A failed initialization is cached and
    /// returned to every later caller.
    pub fn resolve(&self, device: usize) -> Result<Arc<DeviceContext>, InitError> {
        let slots = self.slots()?;
        let slot = slots.get(device).ok_or(InitError::DeviceOutOfRange {
            device,
            count: slots.len(),
        })?;

        if let Some(published) = slot.context.get() {
            return published.clone();
        }
        let _gate = slot.gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(published) = slot.context.get() {
            return published.clone();
        }
        let result = self.initialize_device(device);
        slot.context.get_or_init(|| result).clone()
    }

    /// Loads `device` now, registering every kernel binary up front.
    ///
    /// Idempotent. Only affects catalogs that have not been loaded yet.
    pub fn warm_up(&self, device: usize) -> Result<Arc<DeviceContext>, InitError> {
        self.eager_requested.store(true, Ordering::Release);
        self.resolve(device)
    }

    fn slots(&self) -> Result<&[DeviceSlot], InitError> {
        let slots = self.slots.get_or_init(|| {
            let count = self
                .platform
                .device_count()
                .map_err(|err| self.fail(InitError::DeviceQuery(err.to_string())))?;
            tracing::debug!(platform = self.platform.name(), count, "enumerated devices");
            Ok((0..count).map(|_| DeviceSlot::default()).collect())
        });
        match slots {
            Ok(slots) => Ok(slots),
            Err(err) => Err(err.clone()),
        }
    }

    fn initialize_device(&self, device: usize) -> Result<Arc<DeviceContext>, InitError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load_device(device)));
        let result = outcome.unwrap_or_else(|payload| {
            Err(InitError::Panicked {
                device,
                message: panic_message(payload.as_ref()),
            })
        });
        match result {
            Ok(context) => {
                self.counters.devices.fetch_add(1, Ordering::AcqRel);
                Ok(context)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn load_device(&self, device: usize) -> Result<Arc<DeviceContext>, InitError> {
        let properties = self
            .platform
            .device_properties(device)
            .map_err(|err| InitError::DeviceQuery(format!("device {device}: {err}")))?;
        let location = locate::locate_catalog(&self.config, &properties.arch).map_err(|err| {
            InitError::Catalog {
                arch: properties.arch.clone(),
                message: err.to_string(),
            }
        })?;
        let eager = !location.lazy
            || self.config.eager_kernel_load
            || self.eager_requested.load(Ordering::Acquire);
        let mut launcher = self
            .platform
            .new_launcher(device)
            .map_err(|err| InitError::Launcher {
                device,
                message: err.to_string(),
            })?;

        let cell = self.catalog_cell(&properties);
        let (catalog, registered) = if self.config.background_load && cell.get().is_none() {
            thread::scope(|scope| {
                let loader = thread::Builder::new()
                    .name(format!("gemm-rs-catalog-{}", properties.arch))
                    .spawn_scoped(scope, || {
                        self.catalog_for(&cell, &properties.arch, &location, eager)
                    });
                let registered =
                    self.register_kernels(launcher.as_mut(), &properties, &location, eager);
                let catalog = match loader {
                    Ok(handle) => handle.join().unwrap_or_else(|payload| {
                        Err(InitError::Panicked {
                            device,
                            message: panic_message(payload.as_ref()),
                        })
                    }),
                    Err(err) => {
                        tracing::debug!(error = %err, "catalog loader thread unavailable; loading inline");
                        self.catalog_for(&cell, &properties.arch, &location, eager)
                    }
                };
                (catalog, registered)
            })
        } else {
            let catalog = self.catalog_for(&cell, &properties.arch, &location, eager);
            let registered = self.register_kernels(launcher.as_mut(), &properties, &location, eager);
            (catalog, registered)
        };
        let catalog = catalog?;
        registered?;

        tracing::info!(
            device,
            arch = %properties.arch,
            catalog = %location.file.display(),
            lazy = !eager,
            code_objects = launcher.loaded_code_objects(),
            "device initialized"
        );
        Ok(Arc::new(DeviceContext::new(
            properties,
            catalog as Arc<dyn SolutionLibrary>,
            launcher,
            location.directory,
        )))
    }

    fn catalog_cell(&self, properties: &DeviceProperties) -> Arc<CatalogCell> {
        let key = CatalogKey {
            arch: properties.arch.clone(),
            xnack: properties.xnack,
        };
        let mut catalogs = self.catalogs.lock().expect("catalog cell map poisoned");
        Arc::clone(catalogs.entry(key).or_default())
    }

    fn catalog_for(
        &self,
        cell: &CatalogCell,
        arch: &str,
        location: &CatalogLocation,
        preload: bool,
    ) -> Result<Arc<SolutionCatalog>, InitError> {
        cell.get_or_init(|| self.load_catalog(arch, location, preload))
            .clone()
    }

    fn load_catalog(
        &self,
        arch: &str,
        location: &CatalogLocation,
        preload: bool,
    ) -> Result<Arc<SolutionCatalog>, InitError> {
        let catalog = SolutionCatalog::load(&location.file, self.config.solution_cache_capacity)
            .map_err(|err| InitError::Catalog {
                arch: arch.to_string(),
                message: err.to_string(),
            })?;
        self.counters.catalog_loads.fetch_add(1, Ordering::AcqRel);
        if preload {
            let solutions = catalog.preload_all();
            tracing::debug!(arch, solutions, "preloaded catalog");
        }
        if let Some(path) = &self.config.override_path {
            apply_overrides(&catalog, path);
        }
        Ok(Arc::new(catalog))
    }

    fn register_kernels(
        &self,
        launcher: &mut dyn KernelLauncher,
        properties: &DeviceProperties,
        location: &CatalogLocation,
        eager: bool,
    ) -> Result<(), InitError> {
        let device = properties.device_id;
        let launcher_error = |err: crate::error::DeviceError| InitError::Launcher {
            device,
            message: err.to_string(),
        };
        if !eager {
            return launcher
                .initialize_lazy_loading(&properties.arch, properties.xnack, &location.directory)
                .map_err(launcher_error);
        }

        match locate::discover_code_objects(&location.directory, &properties.arch, properties.xnack)
        {
            Ok(files) if files.is_empty() => {
                if !self.warned_no_code_objects.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        dir = %location.directory.display(),
                        arch = %properties.arch,
                        "no kernel binaries matched; make sure {} is set correctly",
                        crate::config::ENV_LIBPATH
                    );
                }
            }
            Ok(files) => {
                for file in files {
                    launcher.load_code_object_file(&file).map_err(launcher_error)?;
                    self.counters.code_objects.fetch_add(1, Ordering::AcqRel);
                }
            }
            Err(err) => {
                if !self.warned_no_code_objects.swap(true, Ordering::AcqRel) {
                    tracing::warn!(
                        dir = %location.directory.display(),
                        error = %err,
                        "could not scan for kernel binaries"
                    );
                }
            }
        }
        Ok(())
    }

    /// Logs an initialization failure; fatal ones abort unless the policy says
    /// to report them.
    fn fail(&self, err: InitError) -> InitError {
        if is_fatal(&err) {
            tracing::error!(error = %err, "fatal initialization failure");
            if self.config.fatal_policy == FatalPolicy::Abort {
                std::process::abort();
            }
        } else {
            tracing::error!(error = %err, "device initialization failed");
        }
        err
    }
}

fn is_fatal(err: &InitError) -> bool {
    matches!(err, InitError::DeviceQuery(_) | InitError::Catalog { .. })
}

fn apply_overrides(catalog: &SolutionCatalog, path: &Path) {
    match catalog.set_overrides_from_file(path) {
        Ok(summary) if summary.rejected == 0 => {
            tracing::debug!(path = %path.display(), applied = summary.applied, "applied problem overrides");
        }
        Ok(summary) => {
            tracing::warn!(
                path = %path.display(),
                rejected = summary.rejected,
                "one or more problem overrides failed to load"
            );
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "one or more problem overrides failed to load");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
