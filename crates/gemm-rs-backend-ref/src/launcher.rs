use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gemm_rs::device::{
    code_object_file_names, code_object_name, KernelInvocation, KernelLauncher, StreamHandle,
    TimingEvents, XnackMode,
};
use gemm_rs::error::{DeviceError, DeviceResult};

/// One recorded `launch_kernels` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRecord {
    pub device: usize,
    pub stream: StreamHandle,
    pub kernels: Vec<KernelInvocation>,
    pub timed: bool,
}

/// Launches and code-object registrations seen by every launcher of a platform.
#[derive(Debug, Default)]
pub struct LaunchLog {
    launches: Mutex<Vec<LaunchRecord>>,
    code_objects: Mutex<Vec<PathBuf>>,
    lazy_initializations: AtomicUsize,
}

impl LaunchLog {
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().expect("launch log poisoned").clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().expect("launch log poisoned").len()
    }

    pub fn last_launch(&self) -> Option<LaunchRecord> {
        self.launches
            .lock()
            .expect("launch log poisoned")
            .last()
            .cloned()
    }

    pub fn code_objects(&self) -> Vec<PathBuf> {
        self.code_objects
            .lock()
            .expect("code object log poisoned")
            .clone()
    }

    pub fn lazy_initializations(&self) -> usize {
        self.lazy_initializations.load(Ordering::Acquire)
    }

    fn record_launch(&self, record: LaunchRecord) {
        self.launches
            .lock()
            .expect("launch log poisoned")
            .push(record);
    }

    fn record_code_object(&self, path: &Path) {
        self.code_objects
            .lock()
            .expect("code object log poisoned")
            .push(path.to_path_buf());
    }
}

/// Launcher that checks kernel availability the way a device runtime would and
/// records launches instead of running them.
///
/// Eagerly registered code objects must exist on disk. In lazy mode the code
/// object a kernel names is looked up in the catalog directory on first launch.
/// Binaries built for one xnack mode serve the untagged catalog name.
pub struct RecordingLauncher {
    device: usize,
    log: Arc<LaunchLog>,
    /// Catalog name to the file registered for it.
    registered: HashMap<String, PathBuf>,
    lazy: Option<(XnackMode, PathBuf)>,
    lazily_loaded: Mutex<HashSet<String>>,
    panic_on_launch: bool,
}

impl RecordingLauncher {
    pub fn new(device: usize, log: Arc<LaunchLog>) -> Self {
        Self {
            device,
            log,
            registered: HashMap::new(),
            lazy: None,
            lazily_loaded: Mutex::new(HashSet::new()),
            panic_on_launch: false,
        }
    }

    /// Makes every launch panic, to exercise unwinding at the dispatch boundary.
    pub fn panicking(mut self) -> Self {
        self.panic_on_launch = true;
        self
    }

    fn ensure_loaded(&self, code_object: &str) -> DeviceResult<()> {
        if self.registered.contains_key(code_object) {
            return Ok(());
        }
        let Some((xnack, directory)) = &self.lazy else {
            return Err(DeviceError::device(format!(
                "kernel binary {code_object} was never registered on device {}",
                self.device
            )));
        };
        let mut loaded = self
            .lazily_loaded
            .lock()
            .expect("lazy module cache poisoned");
        if loaded.contains(code_object) {
            return Ok(());
        }
        let Some(path) = code_object_file_names(code_object, *xnack)
            .into_iter()
            .map(|name| directory.join(name))
            .find(|path| path.is_file())
        else {
            return Err(DeviceError::device(format!(
                "kernel binary {code_object} not found in {}",
                directory.display()
            )));
        };
        self.log.record_code_object(&path);
        loaded.insert(code_object.to_string());
        Ok(())
    }
}

impl KernelLauncher for RecordingLauncher {
    fn load_code_object_file(&mut self, path: &Path) -> DeviceResult<()> {
        if !path.is_file() {
            return Err(DeviceError::device(format!(
                "{} is not a readable code object",
                path.display()
            )));
        }
        let (name, tagged) = code_object_name(path).unwrap_or_default();
        // A mode-specific build wins over the generic one of the same name.
        if tagged || !self.registered.contains_key(&name) {
            self.registered.insert(name, path.to_path_buf());
        }
        self.log.record_code_object(path);
        Ok(())
    }

    fn initialize_lazy_loading(
        &mut self,
        _arch: &str,
        xnack: XnackMode,
        directory: &Path,
    ) -> DeviceResult<()> {
        self.lazy = Some((xnack, directory.to_path_buf()));
        self.log.lazy_initializations.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn launch_kernels(
        &self,
        kernels: &[KernelInvocation],
        stream: StreamHandle,
        timing: Option<TimingEvents>,
    ) -> DeviceResult<()> {
        if self.panic_on_launch {
            panic!("simulated launcher fault on device {}", self.device);
        }
        for kernel in kernels {
            self.ensure_loaded(&kernel.code_object)?;
        }
        self.log.record_launch(LaunchRecord {
            device: self.device,
            stream,
            kernels: kernels.to_vec(),
            timed: timing.is_some(),
        });
        Ok(())
    }

    fn loaded_code_objects(&self) -> usize {
        self.registered.len()
            + self
                .lazily_loaded
                .lock()
                .expect("lazy module cache poisoned")
                .len()
    }
}
