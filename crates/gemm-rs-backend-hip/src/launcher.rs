use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gemm_rs::device::{
    code_object_file_names, code_object_name, KernelInvocation, KernelLauncher, StreamHandle,
    TimingEvents, XnackMode,
};
use gemm_rs::error::{DeviceError, DeviceResult};

use crate::runtime::{HipFunctionHandle, HipModuleHandle, HipRuntime};

struct LazyModules {
    arch: String,
    xnack: XnackMode,
    directory: PathBuf,
}

/// Kernel launcher for one HIP device.
///
/// Code objects are either registered up front or, in lazy mode, loaded from
/// `<directory>/<code_object>-<xnack>.co` or `<directory>/<code_object>.co` the
/// first time one of their kernels runs. Modules are keyed by the catalog's
/// code object name, without the xnack tag of the file.
pub struct HipLauncher {
    runtime: Arc<HipRuntime>,
    device: i32,
    registered: HashMap<String, Arc<HipModuleHandle>>,
    lazy: Option<LazyModules>,
    lazily_loaded: Mutex<HashMap<String, Arc<HipModuleHandle>>>,
    functions: Mutex<HashMap<String, HipFunctionHandle>>,
}

impl HipLauncher {
    pub fn new(runtime: Arc<HipRuntime>, device: i32) -> Self {
        Self {
            runtime,
            device,
            registered: HashMap::new(),
            lazy: None,
            lazily_loaded: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
        }
    }

    fn module(&self, code_object: &str) -> DeviceResult<Arc<HipModuleHandle>> {
        if let Some(module) = self.registered.get(code_object) {
            return Ok(Arc::clone(module));
        }
        let Some(lazy) = &self.lazy else {
            return Err(DeviceError::device(format!(
                "kernel binary {code_object} was never registered on device {}",
                self.device
            )));
        };
        let mut loaded = self
            .lazily_loaded
            .lock()
            .expect("lazy module cache poisoned");
        if let Some(module) = loaded.get(code_object) {
            return Ok(Arc::clone(module));
        }
        let Some(path) = code_object_file_names(code_object, lazy.xnack)
            .into_iter()
            .map(|name| lazy.directory.join(name))
            .find(|path| path.is_file())
        else {
            return Err(DeviceError::device(format!(
                "kernel binary {code_object} for {} not found in {}",
                lazy.arch,
                lazy.directory.display()
            )));
        };
        let module = self.runtime.load_module(self.device, &path)?;
        tracing::debug!(device = self.device, code_object, "loaded kernel binary on demand");
        loaded.insert(code_object.to_string(), Arc::clone(&module));
        Ok(module)
    }

    fn function(&self, kernel: &KernelInvocation) -> DeviceResult<HipFunctionHandle> {
        let key = format!("{}/{}", kernel.code_object, kernel.kernel_name);
        if let Some(function) = self
            .functions
            .lock()
            .expect("kernel function cache poisoned")
            .get(&key)
        {
            return Ok(function.clone());
        }
        let module = self.module(&kernel.code_object)?;
        let function = self.runtime.get_function(&module, &kernel.kernel_name)?;
        self.functions
            .lock()
            .expect("kernel function cache poisoned")
            .insert(key, function.clone());
        Ok(function)
    }
}

impl KernelLauncher for HipLauncher {
    fn load_code_object_file(&mut self, path: &Path) -> DeviceResult<()> {
        let Some((name, tagged)) = code_object_name(path) else {
            return Err(DeviceError::device(format!(
                "{} is not a code object file name",
                path.display()
            )));
        };
        // A mode-specific build wins over the generic one of the same name.
        if !tagged && self.registered.contains_key(&name) {
            return Ok(());
        }
        let module = self.runtime.load_module(self.device, path)?;
        self.registered.insert(name, module);
        Ok(())
    }

    fn initialize_lazy_loading(
        &mut self,
        arch: &str,
        xnack: XnackMode,
        directory: &Path,
    ) -> DeviceResult<()> {
        self.lazy = Some(LazyModules {
            arch: arch.to_string(),
            xnack,
            directory: directory.to_path_buf(),
        });
        Ok(())
    }

    fn launch_kernels(
        &self,
        kernels: &[KernelInvocation],
        stream: StreamHandle,
        timing: Option<TimingEvents>,
    ) -> DeviceResult<()> {
        let functions = kernels
            .iter()
            .map(|kernel| self.function(kernel))
            .collect::<DeviceResult<Vec<_>>>()?;

        self.runtime.set_device(self.device)?;
        if let Some(events) = timing {
            self.runtime.record_event(events.start.0, stream.0)?;
        }
        for (kernel, function) in kernels.iter().zip(&functions) {
            self.runtime.launch_kernel(
                function,
                kernel.grid,
                kernel.workgroup,
                kernel.shared_mem_bytes,
                stream.0,
                kernel.args.as_bytes(),
            )?;
        }
        if let Some(events) = timing {
            self.runtime.record_event(events.stop.0, stream.0)?;
        }
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
