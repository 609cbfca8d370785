use std::ffi::{c_char, c_void, CStr, CString};
use std::path::Path;
use std::sync::{Arc, OnceLock};

use gemm_rs::error::{DeviceError, DeviceResult};
use libloading::Library;

type HipError = i32;
type HipModule = *mut c_void;
type HipFunction = *mut c_void;
type HipStream = *mut c_void;
type HipEvent = *mut c_void;

const HIP_SUCCESS: HipError = 0;

/// Markers for the `extra` launch argument of `hipModuleLaunchKernel`.
const HIP_LAUNCH_PARAM_BUFFER_POINTER: usize = 0x01;
const HIP_LAUNCH_PARAM_BUFFER_SIZE: usize = 0x02;
const HIP_LAUNCH_PARAM_END: usize = 0x03;

type HipInitFn = unsafe extern "C" fn(flags: u32) -> HipError;
type HipGetDeviceCountFn = unsafe extern "C" fn(count: *mut i32) -> HipError;
type HipSetDeviceFn = unsafe extern "C" fn(device: i32) -> HipError;
type HipDeviceGetNameFn =
    unsafe extern "C" fn(name: *mut c_char, len: i32, device: i32) -> HipError;
type HipMallocFn = unsafe extern "C" fn(ptr: *mut *mut c_void, bytes: usize) -> HipError;
type HipFreeFn = unsafe extern "C" fn(ptr: *mut c_void) -> HipError;
type HipModuleLoadFn =
    unsafe extern "C" fn(module: *mut HipModule, fname: *const c_char) -> HipError;
type HipModuleUnloadFn = unsafe extern "C" fn(module: HipModule) -> HipError;
type HipModuleGetFunctionFn = unsafe extern "C" fn(
    function: *mut HipFunction,
    module: HipModule,
    name: *const c_char,
) -> HipError;
type HipModuleLaunchKernelFn = unsafe extern "C" fn(
    f: HipFunction,
    grid_dim_x: u32,
    grid_dim_y: u32,
    grid_dim_z: u32,
    block_dim_x: u32,
    block_dim_y: u32,
    block_dim_z: u32,
    shared_mem_bytes: u32,
    stream: HipStream,
    kernel_params: *mut *mut c_void,
    extra: *mut *mut c_void,
) -> HipError;
type HipEventRecordFn = unsafe extern "C" fn(event: HipEvent, stream: HipStream) -> HipError;

struct RuntimeFns {
    hip_init: HipInitFn,
    hip_get_device_count: HipGetDeviceCountFn,
    hip_set_device: HipSetDeviceFn,
    hip_device_get_name: HipDeviceGetNameFn,
    hip_malloc: HipMallocFn,
    hip_free: HipFreeFn,
    hip_module_load: HipModuleLoadFn,
    hip_module_unload: HipModuleUnloadFn,
    hip_module_get_function: HipModuleGetFunctionFn,
    hip_module_launch_kernel: HipModuleLaunchKernelFn,
    hip_event_record: HipEventRecordFn,
}

/// Entry points of the HIP runtime library, resolved once per process.
pub struct HipRuntime {
    _lib: Library,
    fns: RuntimeFns,
}

/// Loaded code object. Unloaded on drop.
pub struct HipModuleHandle {
    runtime: Arc<HipRuntime>,
    device: i32,
    // Stored as usize so modules can be shared across threads.
    module: usize,
}

impl Drop for HipModuleHandle {
    fn drop(&mut self) {
        if self.module != 0 {
            // SAFETY: Module was loaded by this runtime and is unloaded once.
            let _ = unsafe {
                (self.runtime.fns.hip_set_device)(self.device);
                (self.runtime.fns.hip_module_unload)(self.module as HipModule)
            };
            self.module = 0;
        }
    }
}

#[derive(Clone)]
pub struct HipFunctionHandle {
    #[allow(dead_code)]
    module: Arc<HipModuleHandle>,
    func: usize,
}

static HIP_RUNTIME: OnceLock<Result<Arc<HipRuntime>, String>> = OnceLock::new();

pub fn is_available() -> bool {
    runtime().is_ok()
}

pub fn runtime() -> DeviceResult<Arc<HipRuntime>> {
    let init = HIP_RUNTIME.get_or_init(|| match HipRuntime::new() {
        Ok(runtime) => Ok(Arc::new(runtime)),
        Err(err) => Err(err.to_string()),
    });
    match init {
        Ok(runtime) => Ok(Arc::clone(runtime)),
        Err(msg) => Err(DeviceError::unavailable(msg.clone())),
    }
}

impl HipRuntime {
    fn new() -> DeviceResult<Self> {
        let lib = load_hip_library()?;
        let fns = RuntimeFns {
            hip_init: load_symbol(&lib, b"hipInit\0")?,
            hip_get_device_count: load_symbol(&lib, b"hipGetDeviceCount\0")?,
            hip_set_device: load_symbol(&lib, b"hipSetDevice\0")?,
            hip_device_get_name: load_symbol(&lib, b"hipDeviceGetName\0")?,
            hip_malloc: load_symbol(&lib, b"hipMalloc\0")?,
            hip_free: load_symbol(&lib, b"hipFree\0")?,
            hip_module_load: load_symbol(&lib, b"hipModuleLoad\0")?,
            hip_module_unload: load_symbol(&lib, b"hipModuleUnload\0")?,
            hip_module_get_function: load_symbol(&lib, b"hipModuleGetFunction\0")?,
            hip_module_launch_kernel: load_symbol(&lib, b"hipModuleLaunchKernel\0")?,
            hip_event_record: load_symbol(&lib, b"hipEventRecord\0")?,
        };
        // SAFETY: hipInit takes no pointers; flags must be zero.
        unsafe { check_hip((fns.hip_init)(0), "hipInit")? };
        Ok(Self { _lib: lib, fns })
    }

    pub fn device_count(&self) -> DeviceResult<usize> {
        let mut count = 0i32;
        // SAFETY: `count` is a valid out pointer.
        unsafe {
            check_hip(
                (self.fns.hip_get_device_count)(&mut count as *mut i32),
                "hipGetDeviceCount",
            )?;
        }
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn set_device(&self, device: i32) -> DeviceResult<()> {
        // SAFETY: Plain integer argument; invalid ordinals are reported as errors.
        unsafe { check_hip((self.fns.hip_set_device)(device), "hipSetDevice") }
    }

    pub fn device_name(&self, device: i32) -> DeviceResult<String> {
        let mut buffer = [0 as c_char; 256];
        // SAFETY: Buffer is writable for its full length and NUL-terminated by HIP.
        unsafe {
            check_hip(
                (self.fns.hip_device_get_name)(buffer.as_mut_ptr(), buffer.len() as i32, device),
                "hipDeviceGetName",
            )?;
            Ok(CStr::from_ptr(buffer.as_ptr())
                .to_string_lossy()
                .into_owned())
        }
    }

    pub fn malloc(&self, device: i32, bytes: usize) -> DeviceResult<u64> {
        self.set_device(device)?;
        let mut ptr: *mut c_void = std::ptr::null_mut();
        // SAFETY: `ptr` is a valid out pointer for the allocation.
        unsafe {
            check_hip(
                (self.fns.hip_malloc)(&mut ptr as *mut *mut c_void, bytes),
                "hipMalloc",
            )?;
        }
        Ok(ptr as u64)
    }

    pub fn free(&self, device: i32, ptr: u64) -> DeviceResult<()> {
        self.set_device(device)?;
        // SAFETY: Pointer came from `malloc` on this runtime and is freed once.
        unsafe { check_hip((self.fns.hip_free)(ptr as *mut c_void), "hipFree") }
    }

    pub fn load_module(self: &Arc<Self>, device: i32, path: &Path) -> DeviceResult<Arc<HipModuleHandle>> {
        self.set_device(device)?;
        let c_path = CString::new(path.to_string_lossy().into_owned())
            .map_err(|_| DeviceError::device("code object path contains NUL byte"))?;
        let mut module: HipModule = std::ptr::null_mut();
        // SAFETY: Path is NUL-terminated and `module` is a valid out pointer.
        unsafe {
            check_hip(
                (self.fns.hip_module_load)(&mut module as *mut HipModule, c_path.as_ptr()),
                "hipModuleLoad",
            )?;
        }
        Ok(Arc::new(HipModuleHandle {
            runtime: Arc::clone(self),
            device,
            module: module as usize,
        }))
    }

    pub fn get_function(
        &self,
        module: &Arc<HipModuleHandle>,
        symbol: &str,
    ) -> DeviceResult<HipFunctionHandle> {
        let c_symbol = CString::new(symbol)
            .map_err(|_| DeviceError::device("kernel symbol contains NUL byte"))?;
        let mut function: HipFunction = std::ptr::null_mut();
        // SAFETY: Module is live and the output pointer is valid.
        unsafe {
            check_hip(
                (self.fns.hip_module_get_function)(
                    &mut function as *mut HipFunction,
                    module.module as HipModule,
                    c_symbol.as_ptr(),
                ),
                "hipModuleGetFunction",
            )?;
        }
        Ok(HipFunctionHandle {
            module: Arc::clone(module),
            func: function as usize,
        })
    }

    /// Launches `function` with a packed argument buffer passed through the
    /// `extra` parameter.
    pub fn launch_kernel(
        &self,
        function: &HipFunctionHandle,
        grid: [u32; 3],
        workgroup: [u32; 3],
        shared_mem_bytes: u32,
        stream: usize,
        args: &[u8],
    ) -> DeviceResult<()> {
        let mut args_copy = args.to_vec();
        let mut args_size = args_copy.len();
        let mut extra: [*mut c_void; 5] = [
            HIP_LAUNCH_PARAM_BUFFER_POINTER as *mut c_void,
            args_copy.as_mut_ptr() as *mut c_void,
            HIP_LAUNCH_PARAM_BUFFER_SIZE as *mut c_void,
            &mut args_size as *mut usize as *mut c_void,
            HIP_LAUNCH_PARAM_END as *mut c_void,
        ];
        // SAFETY: Function is live; the argument buffer and its size outlive the call.
        unsafe {
            check_hip(
                (self.fns.hip_module_launch_kernel)(
                    function.func as HipFunction,
                    grid[0],
                    grid[1],
                    grid[2],
                    workgroup[0],
                    workgroup[1],
                    workgroup[2],
                    shared_mem_bytes,
                    stream as HipStream,
                    std::ptr::null_mut(),
                    extra.as_mut_ptr(),
                ),
                "hipModuleLaunchKernel",
            )
        }
    }

    pub fn record_event(&self, event: usize, stream: usize) -> DeviceResult<()> {
        // SAFETY: Event and stream are caller-owned HIP handles.
        unsafe {
            check_hip(
                (self.fns.hip_event_record)(event as HipEvent, stream as HipStream),
                "hipEventRecord",
            )
        }
    }
}

fn load_hip_library() -> DeviceResult<Library> {
    let candidates = ["libamdhip64.so", "libamdhip64.so.6", "libamdhip64.so.5", "amdhip64.dll"];

    for candidate in candidates {
        // SAFETY: Dynamic library probe only; no symbols are invoked at this stage.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            return Ok(lib);
        }
    }

    Err(DeviceError::unavailable(
        "failed to load HIP runtime library (tried libamdhip64.so, libamdhip64.so.6, libamdhip64.so.5, amdhip64.dll)",
    ))
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> DeviceResult<T> {
    // SAFETY: Caller provides the symbol type declared by the HIP runtime API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        DeviceError::unavailable(format!(
            "failed to resolve HIP symbol {}: {err}",
            String::from_utf8_lossy(name).trim_end_matches('\0')
        ))
    })?;
    Ok(*sym)
}

fn check_hip(code: HipError, op: &'static str) -> DeviceResult<()> {
    if code == HIP_SUCCESS {
        Ok(())
    } else {
        Err(DeviceError::call(op, code))
    }
}
