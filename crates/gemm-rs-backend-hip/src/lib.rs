//! HIP platform for gemm-rs.
//!
//! The HIP runtime is loaded at run time with `libloading`, so this crate builds
//! on machines without ROCm. [`HipPlatform::new`] fails with
//! `DeviceError::Unavailable` when the runtime library cannot be found.

mod launcher;
mod platform;
mod runtime;
pub mod topology;
mod workspace;

pub use launcher::HipLauncher;
pub use platform::HipPlatform;
pub use runtime::{is_available, runtime, HipRuntime};
pub use workspace::HipWorkspace;
