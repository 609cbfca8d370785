//! Process-wide registry and the status-returning entry points built on it.
//!
//! The registry is created by the first [`install`] call and lives until the
//! process exits; it is never reset. Entry points used before any platform is
//! installed fail with [`InitError::NoPlatform`], which is fatal under the
//! global [`HostConfig`]'s fatal policy.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::{FatalPolicy, HostConfig};
use crate::device::Platform;
use crate::dispatch::{DispatchEngine, SelectionMode};
use crate::error::{InitError, Status};
use crate::handle::Handle;
use crate::problem::ContractionArgs;
use crate::registry::HostRegistry;

static REGISTRY: OnceCell<Arc<HostRegistry>> = OnceCell::new();

/// Installs the process-wide registry. The first call wins; later calls return
/// the registry that is already installed and drop their arguments.
pub fn install(platform: Arc<dyn Platform>, config: HostConfig) -> Arc<HostRegistry> {
    let registry = REGISTRY.get_or_init(|| {
        tracing::debug!(platform = platform.name(), "installing host registry");
        Arc::new(HostRegistry::new(Arc::clone(&platform), config))
    });
    Arc::clone(registry)
}

pub fn registry() -> Result<Arc<HostRegistry>, InitError> {
    REGISTRY.get().cloned().ok_or(InitError::NoPlatform)
}

/// Engine over the installed registry.
pub fn engine() -> Result<DispatchEngine, InitError> {
    registry().map(DispatchEngine::new)
}

/// Runs one contraction problem through the installed registry.
pub fn run_contraction_problem(
    args: &ContractionArgs,
    handle: &mut Handle,
    mode: SelectionMode,
) -> Status {
    let engine = match engine() {
        Ok(engine) => engine,
        Err(err) => return missing_platform(err),
    };
    match engine.run(args, handle, mode) {
        Ok(_) => Status::Success,
        Err(err) => err.status(),
    }
}

/// Fills `list` with 1-based solution indices; see
/// [`DispatchEngine::get_all_solutions`].
pub fn get_all_solutions(
    args: &ContractionArgs,
    handle: &Handle,
    option: i32,
    list: Option<&mut [i32]>,
    size: Option<&mut i32>,
) -> Status {
    let engine = match engine() {
        Ok(engine) => engine,
        Err(err) => return missing_platform(err),
    };
    match engine.get_all_solutions(args, handle, option, list, size) {
        Ok(()) => Status::Success,
        Err(err) => err.status(),
    }
}

/// Loads `device` now instead of on its first dispatch.
pub fn initialize(device: usize) -> Status {
    let registry = match registry() {
        Ok(registry) => registry,
        Err(err) => return missing_platform(err),
    };
    match registry.warm_up(device) {
        Ok(_) => Status::Success,
        Err(_) => Status::InternalError,
    }
}

fn missing_platform(err: InitError) -> Status {
    tracing::error!(error = %err, "host entry point used before a platform was installed");
    if HostConfig::global().fatal_policy == FatalPolicy::Abort {
        std::process::abort();
    }
    Status::InternalError
}
