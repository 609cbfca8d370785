use std::sync::Arc;

use gemm_rs::handle::{Workspace, WorkspaceProvider};
use gemm_rs::problem::DevicePtr;

use crate::runtime::HipRuntime;

/// Workspace provider that allocates device memory with `hipMalloc` on every
/// request, up to a fixed per-call limit.
pub struct HipWorkspace {
    runtime: Arc<HipRuntime>,
    device: i32,
    limit: usize,
}

impl HipWorkspace {
    pub fn new(runtime: Arc<HipRuntime>, device: i32, limit: usize) -> Self {
        Self {
            runtime,
            device,
            limit,
        }
    }
}

impl WorkspaceProvider for HipWorkspace {
    fn available(&self) -> usize {
        self.limit
    }

    fn allocate(&self, bytes: usize) -> Option<Workspace> {
        if bytes > self.limit {
            return None;
        }
        match self.runtime.malloc(self.device, bytes) {
            Ok(ptr) => Some(Workspace {
                ptr: DevicePtr(ptr),
                bytes,
            }),
            Err(err) => {
                tracing::warn!(device = self.device, bytes, error = %err, "workspace allocation failed");
                None
            }
        }
    }

    fn release(&self, workspace: Workspace) {
        if workspace.ptr.is_null() {
            return;
        }
        if let Err(err) = self.runtime.free(self.device, workspace.ptr.0) {
            tracing::warn!(device = self.device, error = %err, "workspace release failed");
        }
    }
}
