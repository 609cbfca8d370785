use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use gemm_rs::handle::{Workspace, WorkspaceProvider};
use gemm_rs::problem::DevicePtr;

/// Fixed-capacity workspace that hands out the same region every time and
/// remembers what was asked for.
#[derive(Debug)]
pub struct ArenaWorkspace {
    base: DevicePtr,
    capacity: usize,
    requests: Mutex<Vec<usize>>,
    released: AtomicUsize,
}

impl ArenaWorkspace {
    pub fn new(capacity: usize) -> Self {
        Self {
            base: DevicePtr(0x7f00_0000_0000),
            capacity,
            requests: Mutex::new(Vec::new()),
            released: AtomicUsize::new(0),
        }
    }

    /// Sizes of every allocation request, granted or not.
    pub fn requests(&self) -> Vec<usize> {
        self.requests
            .lock()
            .expect("workspace request log poisoned")
            .clone()
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }
}

impl WorkspaceProvider for ArenaWorkspace {
    fn available(&self) -> usize {
        self.capacity
    }

    fn allocate(&self, bytes: usize) -> Option<Workspace> {
        self.requests
            .lock()
            .expect("workspace request log poisoned")
            .push(bytes);
        (bytes <= self.capacity).then_some(Workspace {
            ptr: self.base,
            bytes,
        })
    }

    fn release(&self, _workspace: Workspace) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}
