//! Caller-side state carried into every dispatch.

use std::fmt;
use std::sync::Arc;

use crate::device::{StreamHandle, TimingEvents};
use crate::problem::{DevicePtr, PerformanceMetric, ProblemContext};

/// Granularity, in bytes, of every workspace size the runtime reports or requests.
pub const WORKSPACE_GRANULARITY: usize = 256;

/// Rounds `bytes` up to the next multiple of [`WORKSPACE_GRANULARITY`].
///
/// Returns `None` when the rounded size does not fit in `usize`.
pub fn round_up_workspace(bytes: usize) -> Option<usize> {
    bytes.checked_next_multiple_of(WORKSPACE_GRANULARITY)
}

/// Device scratch memory handed to one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workspace {
    pub ptr: DevicePtr,
    pub bytes: usize,
}

/// Caller-owned device memory manager.
pub trait WorkspaceProvider: Send + Sync {
    /// Bytes that can currently be handed out in one allocation.
    fn available(&self) -> usize;

    /// Returns `None` when `bytes` cannot be provided.
    fn allocate(&self, bytes: usize) -> Option<Workspace>;

    fn release(&self, _workspace: Workspace) {}
}

/// Provider for handles that never pass scratch memory to kernels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWorkspace;

impl WorkspaceProvider for NoWorkspace {
    fn available(&self) -> usize {
        0
    }

    fn allocate(&self, bytes: usize) -> Option<Workspace> {
        (bytes == 0).then_some(Workspace {
            ptr: DevicePtr::NULL,
            bytes: 0,
        })
    }
}

/// Whether kernels may use atomics, which makes their reduction order
/// nondeterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AtomicsMode {
    #[default]
    Allowed,
    NotAllowed,
}

pub struct Handle {
    device: usize,
    stream: StreamHandle,
    timing: Option<TimingEvents>,
    atomics_mode: AtomicsMode,
    performance_metric: PerformanceMetric,
    workspace: Arc<dyn WorkspaceProvider>,
    size_query: Option<usize>,
    fitness_query: bool,
    fitness: Option<f64>,
}

impl Handle {
    pub fn new(device: usize) -> Self {
        Self {
            device,
            stream: StreamHandle::default(),
            timing: None,
            atomics_mode: AtomicsMode::default(),
            performance_metric: PerformanceMetric::Default,
            workspace: Arc::new(NoWorkspace),
            size_query: None,
            fitness_query: false,
            fitness: None,
        }
    }

    pub fn with_stream(mut self, stream: StreamHandle) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_timing(mut self, timing: TimingEvents) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_atomics_mode(mut self, mode: AtomicsMode) -> Self {
        self.atomics_mode = mode;
        self
    }

    pub fn with_performance_metric(mut self, metric: PerformanceMetric) -> Self {
        self.performance_metric = metric;
        self
    }

    pub fn with_workspace(mut self, provider: Arc<dyn WorkspaceProvider>) -> Self {
        self.workspace = provider;
        self
    }

    pub fn device(&self) -> usize {
        self.device
    }

    pub fn stream(&self) -> StreamHandle {
        self.stream
    }

    pub fn timing(&self) -> Option<TimingEvents> {
        self.timing
    }

    pub fn atomics_mode(&self) -> AtomicsMode {
        self.atomics_mode
    }

    pub fn workspace(&self) -> &Arc<dyn WorkspaceProvider> {
        &self.workspace
    }

    /// Switches the handle into size-query mode: dispatches report their
    /// workspace requirement instead of launching.
    pub fn start_memory_size_query(&mut self) {
        self.size_query = Some(0);
    }

    pub fn is_size_query(&self) -> bool {
        self.size_query.is_some()
    }

    /// Records a requirement seen during a size query, keeping the largest.
    pub fn set_optimal_workspace_size(&mut self, bytes: usize) {
        if let Some(current) = self.size_query.as_mut() {
            *current = (*current).max(bytes);
        }
    }

    /// Leaves size-query mode and returns the largest requirement recorded.
    pub fn stop_memory_size_query(&mut self) -> Option<usize> {
        self.size_query.take()
    }

    /// Switches the handle into fitness-query mode: dispatches select a
    /// solution and record its predicted performance without launching.
    pub fn begin_fitness_query(&mut self) {
        self.fitness_query = true;
        self.fitness = None;
    }

    pub fn is_fitness_query(&self) -> bool {
        self.fitness_query
    }

    pub(crate) fn record_fitness(&mut self, fitness: f64) {
        self.fitness = Some(fitness);
    }

    /// Leaves fitness-query mode and returns the last recorded fitness.
    pub fn end_fitness_query(&mut self) -> Option<f64> {
        self.fitness_query = false;
        self.fitness.take()
    }

    /// Selection-relevant state for building a problem descriptor.
    pub fn problem_context(&self) -> ProblemContext {
        let workspace_limit = if self.is_size_query() {
            usize::MAX
        } else {
            self.workspace.available() / WORKSPACE_GRANULARITY * WORKSPACE_GRANULARITY
        };
        ProblemContext {
            deterministic: self.atomics_mode == AtomicsMode::NotAllowed,
            performance_metric: self.performance_metric,
            workspace_limit,
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("device", &self.device)
            .field("stream", &self.stream)
            .field("atomics_mode", &self.atomics_mode)
            .field("performance_metric", &self.performance_metric)
            .field("workspace_available", &self.workspace.available())
            .field("size_query", &self.size_query)
            .field("fitness_query", &self.fitness_query)
            .finish()
    }
}
