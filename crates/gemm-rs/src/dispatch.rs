//! Solution selection, workspace sizing and launch for one contraction call.
//!
//! [`DispatchEngine`] holds no per-call state. Every call resolves the device
//! context through the registry, builds a [`ProblemDescriptor`] from the caller's
//! arguments and handle, and then follows one of four paths: fitness query,
//! workspace-size query, validation only, or launch.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::catalog::{ContractionInputs, Solution};
use crate::context::DeviceContext;
use crate::error::{DispatchError, DispatchResult};
use crate::handle::{round_up_workspace, Handle, Workspace};
use crate::problem::{ContractionArgs, DevicePtr, ProblemDescriptor};
use crate::registry::{panic_message, HostRegistry};

/// How the solution for a call is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionMode {
    /// Highest predicted throughput among eligible solutions.
    #[default]
    BestFit,
    /// Caller-chosen 1-based catalog index.
    SolutionIndex(i32),
}

/// Filter applied when enumerating solutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerateMode {
    /// Solutions that can solve the exact problem.
    CanSolve,
    /// Solutions of the problem's types and transposes, whatever the sizes.
    MatchesType,
}

impl TryFrom<i32> for EnumerateMode {
    type Error = DispatchError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(EnumerateMode::CanSolve),
            1 => Ok(EnumerateMode::MatchesType),
            other => Err(DispatchError::InvalidOption(other)),
        }
    }
}

/// Successful result of [`DispatchEngine::run`]. Solution indices are 1-based.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchOutcome {
    Launched { solution: i32, workspace_bytes: usize },
    /// The solution was resolved and accepted the problem; nothing was launched.
    Checked { solution: i32 },
    WorkspaceQueried { bytes: usize },
    FitnessQueried { solution: i32, fitness: f64 },
}

impl DispatchOutcome {
    pub fn solution(&self) -> Option<i32> {
        match *self {
            DispatchOutcome::Launched { solution, .. }
            | DispatchOutcome::Checked { solution }
            | DispatchOutcome::FitnessQueried { solution, .. } => Some(solution),
            DispatchOutcome::WorkspaceQueried { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct DispatchEngine {
    registry: Arc<HostRegistry>,
}

impl DispatchEngine {
    pub fn new(registry: Arc<HostRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<HostRegistry> {
        &self.registry
    }

    /// Runs one contraction on the handle's device.
    ///
    /// Panics raised below this call are caught and returned as
    /// [`DispatchError::Internal`].
    pub fn run(
        &self,
        args: &ContractionArgs,
        handle: &mut Handle,
        mode: SelectionMode,
    ) -> DispatchResult<DispatchOutcome> {
        if let SelectionMode::SolutionIndex(index) = mode {
            if index <= 0 {
                return Err(DispatchError::InvalidIndex(index));
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let context = self.registry.resolve(handle.device())?;
            let problem =
                ProblemDescriptor::new(args, &handle.problem_context(), self.registry.config())?;
            self.run_on(
                &context,
                &problem,
                handle,
                mode,
                args.flags.check_solution_index,
            )
        }));
        let result = outcome.unwrap_or_else(|payload| {
            Err(DispatchError::Internal(panic_message(payload.as_ref())))
        });
        if let Err(err) = &result {
            self.report_failure(err);
        }
        result
    }

    /// Dispatches an already normalized problem on a resolved context.
    ///
    /// With `check_only` the selected solution is validated against the problem
    /// but not launched.
    pub fn run_on(
        &self,
        context: &DeviceContext,
        problem: &ProblemDescriptor,
        handle: &mut Handle,
        mode: SelectionMode,
        check_only: bool,
    ) -> DispatchResult<DispatchOutcome> {
        let catalog = context.catalog();
        let hardware = context.hardware();
        let mut fitness = 0.0;

        let solution = match mode {
            SelectionMode::SolutionIndex(index) => {
                if index <= 0 {
                    return Err(DispatchError::InvalidIndex(index));
                }
                catalog
                    .solution_by_index(index - 1)
                    .or_else(|| {
                        // Lazy catalogs only know the indices of groups loaded so
                        // far; enumerating loads every group of this type.
                        let enumerated = catalog.find_all_solutions(problem, hardware).len();
                        tracing::debug!(index, enumerated, "retrying index lookup after enumeration");
                        catalog.solution_by_index(index - 1)
                    })
                    .ok_or(DispatchError::UnresolvedIndex(index))?
            }
            SelectionMode::BestFit => {
                let slot = handle.is_fitness_query().then_some(&mut fitness);
                catalog
                    .find_best_solution(problem, hardware, slot)
                    .ok_or_else(|| DispatchError::NoSolution {
                        problem: problem.to_string(),
                    })?
            }
        };
        let index = solution.index() + 1;

        if handle.is_fitness_query() {
            if let SelectionMode::SolutionIndex(_) = mode {
                fitness = solution.predicted_performance(problem, hardware);
            }
            handle.record_fitness(fitness);
            return Ok(DispatchOutcome::FitnessQueried {
                solution: index,
                fitness,
            });
        }

        let Some(bytes) = round_up_workspace(solution.required_workspace_size(problem)) else {
            return Err(DispatchError::Declined {
                index,
                name: solution.name().to_string(),
                problem: problem.to_string(),
            });
        };
        if handle.is_size_query() {
            handle.set_optimal_workspace_size(bytes);
            return Ok(DispatchOutcome::WorkspaceQueried { bytes });
        }

        let workspace = if bytes > 0 {
            let granted = handle
                .workspace()
                .allocate(bytes)
                .ok_or(DispatchError::Workspace { requested: bytes })?;
            Some(granted)
        } else {
            None
        };
        let result = self.launch(context, problem, handle, solution.as_ref(), workspace, check_only);
        if let Some(workspace) = workspace {
            handle.workspace().release(workspace);
        }
        result
    }

    fn launch(
        &self,
        context: &DeviceContext,
        problem: &ProblemDescriptor,
        handle: &Handle,
        solution: &dyn Solution,
        workspace: Option<Workspace>,
        check_only: bool,
    ) -> DispatchResult<DispatchOutcome> {
        let index = solution.index() + 1;
        if !solution.can_solve(problem, context.hardware()) {
            return Err(DispatchError::Declined {
                index,
                name: solution.name().to_string(),
                problem: problem.to_string(),
            });
        }
        if check_only {
            return Ok(DispatchOutcome::Checked { solution: index });
        }

        let inputs = ContractionInputs {
            workspace: workspace.map_or(DevicePtr::NULL, |granted| granted.ptr),
            workspace_bytes: workspace.map_or(0, |granted| granted.bytes),
        };
        let kernels = solution.solve(problem, &inputs, context.hardware());
        context
            .launcher()
            .launch_kernels(&kernels, handle.stream(), handle.timing())?;
        tracing::trace!(
            solution = index,
            name = solution.name(),
            kernels = kernels.len(),
            workspace = inputs.workspace_bytes,
            "launched contraction"
        );
        Ok(DispatchOutcome::Launched {
            solution: index,
            workspace_bytes: inputs.workspace_bytes,
        })
    }

    /// 1-based indices of the solutions selected by `mode`, ascending.
    pub fn solution_indices(
        &self,
        args: &ContractionArgs,
        handle: &Handle,
        mode: EnumerateMode,
    ) -> DispatchResult<Vec<i32>> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let context = self.registry.resolve(handle.device())?;
            let problem =
                ProblemDescriptor::new(args, &handle.problem_context(), self.registry.config())?;
            let catalog = context.catalog();
            let solutions = match mode {
                EnumerateMode::CanSolve => catalog.find_all_solutions(&problem, context.hardware()),
                EnumerateMode::MatchesType => {
                    catalog.find_all_solutions_matching_type(&problem, context.hardware())
                }
            };
            let indices: BTreeSet<i32> = solutions.iter().map(|solution| solution.index() + 1).collect();
            Ok(indices.into_iter().collect())
        }));
        let result = outcome.unwrap_or_else(|payload| {
            Err(DispatchError::Internal(panic_message(payload.as_ref())))
        });
        if let Err(err) = &result {
            self.report_failure(err);
        }
        result
    }

    /// Buffer-filling form of [`DispatchEngine::solution_indices`].
    ///
    /// `size` is required. On entry it holds the capacity of `list`; on return
    /// it holds the full number of solutions. At most that many indices are
    /// copied into `list`, so a short buffer receives a prefix.
    pub fn get_all_solutions(
        &self,
        args: &ContractionArgs,
        handle: &Handle,
        option: i32,
        list: Option<&mut [i32]>,
        size: Option<&mut i32>,
    ) -> DispatchResult<()> {
        let size = size.ok_or(DispatchError::NullPointer("list_size"))?;
        let mode = EnumerateMode::try_from(option)?;
        let indices = self.solution_indices(args, handle, mode)?;

        if let Some(list) = list {
            let capacity = usize::try_from(*size).unwrap_or(0).min(list.len());
            for (slot, index) in list.iter_mut().take(capacity).zip(&indices) {
                *slot = *index;
            }
        }
        *size = i32::try_from(indices.len()).unwrap_or(i32::MAX);
        Ok(())
    }

    fn report_failure(&self, err: &DispatchError) {
        let diagnostics = self.registry.diagnostics();
        match err {
            DispatchError::NoSolution { problem } => {
                diagnostics.report_once(&format!("no solution found for {problem}"));
            }
            DispatchError::Init(_) | DispatchError::Launch(_) | DispatchError::Internal(_) => {
                diagnostics.report_once(&format!("contraction dispatch failed: {err}"));
            }
            _ => {}
        }
    }
}
