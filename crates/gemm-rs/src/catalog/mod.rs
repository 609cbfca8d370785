//! Solution catalogs: the queryable set of precompiled kernels for one target.
//!
//! The dispatch layer only talks to the [`SolutionLibrary`] and [`Solution`]
//! traits. [`SolutionCatalog`] implements them over persisted catalog files;
//! tests may substitute their own libraries.

pub mod format;
mod library;
pub mod locate;
mod solution;

use std::fmt;
use std::sync::Arc;

pub use library::{CatalogStats, OverrideSummary, SolutionCatalog};
pub use solution::CatalogSolution;

use crate::device::{Hardware, KernelInvocation};
use crate::problem::{DevicePtr, ProblemDescriptor};

/// Runtime inputs that are not part of the problem description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractionInputs {
    pub workspace: DevicePtr,
    pub workspace_bytes: usize,
}

/// One precompiled kernel variant.
pub trait Solution: Send + Sync + fmt::Debug {
    /// Stable 0-based catalog index.
    fn index(&self) -> i32;

    fn name(&self) -> &str;

    /// Same data types and transposes as `problem`, ignoring sizes.
    fn matches_type(&self, problem: &ProblemDescriptor) -> bool;

    fn can_solve(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> bool;

    /// Scratch bytes needed for `problem`, before any rounding.
    fn required_workspace_size(&self, problem: &ProblemDescriptor) -> usize;

    /// Predicted throughput for `problem`; higher is better.
    fn predicted_performance(&self, problem: &ProblemDescriptor, hardware: &Hardware) -> f64;

    /// Kernel launches that compute `problem`.
    fn solve(
        &self,
        problem: &ProblemDescriptor,
        inputs: &ContractionInputs,
        hardware: &Hardware,
    ) -> Vec<KernelInvocation>;
}

/// Queryable collection of solutions for one hardware target.
pub trait SolutionLibrary: Send + Sync {
    fn architecture(&self) -> &str;

    /// Looks up a solution by 0-based index among the solutions loaded so far.
    fn solution_by_index(&self, index: i32) -> Option<Arc<dyn Solution>>;

    /// Best eligible solution for `problem`. When `fitness` is given it receives
    /// the winner's predicted performance.
    fn find_best_solution(
        &self,
        problem: &ProblemDescriptor,
        hardware: &Hardware,
        fitness: Option<&mut f64>,
    ) -> Option<Arc<dyn Solution>>;

    /// Every solution that can solve `problem`, in index order.
    fn find_all_solutions(
        &self,
        problem: &ProblemDescriptor,
        hardware: &Hardware,
    ) -> Vec<Arc<dyn Solution>>;

    /// Every solution of the problem's type regardless of size, in index order.
    fn find_all_solutions_matching_type(
        &self,
        problem: &ProblemDescriptor,
        hardware: &Hardware,
    ) -> Vec<Arc<dyn Solution>>;
}
