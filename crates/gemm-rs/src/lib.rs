pub mod catalog;
pub mod config;
pub mod context;
pub mod device;
pub mod diagnostics;
pub mod dispatch;
mod env;
pub mod error;
pub mod handle;
pub mod host;
pub mod problem;
pub mod registry;
pub mod telemetry;

pub use catalog::{Solution, SolutionCatalog, SolutionLibrary};
pub use config::HostConfig;
pub use context::DeviceContext;
pub use dispatch::{DispatchEngine, DispatchOutcome, EnumerateMode, SelectionMode};
pub use error::{DispatchError, InitError, Status};
pub use handle::{AtomicsMode, Handle, Workspace, WorkspaceProvider};
pub use problem::{ContractionArgs, ProblemDescriptor, ProblemKey};
pub use registry::{HostRegistry, LoadStats};
