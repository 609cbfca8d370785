//! Software platform for exercising the gemm-rs runtime without a GPU.
//!
//! Devices are simulated from target names, launches are recorded instead of
//! executed, and [`fixtures`] writes catalogs and kernel binaries to disk.

pub mod fixtures;
mod launcher;
mod platform;
mod workspace;

pub use launcher::{LaunchLog, LaunchRecord, RecordingLauncher};
pub use platform::{SimulatedDevice, SimulatedPlatform};
pub use workspace::ArenaWorkspace;
