//! Error types and the status codes they collapse to at the public boundary.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::problem::DataType;

/// Status reported to callers of the dispatch entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    Success = 0,
    InvalidPointer = 1,
    InvalidValue = 2,
    NotImplemented = 3,
    MemoryError = 4,
    InternalError = 5,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::InvalidPointer => "invalid_pointer",
            Status::InvalidValue => "invalid_value",
            Status::NotImplemented => "not_implemented",
            Status::MemoryError => "memory_error",
            Status::InternalError => "internal_error",
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected contraction descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProblemError {
    #[error("unsupported type combination: input {input}, output {output}, compute {compute}")]
    UnsupportedTypes {
        input: DataType,
        output: DataType,
        compute: DataType,
    },
    #[error("{name} is {found} but the compute type is {expected}")]
    ScalarType {
        name: &'static str,
        found: DataType,
        expected: DataType,
    },
    #[error("operand {operand} has inconsistent types: {found} vs {expected}")]
    OperandType {
        operand: &'static str,
        found: DataType,
        expected: DataType,
    },
}

/// Failures raised while reading or querying persisted catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("no catalog for {arch} in {}: tried {tried}; available: {available}", .dir.display())]
    NotFound {
        arch: String,
        dir: PathBuf,
        tried: String,
        available: String,
    },
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("json error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("bincode error in {}: {source}", .path.display())]
    Bincode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
    #[error("{} has no recognized catalog extension (.dat or .json)", .path.display())]
    Encoding { path: PathBuf },
    #[error("{} has format version {found}, expected {expected}", .path.display())]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("{} declares solution index {index} more than once", .path.display())]
    DuplicateIndex { path: PathBuf, index: i32 },
    #[error("{} declares negative solution index {index}", .path.display())]
    NegativeIndex { path: PathBuf, index: i32 },
}

impl CatalogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CatalogError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the device layer: runtime loading, code objects and launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    Unavailable { message: String },
    Call { op: &'static str, code: i32 },
    Device { message: String },
}

impl DeviceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        DeviceError::Unavailable {
            message: message.into(),
        }
    }

    pub fn call(op: &'static str, code: i32) -> Self {
        DeviceError::Call { op, code }
    }

    pub fn device(message: impl Into<String>) -> Self {
        DeviceError::Device {
            message: message.into(),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unavailable { message } => write!(f, "device runtime unavailable: {message}"),
            DeviceError::Call { op, code } => write!(f, "{op} failed with code {code}"),
            DeviceError::Device { message } => write!(f, "device failure: {message}"),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Convenience alias for results returned by platform and launcher routines.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Per-device initialization failures.
///
/// Cached in the device slot and handed to every later caller, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("no host platform has been installed")]
    NoPlatform,
    #[error("device query failed: {0}")]
    DeviceQuery(String),
    #[error("device {device} does not exist (device count {count})")]
    DeviceOutOfRange { device: usize, count: usize },
    #[error("could not load catalog for {arch}: {message}")]
    Catalog { arch: String, message: String },
    #[error("could not prepare kernel launcher for device {device}: {message}")]
    Launcher { device: usize, message: String },
    #[error("initialization of device {device} panicked: {message}")]
    Panicked { device: usize, message: String },
}

/// Failures of a single dispatch or enumeration call.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("solution index {0} is not a valid 1-based index")]
    InvalidIndex(i32),
    #[error("solution index {0} does not name a solution in the catalog")]
    UnresolvedIndex(i32),
    #[error("no solution found for {problem}")]
    NoSolution { problem: String },
    #[error("solution {index} ({name}) cannot solve {problem}")]
    Declined {
        index: i32,
        name: String,
        problem: String,
    },
    #[error("unknown enumeration option {0}")]
    InvalidOption(i32),
    #[error("required pointer `{0}` is null")]
    NullPointer(&'static str),
    #[error("workspace allocation of {requested} bytes failed")]
    Workspace { requested: usize },
    #[error(transparent)]
    Problem(#[from] ProblemError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error("kernel launch failed: {0}")]
    Launch(#[from] DeviceError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn status(&self) -> Status {
        match self {
            DispatchError::InvalidIndex(_)
            | DispatchError::UnresolvedIndex(_)
            | DispatchError::Declined { .. }
            | DispatchError::InvalidOption(_)
            | DispatchError::Problem(ProblemError::ScalarType { .. })
            | DispatchError::Problem(ProblemError::OperandType { .. }) => Status::InvalidValue,
            DispatchError::NoSolution { .. }
            | DispatchError::Problem(ProblemError::UnsupportedTypes { .. }) => {
                Status::NotImplemented
            }
            DispatchError::NullPointer(_) => Status::InvalidPointer,
            DispatchError::Workspace { .. } => Status::MemoryError,
            DispatchError::Init(_) | DispatchError::Launch(_) | DispatchError::Internal(_) => {
                Status::InternalError
            }
        }
    }
}

/// Convenience alias for dispatch results.
pub type DispatchResult<T> = Result<T, DispatchError>;
