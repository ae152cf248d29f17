//! Error types and handling
//!
//! The taxonomy is layered the same way the controller is. The engine client
//! classifies every failure into a [`DockerError`]; the build-context
//! assembler reports [`AssemblyError`]; the lifecycle controller wraps both
//! into [`VmError`] together with the operation and the derived name it was
//! acting on. [`CcvmError`] unifies them for callers that do not care which
//! layer failed.

use std::fmt;
use thiserror::Error;

/// Engine object kinds that can be reported missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Container,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file parsing error
    #[error("Failed to parse configuration file: {message}")]
    Parsing { message: String },

    /// Configuration validation error
    #[error("Configuration validation error: {message}")]
    Validation { message: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: String },
}

/// Errors reported by the container engine client
///
/// Only the existence signals are distinguished; everything else the engine
/// says is carried verbatim in [`DockerError::Engine`].
#[derive(Error, Debug)]
pub enum DockerError {
    /// The engine reported that the image or container does not exist
    #[error("No such {kind}: {id}")]
    NotFound { kind: ResourceKind, id: String },

    /// A container with the requested name already exists
    #[error("Container already exists: {id}")]
    AlreadyExists { id: String },

    /// The container exists but is not running
    #[error("Container is not running: {id}")]
    NotRunning { id: String },

    /// The engine cannot be reached at all
    #[error("Container engine unavailable: {message}")]
    Unavailable { message: String },

    /// Any other engine failure
    #[error("{operation} failed: {message}")]
    Engine { operation: String, message: String },
}

impl DockerError {
    /// Shorthand for an opaque engine failure
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True when the engine said the image does not exist
    pub fn is_no_such_image(&self) -> bool {
        matches!(
            self,
            Self::NotFound {
                kind: ResourceKind::Image,
                ..
            }
        )
    }

    /// True when the engine said the container does not exist
    pub fn is_no_such_container(&self) -> bool {
        matches!(
            self,
            Self::NotFound {
                kind: ResourceKind::Container,
                ..
            }
        )
    }
}

/// Build-context assembly errors
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// The code package has no content
    #[error("Code package is empty")]
    Empty,

    /// The code package exceeds the configured ceiling
    #[error("Code package is {size} bytes, exceeding the limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    /// The code package is not a readable gzipped tar
    #[error("Code package is unreadable: {message}")]
    Unreadable { message: String },

    /// The chaincode identity cannot be written into a Dockerfile
    #[error("Chaincode {field} {value:?} contains control characters")]
    InvalidIdentity { field: &'static str, value: String },

    /// The package belongs to a different chaincode than the one deployed
    #[error("Code package is for {actual}, not {expected}")]
    IdentityMismatch { expected: String, actual: String },

    /// I/O failure while writing the archive
    #[error("Failed to write build archive")]
    Io(#[from] std::io::Error),
}

/// Lifecycle controller errors
///
/// Every variant names the derived image or container it was acting on.
#[derive(Error, Debug)]
pub enum VmError {
    /// The code package could not be turned into a build archive
    #[error("Failed to assemble build context for {name}: {source}")]
    Assembly {
        name: String,
        #[source]
        source: AssemblyError,
    },

    /// Image construction failed
    #[error("Failed to build image {image}: {source}")]
    Build {
        image: String,
        #[source]
        source: DockerError,
    },

    /// Container create, attach or start failed
    #[error("Failed to {operation} container {container}: {source}")]
    Start {
        operation: &'static str,
        container: String,
        #[source]
        source: DockerError,
    },

    /// The image is missing and could not be rebuilt
    #[error("Image {image} is unavailable{}", rebuild_suffix(.rebuilt))]
    ImageUnavailable { image: String, rebuilt: bool },

    /// Auxiliary file transfer failed
    #[error("Failed to upload files to container {container}: {source}")]
    Upload {
        container: String,
        #[source]
        source: DockerError,
    },

    /// Graceful stop failed
    #[error("Failed to stop container {container}: {source}")]
    Stop {
        container: String,
        #[source]
        source: DockerError,
    },

    /// Forced kill failed
    #[error("Failed to kill container {container}: {source}")]
    Kill {
        container: String,
        #[source]
        source: DockerError,
    },

    /// Container removal failed
    #[error("Failed to remove container {container}: {source}")]
    Remove {
        container: String,
        #[source]
        source: DockerError,
    },

    /// One or more requested stop sub-steps failed
    #[error("Stop of container {container} incomplete: {}", join_failures(.failures))]
    StopIncomplete {
        container: String,
        failures: Vec<VmError>,
    },

    /// Image removal failed
    #[error("Failed to remove image {image}: {source}")]
    Destroy {
        image: String,
        #[source]
        source: DockerError,
    },

    /// The engine could not be reached
    #[error("Container engine unavailable during {operation} of {name}: {source}")]
    EngineUnavailable {
        operation: &'static str,
        name: String,
        #[source]
        source: DockerError,
    },

    /// The derived name is not a valid engine repository name
    #[error("Invalid derived name {name}: {reason}")]
    InvalidName { name: String, reason: String },
}

fn rebuild_suffix(rebuilt: &bool) -> &'static str {
    if *rebuilt {
        " after rebuild"
    } else {
        ""
    }
}

fn join_failures(failures: &[VmError]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl VmError {
    /// Sub-step failures of a Stop call, or just this error otherwise
    pub fn failures(&self) -> Vec<&VmError> {
        match self {
            Self::StopIncomplete { failures, .. } => failures.iter().collect(),
            other => vec![other],
        }
    }
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum CcvmError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Engine client errors
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// Build-context errors
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    /// Lifecycle controller errors
    #[error("Chaincode VM error: {0}")]
    Vm(#[from] VmError),
}

/// Convenience type alias for Results with CcvmError
pub type Result<T> = std::result::Result<T, CcvmError>;
