//! Error types for the process supervisor.

use thiserror::Error;

/// Errors that prevent an encode from starting or being observed.
///
/// A subprocess that runs and exits non-zero is not an error here; it is
/// reported through [`super::EncodeExit`].
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The encoder program could not be found.
    #[error("Encoder program not found: {program}")]
    ProgramNotFound { program: String },

    /// No command profile is configured for the variant.
    #[error("No encode profile for variant '{0}'")]
    UnknownVariant(String),

    /// The media probe failed.
    #[error("Failed to probe media file: {reason}")]
    ProbeFailed { reason: String },

    /// The process registry could not be persisted.
    #[error("Process registry error: {0}")]
    Registry(String),

    /// I/O error while spawning or waiting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn probe_failed(reason: impl Into<String>) -> Self {
        Self::ProbeFailed {
            reason: reason.into(),
        }
    }

    /// Map a spawn failure, recognising a missing program.
    pub(crate) fn spawn_failed(program: &str, e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            Self::ProgramNotFound {
                program: program.to_string(),
            }
        } else {
            Self::Io(e)
        }
    }
}
