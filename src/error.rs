//! Error types.
//!
//! Two layers:
//!
//! - [`HazardError`]: typed failures raised by the tree parser, the resolver,
//!   the scheduler/aggregator protocol and the statistics engine
//! - [`AppError`]: what the binary reports (message + process exit code)
//!
//! Exit codes:
//! - `2`: invalid input (tree, catalog, job file, sampling/quantile settings)
//! - `3`: nothing to compute (empty tree paths, no finalized realizations)
//! - `4`: runtime failure (worker, transport, progress invariant, export)

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, HazardError>;

/// Failures raised by the hazard core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HazardError {
    /// The logic tree is structurally invalid.
    #[error("invalid logic tree '{source_name}' at {context}: {message}")]
    Validation {
        source_name: String,
        context: String,
        message: String,
    },

    /// Invalid sampling parameters.
    #[error("invalid sampling configuration: {0}")]
    SamplingConfig(String),

    /// A reached level has no branch set applicable to the current path.
    #[error("no applicable branch set on level {level} below branch '{parent}'")]
    EmptyTree { level: usize, parent: String },

    /// Duplicate or excess completion for a realization.
    #[error(
        "progress overrun for realization {realization}: {completed} + {increment} exceeds total {total}{}",
        completion_note(.already_complete)
    )]
    ProgressOverrun {
        realization: usize,
        completed: usize,
        increment: usize,
        total: usize,
        already_complete: bool,
    },

    /// A work unit failed to compute.
    #[error("worker failed on realization {realization}: {message}")]
    Worker { realization: usize, message: String },

    /// The transport lost its completion channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// Statistics requested without any finalized realization.
    #[error("no finalized realizations to compute statistics from")]
    EmptyInput,

    /// Quantile outside `[0, 1]`.
    #[error("invalid quantile {0}: must lie in [0, 1]")]
    InvalidQuantile(f64),
}

fn completion_note(already_complete: &bool) -> &'static str {
    if *already_complete {
        " (realization already complete)"
    } else {
        ""
    }
}

impl HazardError {
    /// Create a validation error.
    pub fn validation(
        source_name: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            source_name: source_name.into(),
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a worker error.
    pub fn worker(realization: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            realization,
            message: message.into(),
        }
    }

    /// Process exit code used when this error reaches the binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation { .. } | Self::SamplingConfig(_) | Self::InvalidQuantile(_) => 2,
            Self::EmptyTree { .. } | Self::EmptyInput => 3,
            Self::ProgressOverrun { .. } | Self::Worker { .. } | Self::Transport(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<HazardError> for AppError {
    fn from(err: HazardError) -> Self {
        Self::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
