use thiserror::Error;

/// Unified error type for `transplant_policy` operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Raised when a supplied value falls outside the domain of its field.
    #[error("invalid value for {field}: {reason}")]
    InvalidInput {
        /// Field or option that rejected the value.
        field: &'static str,
        /// Human-readable explanation of the rejection.
        reason: String,
    },

    /// Raised when a term refers to a variable outside the allowed set.
    #[error("variable `{name}` is not one of the allowed variables")]
    UnknownVariable { name: String },

    /// Raised when an update targets a row that does not exist.
    #[error("term index {index} is out of range for a table of {len} terms")]
    IndexOutOfRange { index: usize, len: usize },

    /// Raised when a simulation names a policy missing from the catalog.
    #[error("policy `{name}` is not in the catalog")]
    UnknownPolicy { name: String },

    /// Raised when a policy does not declare the requested algorithm.
    #[error("policy `{policy}` has no algorithm `{algorithm}`")]
    UnknownAlgorithm { policy: String, algorithm: String },

    /// Raised when an external catalog cannot be read or parsed.
    #[error("failed to load policy catalog: {0}")]
    Config(String),

    /// Raised when the simulation engine reports a failure.
    #[error("simulation engine failed: {reason}")]
    Engine { reason: String },

    /// Raised when a simulation is cancelled before it completes.
    #[error("simulation cancelled after {completed_batches} of {total_batches} batches")]
    Cancelled {
        completed_batches: usize,
        total_batches: usize,
    },

    /// Raised when the worker thread exits without reporting a result.
    #[error("simulation worker exited without a result")]
    WorkerDisconnected,
}

impl PolicyError {
    /// Helper to format an [`InvalidInput`](PolicyError::InvalidInput) error.
    pub fn invalid_input<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self::InvalidInput {
            field,
            reason: reason.into(),
        }
    }

    /// Helper for engines that fail a replicate.
    pub fn engine<S: Into<String>>(reason: S) -> Self {
        Self::Engine {
            reason: reason.into(),
        }
    }

    /// Whether the error belongs to the input-validation class that leaves
    /// builder state untouched.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::UnknownVariable { .. } | Self::IndexOutOfRange { .. }
        )
    }
}

impl From<serde_yaml::Error> for PolicyError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<std::io::Error> for PolicyError {
    fn from(value: std::io::Error) -> Self {
        Self::Config(value.to_string())
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, PolicyError>;
