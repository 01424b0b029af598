//! Error types for CLI operations.

use contracts::ContractError;
use dispatcher::DispatcherError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// A flag value the pipeline cannot use
    #[error("Invalid value for --{flag}: {message}")]
    InvalidArgument { flag: &'static str, message: String },

    /// Effective configuration failed validation
    #[error("Configuration validation failed: {0}")]
    Config(#[from] ContractError),

    /// Hub or sink construction failed
    #[error("Failed to build dispatch hub: {0}")]
    Hub(#[from] DispatcherError),

    /// Traffic driver failed
    #[error("Simulation failed: {message}")]
    Simulation { message: String },
}

impl CliError {
    pub fn invalid_argument(flag: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            flag,
            message: message.into(),
        }
    }

    pub fn simulation(message: impl Into<String>) -> Self {
        Self::Simulation {
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
