//! Error types for the deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Command `{command}` failed with exit code {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command `{command}` timed out after {timeout_secs}s")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Provisioning error: {0}")]
    Provisioning(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Supervisor unavailable: {0}")]
    SupervisorUnavailable(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Taxonomy name surfaced in deployment results
    pub fn kind(&self) -> &'static str {
        match self {
            DeployerError::Connection(_) => "ConnectionError",
            DeployerError::Command { .. } | DeployerError::CommandTimeout { .. } => "CommandError",
            DeployerError::Transfer(_) => "TransferError",
            DeployerError::Extraction(_) => "ExtractionError",
            DeployerError::Provisioning(_) => "ProvisioningError",
            DeployerError::Build(_) => "BuildError",
            DeployerError::SupervisorUnavailable(_) => "SupervisorError",
            DeployerError::Registry(_) | DeployerError::Http(_) => "RegistryError",
            DeployerError::Config(_) | DeployerError::Validation(_) => "ConfigError",
            DeployerError::Io(_) | DeployerError::Json(_) | DeployerError::Internal(_) => {
                "InternalError"
            }
        }
    }

    /// Whether the error is a command ceiling being exceeded
    pub fn is_timeout(&self) -> bool {
        matches!(self, DeployerError::CommandTimeout { .. })
    }
}

impl From<anyhow::Error> for DeployerError {
    fn from(err: anyhow::Error) -> Self {
        DeployerError::Internal(err.to_string())
    }
}
