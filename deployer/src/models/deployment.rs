//! Deployment models

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::DeployerError;

/// Deployment request as collected by the inbound request layer
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub server_ip: String,

    #[serde(default)]
    pub port: Option<u16>,

    pub username: String,

    pub password: SecretString,

    #[serde(default)]
    pub target_path: Option<String>,

    #[serde(default, rename = "usePM2", alias = "usePm2")]
    pub use_pm2: bool,

    pub deployment_mode: DeploymentMode,

    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub uploaded_file: Option<UploadedFile>,

    #[serde(default)]
    pub env_content: Option<String>,
}

/// Code source discriminator on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Git,
    Upload,
}

/// Uploaded archive; bytes travel base64-encoded in JSON
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub name: String,

    #[serde(default, with = "base64_bytes")]
    pub content_bytes: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}

/// Where the application source comes from
#[derive(Debug, Clone)]
pub enum CodeSource {
    Git {
        repo_url: String,
        branch: Option<String>,
    },
    Upload {
        file_name: String,
        file_bytes: Vec<u8>,
    },
}

impl CodeSource {
    /// Reference stored in the agent registry
    pub fn reference(&self) -> &str {
        match self {
            CodeSource::Git { repo_url, .. } => repo_url,
            CodeSource::Upload { file_name, .. } => file_name,
        }
    }
}

/// Validated, immutable input for one deployment run
#[derive(Debug)]
pub struct DeploymentConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub target_path: String,
    pub source: CodeSource,
    pub env_content: Option<String>,
    pub use_supervisor: bool,
}

impl DeploymentConfig {
    /// Build a config from an inbound request, filling defaults
    pub fn from_request(
        request: DeploymentRequest,
        default_target_path: &str,
        default_ssh_port: u16,
    ) -> Result<Self, DeployerError> {
        let source = match request.deployment_mode {
            DeploymentMode::Git => {
                let repo_url = request
                    .repo_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        DeployerError::Validation("repoUrl is required for git mode".to_string())
                    })?;
                CodeSource::Git {
                    repo_url,
                    branch: request.branch.filter(|b| !b.trim().is_empty()),
                }
            }
            DeploymentMode::Upload => {
                let file = request.uploaded_file.ok_or_else(|| {
                    DeployerError::Validation(
                        "uploadedFile is required for upload mode".to_string(),
                    )
                })?;
                CodeSource::Upload {
                    file_name: file.name,
                    file_bytes: file.content_bytes,
                }
            }
        };

        let target_path = request
            .target_path
            .map(|p| p.trim().trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| default_target_path.to_string());

        Ok(Self {
            host: request.server_ip,
            port: request.port.unwrap_or(default_ssh_port),
            username: request.username,
            password: request.password,
            target_path,
            source,
            env_content: request.env_content,
            use_supervisor: request.use_pm2,
        })
    }

    /// Supervisor instance name: basename of the target path
    pub fn app_name(&self) -> String {
        self.target_path
            .trim_end_matches('/')
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("app")
            .to_string()
    }

    /// Environment file content, `None` when absent or blank
    pub fn env_file(&self) -> Option<&str> {
        self.env_content
            .as_deref()
            .filter(|content| !content.trim().is_empty())
    }

    /// Application port declared in the environment content
    pub fn declared_port(&self) -> Option<u16> {
        self.env_file()?.lines().find_map(|line| {
            let line = line.trim().trim_start_matches("export ");
            let (key, value) = line.split_once('=')?;
            if key.trim() != "PORT" {
                return None;
            }
            value.trim().trim_matches(|c| c == '"' || c == '\'').parse().ok()
        })
    }
}

/// Identity of a deployed application, written to the agent registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub name: String,
    pub server_ip: String,
    pub username: String,
    pub repo_reference: String,
    pub port: u16,
}

/// Final outcome of a deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub success: bool,

    pub message: String,

    pub logs: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_record: Option<serde_json::Value>,
}
