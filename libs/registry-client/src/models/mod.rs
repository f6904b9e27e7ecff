//! API models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent status as stored by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Deployed,
    Running,
    Stopped,
    Error,
}

/// Agent creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    pub name: String,
    pub server_ip: String,
    pub username: String,
    pub repo_reference: String,
    pub port: u16,
    pub status: AgentStatus,
    pub is_active: bool,
}

/// Agent as returned by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub id: serde_json::Value,
    pub name: String,
    pub server_ip: String,
    pub username: String,
    pub repo_reference: String,
    pub port: u16,
    pub status: AgentStatus,
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}
