//! Agent registry API client

use async_trait::async_trait;
use registry_client::models::{AgentInfo, AgentStatus, CreateAgentRequest};
use tracing::info;

use crate::errors::DeployerError;
use crate::http::client::HttpClient;
use crate::models::deployment::AgentRecord;
use crate::registry::AgentRegistry;

impl From<&AgentRecord> for CreateAgentRequest {
    fn from(record: &AgentRecord) -> Self {
        Self {
            name: record.name.clone(),
            server_ip: record.server_ip.clone(),
            username: record.username.clone(),
            repo_reference: record.repo_reference.clone(),
            port: record.port,
            status: AgentStatus::Deployed,
            is_active: true,
        }
    }
}

#[async_trait]
impl AgentRegistry for HttpClient {
    async fn register(&self, record: &AgentRecord) -> Result<serde_json::Value, DeployerError> {
        info!("Registering agent {} on {}", record.name, record.server_ip);
        let request = CreateAgentRequest::from(record);
        let created: AgentInfo = self.post("/agents", &request).await.map_err(|e| match e {
            DeployerError::Http(e) => DeployerError::Registry(e.to_string()),
            other => other,
        })?;
        info!("Agent registered with id {}", created.id);
        Ok(serde_json::to_value(&created)?)
    }
}
