//! Agent registry write-back

use async_trait::async_trait;

use crate::errors::DeployerError;
use crate::models::deployment::AgentRecord;

/// Persistent store of deployed agents.
///
/// Written at most once per successful run; the deployment result carries
/// whatever the store returns as `agentRecord`.
#[async_trait]
pub trait AgentRegistry: Send + Sync {
    async fn register(&self, record: &AgentRecord) -> Result<serde_json::Value, DeployerError>;
}
