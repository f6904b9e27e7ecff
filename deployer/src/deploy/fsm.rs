//! Finite State Machine for a deployment run

use serde::Serialize;

use crate::errors::DeployerError;

/// Pipeline stages, in the only order they may be entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    PrepareTarget,
    AcquireCode,
    UploadEnvironment,
    ProvisionRuntime,
    InstallDependencies,
    Build,
    Launch,
    Disconnect,
    PersistAgentRecord,
}

/// Whether a failure in the stage ends the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Mandatory,
    BestEffort,
}

/// How the orchestrator treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The run transitions to `Failed`
    Fatal,
    /// Logged as a warning; the run continues
    Recoverable,
}

/// Stage table
const STAGES: [(Stage, &str, StageKind); 10] = [
    (Stage::Connect, "Connect", StageKind::Mandatory),
    (Stage::PrepareTarget, "Prepare target path", StageKind::Mandatory),
    (Stage::AcquireCode, "Acquire code", StageKind::Mandatory),
    // optional, but required to succeed once there is content to upload
    (Stage::UploadEnvironment, "Upload environment", StageKind::Mandatory),
    (Stage::ProvisionRuntime, "Provision runtime", StageKind::Mandatory),
    (Stage::InstallDependencies, "Install dependencies", StageKind::Mandatory),
    (Stage::Build, "Build", StageKind::BestEffort),
    (Stage::Launch, "Supervise/Launch", StageKind::Mandatory),
    (Stage::Disconnect, "Disconnect", StageKind::BestEffort),
    (Stage::PersistAgentRecord, "Persist agent record", StageKind::BestEffort),
];

impl Stage {
    pub fn all() -> impl Iterator<Item = Stage> {
        STAGES.iter().map(|(stage, _, _)| *stage)
    }

    /// Human-readable name used in transcript entries
    pub fn label(self) -> &'static str {
        STAGES[self as usize].1
    }

    pub fn kind(self) -> StageKind {
        STAGES[self as usize].2
    }

    /// Stages entered after the run already reached a terminal state
    pub fn is_post_terminal(self) -> bool {
        self == Stage::PersistAgentRecord
    }
}

/// Classify a failure of `stage` from the stage table
pub fn classify(stage: Stage) -> StageOutcome {
    match stage.kind() {
        StageKind::Mandatory => StageOutcome::Fatal,
        StageKind::BestEffort => StageOutcome::Recoverable,
    }
}

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Nothing has run yet
    Pending,

    /// Working through a stage
    InStage(Stage),

    /// Every mandatory stage passed
    Succeeded,

    /// A mandatory stage failed
    Failed,
}

/// Deployment FSM
///
/// Stages may be skipped but never revisited. A fatal failure is remembered
/// while the remaining cleanup stages run; `finish` then settles the terminal
/// state.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
    failed_stage: Option<Stage>,
    history: Vec<Stage>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            error: None,
            failed_stage: None,
            history: Vec::new(),
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Verbatim text of the fatal error, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Stage being worked through, if any
    pub fn current_stage(&self) -> Option<Stage> {
        match self.state {
            DeploymentState::InStage(stage) => Some(stage),
            _ => None,
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.failed_stage
    }

    /// Stages entered so far, in order
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    pub fn is_failing(&self) -> bool {
        self.failed_stage.is_some()
    }

    /// Move forward to `stage`
    pub fn enter(&mut self, stage: Stage) -> Result<(), DeployerError> {
        let allowed = match self.state {
            DeploymentState::Pending => true,
            DeploymentState::InStage(current) => stage > current,
            DeploymentState::Succeeded => {
                stage.is_post_terminal() && !self.history.contains(&stage)
            }
            DeploymentState::Failed => false,
        };

        if !allowed {
            return Err(DeployerError::Internal(format!(
                "Invalid transition: {:?} -> {:?}",
                self.state, stage
            )));
        }

        self.history.push(stage);
        if !stage.is_post_terminal() {
            self.state = DeploymentState::InStage(stage);
        }
        Ok(())
    }

    /// Record a failure of the current stage and return how to treat it.
    ///
    /// Only the first fatal error is kept.
    pub fn record_failure(&mut self, stage: Stage, err: &DeployerError) -> StageOutcome {
        let outcome = classify(stage);
        if outcome == StageOutcome::Fatal && self.failed_stage.is_none() {
            self.failed_stage = Some(stage);
            self.error = Some(err.to_string());
        }
        outcome
    }

    /// Settle the terminal state once the pipeline stages are done
    pub fn finish(&mut self) -> DeploymentState {
        if matches!(self.state, DeploymentState::Pending | DeploymentState::InStage(_)) {
            self.state = if self.failed_stage.is_some() {
                DeploymentState::Failed
            } else {
                DeploymentState::Succeeded
            };
        }
        self.state
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
