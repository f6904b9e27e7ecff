//! Deployment orchestrator

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::deploy::archive;
use crate::deploy::build::{self, BuildOutcome};
use crate::deploy::fsm::{DeploymentFsm, DeploymentState, Stage, StageOutcome};
use crate::deploy::git::{self, GitSync};
use crate::deploy::provision;
use crate::deploy::runner::CommandRunner;
use crate::deploy::shell::{self, quote};
use crate::deploy::supervisor::{self, LaunchMode};
use crate::deploy::transcript::Transcript;
use crate::deploy::transfer::{self, Encoding};
use crate::deploy::transport::{ConnectOptions, Connector, Transport};
use crate::errors::DeployerError;
use crate::models::deployment::{AgentRecord, CodeSource, DeploymentConfig, DeploymentResult};
use crate::registry::AgentRegistry;
use crate::storage::settings::Settings;

/// Tunables applied to every run
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    pub connect_timeout: Duration,
    pub keepalive: Duration,
    /// Ceiling for ordinary commands and file writes
    pub command_timeout: Duration,
    /// Ceiling for clones, extraction, installs and builds
    pub long_command_timeout: Duration,
    /// Port recorded when the environment declares none
    pub default_app_port: u16,
    pub node_major: u32,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl DeployerOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.timeouts.connect(),
            keepalive: settings.timeouts.keepalive(),
            command_timeout: settings.timeouts.command(),
            long_command_timeout: settings.timeouts.long_command(),
            default_app_port: settings.defaults.app_port,
            node_major: settings.defaults.node_major,
        }
    }
}

/// Runs deployments end to end.
///
/// Each call to [`Deployer::deploy`] owns its own session and transcript, so
/// one `Deployer` can serve concurrent runs against different hosts.
pub struct Deployer {
    connector: Arc<dyn Connector>,
    registry: Option<Arc<dyn AgentRegistry>>,
    options: DeployerOptions,
}

impl Deployer {
    pub fn new(connector: Arc<dyn Connector>, options: DeployerOptions) -> Self {
        Self {
            connector,
            registry: None,
            options,
        }
    }

    /// Persist successful deployments to `registry`
    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn options(&self) -> &DeployerOptions {
        &self.options
    }

    /// Deploy `config` and report the outcome. Never fails: every error ends
    /// up in the returned result.
    pub async fn deploy(&self, config: &DeploymentConfig) -> DeploymentResult {
        let transcript = Transcript::new();
        let mut fsm = DeploymentFsm::new();
        let mut warnings = Vec::new();

        info!(
            "Deploying {} to {}@{}:{}",
            config.source.reference(),
            config.username,
            config.host,
            config.target_path
        );
        transcript.info(format!(
            "Starting deployment of {} to {}@{}:{}",
            config.source.reference(),
            config.username,
            config.host,
            config.target_path
        ));

        let mut failure = None;
        let session = match enter_stage(&mut fsm, &transcript, Stage::Connect) {
            Err(e) => {
                failure = Some(e);
                None
            }
            Ok(()) => match self.connector.connect(&self.connect_options(config)).await {
                Ok(session) => {
                    transcript.info(format!(
                        "Connected to {}:{} as {}",
                        config.host, config.port, config.username
                    ));
                    Some(session)
                }
                Err(e) => {
                    fsm.record_failure(Stage::Connect, &e);
                    failure = Some(e);
                    None
                }
            },
        };

        if let Some(session) = &session {
            let pipeline = self
                .run_pipeline(session.as_ref(), config, &mut fsm, &transcript, &mut warnings)
                .await;
            if let Err(e) = pipeline {
                let stage = fsm.current_stage().unwrap_or(Stage::Connect);
                fsm.record_failure(stage, &e);
                failure = Some(e);
            }
        }

        if let Err(e) = enter_stage(&mut fsm, &transcript, Stage::Disconnect) {
            error!("{}", e);
        }
        match &session {
            Some(session) => {
                session.close().await;
                transcript.info("Session closed");
            }
            None => transcript.info("No open session to close"),
        }

        match (fsm.finish(), failure) {
            (DeploymentState::Succeeded, _) => {
                let agent_record = self
                    .persist_agent_record(config, &mut fsm, &transcript, &mut warnings)
                    .await;
                let message = success_message(&warnings);
                transcript.info(&message);
                DeploymentResult {
                    success: true,
                    message,
                    logs: transcript.entries(),
                    error: None,
                    agent_record,
                }
            }
            (_, failure) => {
                let failure = failure.unwrap_or_else(|| {
                    DeployerError::Internal("deployment failed without an error".to_string())
                });
                let stage = fsm.failed_stage().unwrap_or(Stage::Connect);
                let message = format!("Deployment failed at {}: {}", stage.label(), failure);
                transcript.error(&message);
                DeploymentResult {
                    success: false,
                    message,
                    logs: transcript.entries(),
                    error: Some(format!("{}: {}", failure.kind(), failure)),
                    agent_record: None,
                }
            }
        }
    }

    fn connect_options(&self, config: &DeploymentConfig) -> ConnectOptions {
        ConnectOptions {
            host: config.host.clone(),
            port: config.port,
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: self.options.connect_timeout,
            keepalive: self.options.keepalive,
        }
    }

    /// Every stage between Connect and Disconnect. A returned error belongs
    /// to the stage the FSM is in; best-effort failures are handled here.
    async fn run_pipeline(
        &self,
        transport: &dyn Transport,
        config: &DeploymentConfig,
        fsm: &mut DeploymentFsm,
        transcript: &Transcript,
        warnings: &mut Vec<String>,
    ) -> Result<(), DeployerError> {
        let target = config.target_path.as_str();
        let runner = CommandRunner::new(transport, transcript, self.options.command_timeout);
        let long_runner = runner.with_timeout(self.options.long_command_timeout);

        enter_stage(fsm, transcript, Stage::PrepareTarget)?;
        let mkdir = shell::privileged(&format!(
            "mkdir -p {dir} || {{ $SUDO mkdir -p {dir} && $SUDO chown \"$(id -u):$(id -g)\" {dir}; }}",
            dir = quote(target)
        ));
        runner.run(&mkdir).await?;

        enter_stage(fsm, transcript, Stage::AcquireCode)?;
        match &config.source {
            CodeSource::Git { repo_url, branch } => {
                let sync =
                    git::sync_repository(&long_runner, repo_url, branch.as_deref(), target).await?;
                transcript.info(match sync {
                    GitSync::Cloned => "Code acquired by fresh clone",
                    GitSync::Pulled => "Code acquired by pulling the existing clone",
                });
            }
            CodeSource::Upload {
                file_name,
                file_bytes,
            } => {
                let tool = archive::deploy_archive(&long_runner, file_name, file_bytes, target).await?;
                transcript.info(format!("Code acquired from {} using {}", file_name, tool));
            }
        }

        enter_stage(fsm, transcript, Stage::UploadEnvironment)?;
        match config.env_file() {
            None => transcript.info("Upload environment skipped: no environment content provided"),
            Some(content) => {
                let env_path = format!("{}/.env", target);
                let mechanism = transfer::upload_with_fallback(
                    &runner,
                    content.as_bytes(),
                    &env_path,
                    Encoding::Text,
                )
                .await?;
                transcript.info(format!("Environment written to {} via {}", env_path, mechanism));
            }
        }

        enter_stage(fsm, transcript, Stage::ProvisionRuntime)?;
        let runtime = provision::ensure_runtime(&long_runner, self.options.node_major).await?;
        if let Some(strategy) = &runtime.installed_with {
            transcript.info(format!("Runtime installed via {}", strategy));
        }
        let long_runner = long_runner.with_prelude(runtime.prelude);

        enter_stage(fsm, transcript, Stage::InstallDependencies)?;
        long_runner
            .run_in(target, "npm install --no-audit --no-fund")
            .await?;
        transcript.info("Dependencies installed");

        enter_stage(fsm, transcript, Stage::Build)?;
        match build::build_project(&long_runner, target).await {
            BuildOutcome::Built(strategy) => {
                transcript.info(format!("Project built with {}", strategy))
            }
            BuildOutcome::Skipped => {}
            BuildOutcome::Failed(e) => {
                if fsm.record_failure(Stage::Build, &e) == StageOutcome::Fatal {
                    return Err(e);
                }
                transcript.warn(format!("Build failed, continuing without a build: {}", e));
                warnings.push(format!("build failed ({})", e));
            }
        }

        enter_stage(fsm, transcript, Stage::Launch)?;
        let name = config.app_name();
        let mode = supervisor::launch(&long_runner, target, &name, config.use_supervisor).await?;
        if config.use_supervisor && mode == LaunchMode::Detached {
            warnings.push("pm2 unavailable, application runs as a detached process".to_string());
        }
        transcript.info(match mode {
            LaunchMode::Supervised => "Application running under pm2",
            LaunchMode::Detached => "Application running as a detached process",
        });
        Ok(())
    }

    async fn persist_agent_record(
        &self,
        config: &DeploymentConfig,
        fsm: &mut DeploymentFsm,
        transcript: &Transcript,
        warnings: &mut Vec<String>,
    ) -> Option<serde_json::Value> {
        if let Err(e) = enter_stage(fsm, transcript, Stage::PersistAgentRecord) {
            error!("{}", e);
            return None;
        }

        let Some(registry) = &self.registry else {
            transcript.info("Persist agent record skipped: no agent registry configured");
            return None;
        };

        let record = AgentRecord {
            name: config.app_name(),
            server_ip: config.host.clone(),
            username: config.username.clone(),
            repo_reference: config.source.reference().to_string(),
            port: config.declared_port().unwrap_or(self.options.default_app_port),
        };

        match registry.register(&record).await {
            Ok(saved) => {
                transcript.info(format!("Agent record persisted for {}", record.name));
                Some(saved)
            }
            Err(e) => {
                fsm.record_failure(Stage::PersistAgentRecord, &e);
                transcript.warn(format!("Could not persist the agent record: {}", e));
                warnings.push(format!("agent record not persisted ({})", e));
                None
            }
        }
    }
}

fn enter_stage(
    fsm: &mut DeploymentFsm,
    transcript: &Transcript,
    stage: Stage,
) -> Result<(), DeployerError> {
    fsm.enter(stage)?;
    transcript.info(format!("Stage: {}", stage.label()));
    Ok(())
}

fn success_message(warnings: &[String]) -> String {
    if warnings.is_empty() {
        "Deployment completed successfully".to_string()
    } else {
        format!(
            "Deployment completed successfully with warnings: {}",
            warnings.join("; ")
        )
    }
}
