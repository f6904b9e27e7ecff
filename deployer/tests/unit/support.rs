//! Scripted stand-in for a remote host

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use deployer::deploy::orchestrator::{Deployer, DeployerOptions};
use deployer::deploy::transcript::Transcript;
use deployer::deploy::transport::{ConnectOptions, Connector, ExecOutput, Transport};
use deployer::errors::DeployerError;
use deployer::models::deployment::{AgentRecord, DeploymentConfig, DeploymentRequest};
use deployer::registry::AgentRegistry;
use serde_json::json;

pub const TARGET: &str = "/var/www/shop";

/// Canned answer for commands containing a pattern
#[derive(Debug, Clone)]
pub enum Reply {
    Stdout(String),
    Fail(i32, String),
    Timeout,
}

struct Rule {
    pattern: String,
    reply: Reply,
    /// Remaining matches; unlimited when `None`
    remaining: Option<usize>,
}

#[derive(Default)]
struct HostState {
    rules: Vec<Rule>,
    commands: Vec<String>,
    writes: Vec<(String, Vec<u8>)>,
    git_trees: HashSet<String>,
    /// Writes under this prefix are refused
    refused_writes: Option<String>,
    refuse_connections: bool,
    closes: usize,
}

/// In-memory host. Every command succeeds with empty output unless a rule
/// says otherwise; `git clone` leaves a working tree behind.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command containing `pattern` with `reply`. Earlier rules win.
    pub fn on(self, pattern: &str, reply: Reply) -> Self {
        self.rule(pattern, reply, None)
    }

    /// Fail the first `times` commands containing `pattern`, then fall through
    pub fn fail_times(self, pattern: &str, times: usize, stderr: &str) -> Self {
        self.rule(pattern, Reply::Fail(1, stderr.to_string()), Some(times))
    }

    fn rule(self, pattern: &str, reply: Reply, remaining: Option<usize>) -> Self {
        self.lock().rules.push(Rule {
            pattern: pattern.to_string(),
            reply,
            remaining,
        });
        self
    }

    pub fn fail(self, pattern: &str, stderr: &str) -> Self {
        self.on(pattern, Reply::Fail(1, stderr.to_string()))
    }

    pub fn without_sftp(self) -> Self {
        self.refuse_writes_under("")
    }

    pub fn refuse_writes_under(self, prefix: &str) -> Self {
        self.lock().refused_writes = Some(prefix.to_string());
        self
    }

    pub fn unreachable(self) -> Self {
        self.lock().refuse_connections = true;
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn ran(&self, fragment: &str) -> bool {
        self.commands().iter().any(|c| c.contains(fragment))
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(FakeConnector { host: self.clone() })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    fn answer(&self, command: &str) -> Reply {
        let mut state = self.lock();
        state.commands.push(command.to_string());

        let matched = state.rules.iter_mut().find(|rule| {
            command.contains(rule.pattern.as_str()) && rule.remaining != Some(0)
        });
        if let Some(rule) = matched {
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            return rule.reply.clone();
        }

        if command.starts_with("test -d") && command.contains("/.git") {
            let known = state.git_trees.iter().any(|dir| command.contains(dir.as_str()));
            return if known {
                Reply::Stdout(String::new())
            } else {
                Reply::Fail(1, String::new())
            };
        }

        if command.starts_with("git clone") {
            if let Some(dir) = last_quoted(command) {
                state.git_trees.insert(dir);
            }
        }

        Reply::Stdout(String::new())
    }
}

fn last_quoted(command: &str) -> Option<String> {
    command
        .trim_end()
        .strip_suffix('\'')?
        .rsplit('\'')
        .next()
        .map(str::to_string)
}

struct FakeConnector {
    host: FakeHost,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Transport>, DeployerError> {
        if self.host.lock().refuse_connections {
            return Err(DeployerError::Connection(format!(
                "{}:{} did not answer within {}s",
                options.host,
                options.port,
                options.connect_timeout.as_secs()
            )));
        }
        Ok(Box::new(self.host.clone()))
    }
}

#[async_trait]
impl Transport for FakeHost {
    async fn exec(
        &self,
        command: &str,
        _timeout: Duration,
        transcript: &Transcript,
    ) -> Result<ExecOutput, DeployerError> {
        let output = match self.answer(command) {
            Reply::Stdout(stdout) => ExecOutput {
                stdout,
                ..Default::default()
            },
            Reply::Fail(exit_code, stderr) => ExecOutput {
                exit_code,
                stderr,
                ..Default::default()
            },
            Reply::Timeout => ExecOutput {
                exit_code: -1,
                timed_out: true,
                ..Default::default()
            },
        };
        transcript.output("stdout", &output.stdout);
        transcript.output("stderr", &output.stderr);
        Ok(output)
    }

    async fn write_file(
        &self,
        remote_path: &str,
        content: &[u8],
        _timeout: Duration,
    ) -> Result<(), DeployerError> {
        let mut state = self.lock();
        let refused = state
            .refused_writes
            .as_deref()
            .is_some_and(|prefix| remote_path.starts_with(prefix));
        if refused {
            return Err(DeployerError::Transfer(format!(
                "SFTP subsystem refused {}",
                remote_path
            )));
        }
        state.writes.push((remote_path.to_string(), content.to_vec()));
        Ok(())
    }

    async fn close(&self) {
        self.lock().closes += 1;
    }
}

/// Registry keeping records in memory, or refusing them all
#[derive(Default)]
pub struct MemoryRegistry {
    pub records: Mutex<Vec<AgentRecord>>,
    pub refuse: bool,
    calls: AtomicUsize,
}

impl MemoryRegistry {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentRegistry for MemoryRegistry {
    async fn register(&self, record: &AgentRecord) -> Result<serde_json::Value, DeployerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(DeployerError::Registry("503 Service Unavailable".to_string()));
        }
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        Ok(json!({
            "id": records.len(),
            "name": record.name,
            "serverIp": record.server_ip,
            "port": record.port,
            "status": "deployed",
            "isActive": true,
        }))
    }
}

pub fn deployer(host: &FakeHost) -> Deployer {
    Deployer::new(host.connector(), DeployerOptions::default())
}

pub fn config(request: serde_json::Value) -> DeploymentConfig {
    let request: DeploymentRequest = serde_json::from_value(request).unwrap();
    DeploymentConfig::from_request(request, "/var/www/app", 22).unwrap()
}

pub fn git_config(env_content: Option<&str>) -> DeploymentConfig {
    config(json!({
        "serverIp": "10.0.0.5",
        "username": "deploy",
        "password": "s3cret",
        "targetPath": TARGET,
        "usePM2": true,
        "deploymentMode": "git",
        "repoUrl": "https://github.com/acme/shop.git",
        "envContent": env_content,
    }))
}

pub fn upload_config() -> DeploymentConfig {
    config(json!({
        "serverIp": "10.0.0.5",
        "username": "deploy",
        "password": "s3cret",
        "targetPath": TARGET,
        "usePM2": true,
        "deploymentMode": "upload",
        "uploadedFile": { "name": "app.zip", "contentBytes": "UEsDBBQAAAAIAA==" },
    }))
}

/// Position of the first entry containing `needle`
pub fn position(logs: &[String], needle: &str) -> Option<usize> {
    logs.iter().position(|entry| entry.contains(needle))
}

/// Transport that runs commands through the local `sh`, for shell snippets
/// whose behaviour depends on a real filesystem
pub struct LocalShell;

#[async_trait]
impl Transport for LocalShell {
    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        transcript: &Transcript,
    ) -> Result<ExecOutput, DeployerError> {
        let run = tokio::process::Command::new("sh").arg("-c").arg(command).output();
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => output?,
            Err(_) => {
                return Ok(ExecOutput {
                    exit_code: -1,
                    timed_out: true,
                    ..ExecOutput::default()
                })
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        transcript.output("stdout", &stdout);
        transcript.output("stderr", &stderr);
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn write_file(
        &self,
        remote_path: &str,
        content: &[u8],
        _timeout: Duration,
    ) -> Result<(), DeployerError> {
        tokio::fs::write(remote_path, content).await?;
        Ok(())
    }

    async fn close(&self) {}
}

/// Fresh directory under the system temp dir
pub fn scratch_dir(label: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "deployer-{}-{}",
        label,
        deployer::utils::generate_uuid()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
