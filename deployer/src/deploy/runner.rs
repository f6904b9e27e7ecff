//! Remote command runner

use std::time::Duration;

use crate::deploy::shell;
use crate::deploy::transcript::Transcript;
use crate::deploy::transport::Transport;
use crate::errors::DeployerError;

/// Runs single commands over a transport with a bounded wait.
///
/// No retries happen here; a failing command is reported once and the calling
/// phase decides what to try next.
#[derive(Clone)]
pub struct CommandRunner<'a> {
    transport: &'a dyn Transport,
    transcript: &'a Transcript,
    timeout: Duration,
    prelude: Option<String>,
}

impl<'a> CommandRunner<'a> {
    pub fn new(transport: &'a dyn Transport, transcript: &'a Transcript, timeout: Duration) -> Self {
        Self {
            transport,
            transcript,
            timeout,
            prelude: None,
        }
    }

    /// Same runner with a different per-command ceiling
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            ..self.clone()
        }
    }

    /// Same runner with a shell prelude prepended to every command
    pub fn with_prelude(&self, prelude: Option<String>) -> Self {
        Self {
            prelude,
            ..self.clone()
        }
    }

    pub fn transport(&self) -> &'a dyn Transport {
        self.transport
    }

    pub fn transcript(&self) -> &'a Transcript {
        self.transcript
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run a command and return its stdout
    pub async fn run(&self, command: &str) -> Result<String, DeployerError> {
        self.run_labeled(command, command).await
    }

    /// Run a command inside `dir`
    pub async fn run_in(&self, dir: &str, command: &str) -> Result<String, DeployerError> {
        self.run(&shell::in_dir(dir, command)).await
    }

    /// Run a command, recording `label` instead of the command text.
    ///
    /// Used for commands carrying payloads (file content, base64 chunks).
    pub async fn run_labeled(&self, command: &str, label: &str) -> Result<String, DeployerError> {
        self.transcript.info(format!("$ {}", label));

        let full_command = match &self.prelude {
            Some(prelude) => format!("{} {}", prelude, command),
            None => command.to_string(),
        };

        let output = self
            .transport
            .exec(&full_command, self.timeout, self.transcript)
            .await?;

        if output.timed_out {
            self.transcript.info(format!(
                "Command timed out after {}s",
                self.timeout.as_secs()
            ));
            return Err(DeployerError::CommandTimeout {
                command: label.to_string(),
                timeout_secs: self.timeout.as_secs(),
            });
        }

        if output.exit_code != 0 {
            self.transcript
                .info(format!("Command exited with code {}", output.exit_code));
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim()
            } else {
                output.stderr.trim()
            };
            return Err(DeployerError::Command {
                command: label.to_string(),
                exit_code: output.exit_code,
                stderr: tail(detail, 1024),
            });
        }

        Ok(output.stdout)
    }

    /// Ask a yes/no question of the host; failure is an answer, not an error
    pub async fn probe(&self, command: &str) -> bool {
        self.probe_output(command).await.is_some()
    }

    /// Like `probe`, returning trimmed stdout on success
    pub async fn probe_output(&self, command: &str) -> Option<String> {
        match self.run(command).await {
            Ok(stdout) => Some(stdout.trim().to_string()),
            Err(_) => None,
        }
    }
}

fn tail(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut start = text.len() - max_len;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
