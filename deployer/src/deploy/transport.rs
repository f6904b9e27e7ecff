//! Remote session transport seam

use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::deploy::transcript::Transcript;
use crate::errors::DeployerError;

/// Parameters for opening one authenticated session
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub connect_timeout: Duration,
    pub keepalive: Duration,
}

/// Raw outcome of one remote command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Opens sessions against a remote host
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate within `options.connect_timeout`
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Transport>, DeployerError>;
}

/// One live authenticated session
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a command, streaming output into the transcript as it arrives.
    ///
    /// Exceeding `timeout` is reported through `ExecOutput::timed_out`, not
    /// as an error. Errors are reserved for a broken channel.
    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        transcript: &Transcript,
    ) -> Result<ExecOutput, DeployerError>;

    /// Write `content` to `remote_path`, replacing any existing file
    async fn write_file(
        &self,
        remote_path: &str,
        content: &[u8],
        timeout: Duration,
    ) -> Result<(), DeployerError>;

    /// Tear the session down. Safe to call more than once.
    async fn close(&self);
}
