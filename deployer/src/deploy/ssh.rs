//! SSH transport backed by libssh2
//!
//! libssh2 is blocking, so every call runs on the blocking pool. Commands are
//! polled in non-blocking mode so output can be streamed and the per-command
//! ceiling enforced without killing the session.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::{OpenFlags, OpenType, Session};
use tracing::{debug, warn};

use crate::deploy::transcript::{OutputLines, Transcript};
use crate::deploy::transport::{ConnectOptions, Connector, ExecOutput, Transport};
use crate::errors::DeployerError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Connector opening password-authenticated SSH sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector;

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn Transport>, DeployerError> {
        let ceiling = options.connect_timeout;
        let opts = options.clone();
        let handle = tokio::task::spawn_blocking(move || connect_session(&opts));

        // The blocking side carries its own socket timeouts; this bounds the
        // caller's wait even if name resolution stalls. A session finished
        // after the deadline is dropped with the task, closing its socket.
        let session = match tokio::time::timeout(ceiling, handle).await {
            Ok(joined) => joined
                .map_err(|e| DeployerError::Internal(format!("SSH connect task failed: {}", e)))??,
            Err(_) => {
                return Err(DeployerError::Connection(format!(
                    "Timed out connecting to {}:{} after {}s",
                    options.host,
                    options.port,
                    ceiling.as_secs()
                )))
            }
        };

        Ok(Box::new(SshTransport::new(session)))
    }
}

fn connect_session(opts: &ConnectOptions) -> Result<Session, DeployerError> {
    let addr = (opts.host.as_str(), opts.port)
        .to_socket_addrs()
        .map_err(|e| DeployerError::Connection(format!("Cannot resolve {}: {}", opts.host, e)))?
        .next()
        .ok_or_else(|| DeployerError::Connection(format!("No address for {}", opts.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, opts.connect_timeout).map_err(|e| {
        DeployerError::Connection(format!("Failed to reach {}: {}", addr, e))
    })?;
    tcp.set_read_timeout(Some(opts.connect_timeout)).ok();
    tcp.set_write_timeout(Some(opts.connect_timeout)).ok();
    let socket = tcp
        .try_clone()
        .map_err(|e| DeployerError::Connection(format!("Socket setup failed: {}", e)))?;

    let mut session = Session::new()
        .map_err(|e| DeployerError::Connection(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(millis(opts.connect_timeout));
    session
        .handshake()
        .map_err(|e| DeployerError::Connection(format!("SSH handshake failed: {}", e)))?;

    session
        .userauth_password(&opts.username, opts.password.expose_secret())
        .map_err(|e| {
            DeployerError::Connection(format!(
                "Authentication failed for {}@{}: {}",
                opts.username, opts.host, e
            ))
        })?;
    if !session.authenticated() {
        return Err(DeployerError::Connection("SSH authentication failed".to_string()));
    }

    // Long-running commands must not trip the handshake ceiling.
    session.set_timeout(0);
    socket.set_read_timeout(None).ok();
    socket.set_write_timeout(None).ok();
    session.set_keepalive(true, opts.keepalive.as_secs().max(1) as u32);

    debug!("SSH session established with {}", addr);
    Ok(session)
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

/// Live SSH session
pub struct SshTransport {
    session: Arc<Mutex<Option<Session>>>,
}

impl SshTransport {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn session(&self) -> Result<Session, DeployerError> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| DeployerError::Connection("SSH session is closed".to_string()))
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn exec(
        &self,
        command: &str,
        timeout: Duration,
        transcript: &Transcript,
    ) -> Result<ExecOutput, DeployerError> {
        let session = self.session()?;
        let command = command.to_string();
        let transcript = transcript.clone();

        tokio::task::spawn_blocking(move || exec_blocking(&session, &command, timeout, &transcript))
            .await
            .map_err(|e| DeployerError::Internal(format!("SSH exec task failed: {}", e)))?
    }

    async fn write_file(
        &self,
        remote_path: &str,
        content: &[u8],
        timeout: Duration,
    ) -> Result<(), DeployerError> {
        let session = self.session()?;
        let remote_path = remote_path.to_string();
        let content = content.to_vec();

        tokio::task::spawn_blocking(move || {
            session.set_timeout(millis(timeout));
            let result = sftp_write(&session, &remote_path, &content);
            session.set_timeout(0);
            result
        })
        .await
        .map_err(|e| DeployerError::Internal(format!("SFTP task failed: {}", e)))?
    }

    async fn close(&self) {
        let taken = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(session) = taken {
            let _ = tokio::task::spawn_blocking(move || {
                session.set_blocking(true);
                if let Err(e) = session.disconnect(None, "deployment finished", None) {
                    warn!("SSH disconnect failed: {}", e);
                }
            })
            .await;
        }
    }
}

fn sftp_write(session: &Session, remote_path: &str, content: &[u8]) -> Result<(), DeployerError> {
    let sftp = session
        .sftp()
        .map_err(|e| DeployerError::Transfer(format!("SFTP unavailable: {}", e)))?;
    let mut file = sftp
        .open_mode(
            Path::new(remote_path),
            OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            0o644,
            OpenType::File,
        )
        .map_err(|e| DeployerError::Transfer(format!("Cannot open {}: {}", remote_path, e)))?;
    file.write_all(content)
        .map_err(|e| DeployerError::Transfer(format!("Write to {} failed: {}", remote_path, e)))?;
    Ok(())
}

fn exec_blocking(
    session: &Session,
    command: &str,
    timeout: Duration,
    transcript: &Transcript,
) -> Result<ExecOutput, DeployerError> {
    session.set_blocking(true);
    let mut channel = session.channel_session().map_err(channel_error)?;
    channel.exec(command).map_err(channel_error)?;
    session.set_blocking(false);

    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut stdout_lines = OutputLines::new("stdout");
    let mut stderr_lines = OutputLines::new("stderr");
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut timed_out = false;

    loop {
        let mut progressed = false;

        match channel.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stdout_lines.feed(&buf[..n], transcript);
                stdout.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                session.set_blocking(true);
                return Err(DeployerError::Connection(format!("SSH stdout read failed: {}", e)));
            }
        }

        match channel.stderr().read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                stderr_lines.feed(&buf[..n], transcript);
                stderr.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                session.set_blocking(true);
                return Err(DeployerError::Connection(format!("SSH stderr read failed: {}", e)));
            }
        }

        if channel.eof() && !progressed {
            break;
        }
        if started.elapsed() > timeout {
            timed_out = true;
            break;
        }
        if !progressed {
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    stdout_lines.finish(transcript);
    stderr_lines.finish(transcript);

    session.set_blocking(true);
    let exit_code = if timed_out {
        let _ = channel.close();
        -1
    } else {
        channel.wait_close().map_err(channel_error)?;
        channel.exit_status().unwrap_or(-1)
    };

    Ok(ExecOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
    })
}

fn channel_error(err: ssh2::Error) -> DeployerError {
    let io_err: std::io::Error = err.into();
    match io_err.kind() {
        ErrorKind::TimedOut => DeployerError::Connection("SSH channel timed out".to_string()),
        _ => DeployerError::Connection(format!("SSH channel error: {}", io_err)),
    }
}
