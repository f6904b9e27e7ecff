//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for rolling log files; stdout only when absent
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub json_logs: bool,

    /// Timeout configuration
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Defaults applied to incoming deployment requests
    #[serde(default)]
    pub defaults: DefaultSettings,

    /// Agent registry configuration
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            json_logs: false,
            timeouts: TimeoutSettings::default(),
            defaults: DefaultSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

/// Remote operation ceilings, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Connection and authentication ceiling
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// Ceiling for a single command or file write
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Ceiling for runtime install, dependency install and build
    #[serde(default = "default_long_command_secs")]
    pub long_command_secs: u64,

    /// SSH keepalive interval
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

fn default_connect_secs() -> u64 {
    15
}

fn default_command_secs() -> u64 {
    60
}

fn default_long_command_secs() -> u64 {
    600
}

fn default_keepalive_secs() -> u64 {
    10
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    pub fn long_command(&self) -> Duration {
        Duration::from_secs(self.long_command_secs.max(self.command_secs))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            long_command_secs: default_long_command_secs(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Request defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultSettings {
    /// Remote path used when a request carries none
    #[serde(default = "default_target_path")]
    pub target_path: String,

    /// SSH port used when a request carries none
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Application port recorded when the environment declares none
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Node.js major version installed when the runtime is missing
    #[serde(default = "default_node_major")]
    pub node_major: u32,
}

fn default_target_path() -> String {
    "/var/www/app".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_app_port() -> u16 {
    3000
}

fn default_node_major() -> u32 {
    20
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            target_path: default_target_path(),
            ssh_port: default_ssh_port(),
            app_port: default_app_port(),
            node_major: default_node_major(),
        }
    }
}

/// Agent registry settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Base URL of the registry API; write-back is skipped when absent
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token sent with registry requests
    #[serde(default, skip_serializing)]
    pub token: Option<SecretString>,
}
