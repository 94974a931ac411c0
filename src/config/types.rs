//! Configuration data types for podscp.

use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoResult, PostMergeContext, PostMergeHook};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_ENGINE_PROGRAM: &str = "podman";
const DEFAULT_SSH_PROGRAM: &str = "ssh";
const DEFAULT_SWITCH_PROGRAM: &str = "sudo";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Local container engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine CLI used for `save`, `load`, `image exists` and `tag` when an
    /// image store is driven through a child process.
    pub program: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: String::from(DEFAULT_ENGINE_PROGRAM),
        }
    }
}

/// Transfer deadlines.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Overall deadline for one transfer. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,

    /// Deadline for establishing a TCP connection to a remote host.
    pub connect_timeout_secs: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl TransferConfig {
    /// Returns the overall transfer deadline, if any.
    ///
    /// A zero value is treated as "no deadline".
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Returns the connect deadline.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Secure-shell client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    /// The OpenSSH-compatible client binary.
    pub program: String,

    /// Engine CLI invoked on the remote host.
    pub remote_engine_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: String::from(DEFAULT_SSH_PROGRAM),
            remote_engine_program: String::from(DEFAULT_ENGINE_PROGRAM),
        }
    }
}

/// Privilege switching configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrivilegeConfig {
    /// Program used to run a command as another user when podscp itself is
    /// not running as root.
    pub switch_program: String,
}

impl Default for PrivilegeConfig {
    fn default() -> Self {
        Self {
            switch_program: String::from(DEFAULT_SWITCH_PROGRAM),
        }
    }
}

/// Root application configuration.
///
/// This structure is loaded from configuration files, environment variables,
/// and command-line arguments with layered precedence. The precedence order
/// (lowest to highest) is: defaults, configuration file, environment variables,
/// command-line arguments.
///
/// Configuration files are discovered in this order:
/// 1. Path specified via `PODSCP_CONFIG_PATH` environment variable
/// 2. `.podscp.toml` in the current working directory
/// 3. `.podscp.toml` in the home directory
/// 4. `~/.config/podscp/config.toml` (XDG default)
#[derive(Debug, Clone, Default, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(
    prefix = "PODSCP",
    post_merge_hook,
    discovery(
        app_name = "podscp",
        env_var = "PODSCP_CONFIG_PATH",
        config_file_name = "config.toml",
        dotfile_name = ".podscp.toml",
        config_cli_long = "config",
        config_cli_visible = true,
    )
)]
pub struct AppConfig {
    /// The invoking user's container engine socket path or URL.
    pub engine_socket: Option<String>,

    /// Path of the `containers.conf` file holding named connections.
    pub containers_conf: Option<String>,

    /// Local engine configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub engine: EngineConfig,

    /// Transfer deadlines.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub transfer: TransferConfig,

    /// Secure-shell configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub ssh: SshConfig,

    /// Privilege switching configuration.
    #[serde(default)]
    #[ortho_config(skip_cli)]
    pub privilege: PrivilegeConfig,
}

impl AppConfig {
    /// Validates values that cannot be expressed through types alone.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` when a program name is empty or the
    /// connect timeout is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        let programs = [
            ("engine.program", &self.engine.program),
            ("ssh.program", &self.ssh.program),
            ("ssh.remote_engine_program", &self.ssh.remote_engine_program),
            ("privilege.switch_program", &self.privilege.switch_program),
        ];
        if let Some((field, _)) = programs.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: (*field).to_owned(),
                reason: String::from("cannot be empty"),
            }
            .into());
        }
        if self.transfer.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: String::from("transfer.connect_timeout_secs"),
                reason: String::from("must be greater than zero"),
            }
            .into());
        }
        Ok(())
    }
}

impl PostMergeHook for AppConfig {
    fn post_merge(&mut self, _ctx: &PostMergeContext) -> OrthoResult<()> {
        // An empty string in any layer means "unset" so socket fallback and
        // connection-store discovery still apply.
        if self.engine_socket.as_deref().is_some_and(str::is_empty) {
            self.engine_socket = None;
        }
        if self.containers_conf.as_deref().is_some_and(str::is_empty) {
            self.containers_conf = None;
        }
        Ok(())
    }
}
