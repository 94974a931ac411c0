//! Configuration system for podscp.
//!
//! This module provides the configuration structures and CLI definitions for
//! the podscp binary. Configuration loading and precedence merging is handled
//! by the `ortho_config` crate: CLI flags override environment variables,
//! which override configuration files, which override defaults.
//!
//! The configuration file is expected at `~/.config/podscp/config.toml` by
//! default.
//!
//! # Example Configuration
//!
//! ```toml
//! engine_socket = "unix:///run/user/1000/podman/podman.sock"
//! containers_conf = "/home/user/.config/containers/containers.conf"
//!
//! [engine]
//! program = "podman"
//!
//! [transfer]
//! timeout_secs = 600
//! connect_timeout_secs = 30
//!
//! [ssh]
//! program = "ssh"
//! remote_engine_program = "podman"
//!
//! [privilege]
//! switch_program = "sudo"
//! ```

mod cli;
mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use cli::Cli;
pub use loader::{env_var_names, load_config};
pub use types::{AppConfig, EngineConfig, PrivilegeConfig, SshConfig, TransferConfig};
