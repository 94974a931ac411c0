//! Semantic error types for the podscp transfer engine.
//!
//! This module defines the error hierarchy for podscp, following the principle
//! of using semantic error enums (via `thiserror`) for conditions the caller
//! might inspect or map to a user-facing message, while reserving opaque
//! errors (`eyre::Report`) for the binary boundary.
//!
//! Every variant renders as a single line. Wrapping variants keep the
//! innermost cause at the end of the message so network diagnostics such as
//! `i/o timeout` remain visible after normalisation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("failed to parse configuration file: {message}")]
    ParseError {
        /// A description of the parse error.
        message: String,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// The `OrthoConfig` library returned an error during configuration loading.
    #[error("configuration loading failed: {0}")]
    OrthoConfig(Arc<ortho_config::OrthoError>),
}

/// Errors raised while parsing a transfer address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The source address was empty.
    #[error("invalid address '': an image reference is required")]
    Empty,

    /// The address ended with `::` but named no image.
    #[error("invalid address '{address}': missing image reference after '::'")]
    MissingImage {
        /// The raw address.
        address: String,
    },

    /// The credential segment before `@` could not be parsed.
    #[error("invalid address '{address}': {reason}")]
    InvalidCredential {
        /// The raw address.
        address: String,
        /// Why the credential was rejected.
        reason: String,
    },

    /// The host segment could not be parsed.
    #[error("invalid address '{address}': {reason}")]
    InvalidHost {
        /// The raw address.
        address: String,
        /// Why the host was rejected.
        reason: String,
    },
}

/// Errors raised while resolving a named connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// No connection with the requested alias is configured.
    #[error("connection '{alias}' not found in {}", .store.display())]
    NotFound {
        /// The alias that was looked up.
        alias: String,
        /// The configuration file that was searched.
        store: PathBuf,
    },

    /// The connection exists but its URI cannot be used.
    #[error("connection '{alias}' has invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// The alias of the offending connection.
        alias: String,
        /// The configured URI.
        uri: String,
        /// Why the URI was rejected.
        reason: String,
    },

    /// The connection store exists but could not be read or parsed.
    #[error("failed to read connections from {}: {message}", .path.display())]
    StoreUnreadable {
        /// Path of the configuration file.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },
}

/// Errors raised while validating a transfer plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Source and destination resolve to the same local account.
    #[error("source and destination are the same local user ({user}); nothing to transfer")]
    SameEndpoint {
        /// The user both sides resolved to.
        user: String,
    },

    /// Both endpoints are remote.
    #[error("transfers between two remote hosts are not supported")]
    RemoteToRemote,

    /// A local credential does not name a known user.
    #[error("unknown local user '{credential}'")]
    UnknownUser {
        /// The credential as written in the address.
        credential: String,
    },

    /// Numeric credentials cannot address a remote account.
    #[error("numeric credential '{credential}' cannot be used with remote host '{host}'")]
    NumericRemoteCredential {
        /// The credential as written in the address.
        credential: String,
        /// The remote host.
        host: String,
    },

    /// The local user database could not be queried.
    #[error("failed to look up local user '{credential}': {message}")]
    UserLookupFailed {
        /// The credential being resolved.
        credential: String,
        /// A description of the failure.
        message: String,
    },
}

/// Network-level failures reaching a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The host name did not resolve.
    #[error("failed to connect: lookup {host}: {message}")]
    Lookup {
        /// The host name that failed to resolve.
        host: String,
        /// The resolver's message.
        message: String,
    },

    /// The remote end actively refused the connection.
    #[error("failed to connect: dial tcp {address}: connection refused")]
    Refused {
        /// The `host:port` that was dialled.
        address: String,
    },

    /// The connection attempt did not complete in time.
    #[error("failed to connect: dial tcp {address}: i/o timeout")]
    TimedOut {
        /// The `host:port` that was dialled.
        address: String,
    },

    /// Any other socket-level failure.
    #[error("failed to connect: dial tcp {address}: {message}")]
    Io {
        /// The `host:port` that was dialled.
        address: String,
        /// The underlying error text.
        message: String,
    },

    /// The secure-shell client could not establish a session.
    #[error("failed to connect: ssh {address}: {message}")]
    Session {
        /// The `host:port` of the remote end.
        address: String,
        /// The client's diagnostic output.
        message: String,
    },
}

/// Errors raised while moving image bytes between stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The source image does not exist in the source store.
    #[error("{reference}: image not known")]
    ImageNotFound {
        /// The image reference that was checked.
        reference: String,
    },

    /// The remote command ran but exited unsuccessfully.
    #[error("remote command '{command}' on {host} failed with exit status {status}: {stderr}")]
    RemoteExec {
        /// The remote host.
        host: String,
        /// The remote command line.
        command: String,
        /// The exit status reported by the remote side.
        status: i32,
        /// Captured remote standard error.
        stderr: String,
    },

    /// A local producer or consumer failed or its stream closed early.
    #[error("{side} failed: {message}")]
    Stream {
        /// Which end of the stream failed.
        side: StreamSide,
        /// A description of the failure.
        message: String,
    },

    /// A helper process could not be started.
    #[error("failed to start '{program}': {message}")]
    Spawn {
        /// The program that failed to start.
        program: String,
        /// A description of the failure.
        message: String,
    },

    /// The overall transfer deadline elapsed.
    #[error("transfer timed out after {limit:?}")]
    Timeout {
        /// The deadline.
        limit: Duration,
    },
}

/// Identifies the end of a transfer stream that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSide {
    /// The image export.
    Producer,
    /// The image import.
    Consumer,
}

impl std::fmt::Display for StreamSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Producer => f.write_str("image export"),
            Self::Consumer => f.write_str("image import"),
        }
    }
}

/// Errors that can occur while talking to the local container engine API.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Failed to connect to the container engine socket.
    #[error("failed to connect to container engine: {message}")]
    ConnectionFailed {
        /// A description of the connection failure.
        message: String,
    },

    /// The container engine socket was not found.
    #[error("container engine socket not found: {}", .path.display())]
    SocketNotFound {
        /// The path where the socket was expected.
        path: PathBuf,
    },

    /// Permission denied when accessing the container engine socket.
    #[error("permission denied accessing container socket: {}", .path.display())]
    PermissionDenied {
        /// The path to the socket.
        path: PathBuf,
    },

    /// An image API call failed.
    #[error("container engine request failed: {message}")]
    RequestFailed {
        /// A description of the failure.
        message: String,
    },

    /// The engine did not answer a ping in time.
    #[error("container engine health check timed out after {seconds} seconds")]
    HealthCheckTimeout {
        /// The timeout in seconds.
        seconds: u64,
    },
}

/// Top-level error type for podscp.
///
/// This enum aggregates all domain-specific errors into a single type. The
/// orchestrator normalises it into a single `Error: ...` line; the binary
/// converts startup failures into `eyre::Report`.
#[derive(Debug, Error)]
pub enum ScpError {
    /// An error occurred during configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transfer address could not be parsed.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// A named connection could not be resolved.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The endpoint combination is not a valid transfer.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// A remote host could not be reached.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Moving the image failed.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// The local container engine API failed.
    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// A specialised `Result` type for podscp operations.
pub type Result<T> = std::result::Result<T, ScpError>;
