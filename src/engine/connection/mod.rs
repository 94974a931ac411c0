//! Engine API socket resolution and connection.
//!
//! The invoking user's image store is reached through the engine's REST
//! API. This module resolves which socket to use and connects to it with
//! `bollard`; [`EngineConnector::connect_and_verify_async`] additionally
//! pings the engine so callers can fall back to the engine CLI when the API
//! service is not running.

use bollard::{API_DEFAULT_VERSION, Docker};

use crate::error::{ContainerError, ScpError};

mod error_classification;
mod health_check;

/// Environment variable names checked in fallback order after configuration sources.
const FALLBACK_ENV_VARS: &[&str] = &["DOCKER_HOST", "CONTAINER_HOST", "PODMAN_HOST"];

/// Connection timeout in seconds for engine API requests.
const CONNECTION_TIMEOUT_SECS: u64 = 120;

/// Timeout in seconds for health check operations.
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

/// Rootful engine socket.
const DEFAULT_SOCKET: &str = "unix:///run/podman/podman.sock";

/// Resolves engine socket endpoints from environment variables.
///
/// # Example
///
/// ```ignore
/// use mockable::DefaultEnv;
/// use podscp::engine::SocketResolver;
///
/// let env = DefaultEnv::new();
/// let resolver = SocketResolver::new(&env);
///
/// if let Some(socket) = resolver.resolve_from_env() {
///     println!("Found socket: {}", socket);
/// }
/// ```
pub struct SocketResolver<'a, E: mockable::Env> {
    env: &'a E,
}

impl<'a, E: mockable::Env> SocketResolver<'a, E> {
    /// Creates a new socket resolver with the given environment provider.
    #[must_use]
    pub const fn new(env: &'a E) -> Self {
        Self { env }
    }

    /// Resolves the socket endpoint from the environment.
    ///
    /// Checks `DOCKER_HOST`, `CONTAINER_HOST` and `PODMAN_HOST` in order,
    /// then the rootless socket under `XDG_RUNTIME_DIR`. Empty values are
    /// skipped.
    #[must_use]
    pub fn resolve_from_env(&self) -> Option<String> {
        FALLBACK_ENV_VARS
            .iter()
            .filter_map(|var_name| self.env.string(var_name))
            .find(|value| !value.is_empty())
            .or_else(|| self.rootless_socket())
    }

    /// Returns the per-user socket under `XDG_RUNTIME_DIR`, if that is set.
    #[must_use]
    pub fn rootless_socket(&self) -> Option<String> {
        self.env
            .string("XDG_RUNTIME_DIR")
            .filter(|dir| !dir.is_empty())
            .map(|dir| format!("unix://{}/podman/podman.sock", dir.trim_end_matches('/')))
    }

    /// Returns the rootful socket, `unix:///run/podman/podman.sock`.
    #[must_use]
    pub const fn default_socket() -> &'static str {
        DEFAULT_SOCKET
    }
}

/// How the engine API is reached.
enum ApiEndpoint {
    /// A Unix domain socket URI.
    Unix(String),
    /// An HTTP(S) base URL.
    Http(String),
}

impl ApiEndpoint {
    /// Normalises `socket`: bare paths become `unix://` URIs and `tcp://`
    /// becomes `http://`.
    fn parse(socket: &str) -> Result<Self, ContainerError> {
        match socket.split_once("://") {
            None => Ok(Self::Unix(format!("unix://{socket}"))),
            Some(("unix", _)) => Ok(Self::Unix(socket.to_owned())),
            Some(("tcp", rest)) => Ok(Self::Http(format!("http://{rest}"))),
            Some(("http" | "https", _)) => Ok(Self::Http(socket.to_owned())),
            Some((scheme, _)) => Err(ContainerError::ConnectionFailed {
                message: format!("unsupported engine endpoint scheme '{scheme}' in {socket}"),
            }),
        }
    }
}

/// Connects to the engine API.
pub struct EngineConnector;

impl EngineConnector {
    /// Connect to the engine at `socket`.
    ///
    /// Accepts `unix://` sockets, `tcp://` (treated as HTTP), `http://`,
    /// `https://` and bare socket paths. Connecting does not contact the
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::ConnectionFailed` for an unsupported scheme
    /// or when the client cannot be configured.
    pub fn connect(socket: &str) -> Result<Docker, ScpError> {
        let client = match ApiEndpoint::parse(socket)? {
            ApiEndpoint::Unix(uri) => {
                Docker::connect_with_socket(&uri, CONNECTION_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            ApiEndpoint::Http(url) => {
                Docker::connect_with_http(&url, CONNECTION_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
        };
        client.map_err(|error| {
            ContainerError::ConnectionFailed {
                message: error.to_string(),
            }
            .into()
        })
    }

    /// Resolves the invoking user's engine socket without connecting.
    ///
    /// Resolution order:
    /// 1. `config_socket` (from CLI, config file, or `PODSCP_ENGINE_SOCKET`)
    /// 2. for root: `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST`, then
    ///    `$XDG_RUNTIME_DIR/podman/podman.sock`, then
    ///    `/run/podman/podman.sock`
    /// 3. for any other account: `$XDG_RUNTIME_DIR/podman/podman.sock` only
    ///
    /// `None` means the account has no API socket of its own and its store
    /// is reached through the engine CLI, like every other local account.
    #[must_use]
    pub fn resolve_socket<E: mockable::Env>(
        config_socket: Option<&str>,
        resolver: &SocketResolver<'_, E>,
        effective_uid: u32,
    ) -> Option<String> {
        let configured = config_socket.filter(|s| !s.is_empty()).map(String::from);
        if effective_uid != 0 {
            return configured.or_else(|| resolver.rootless_socket());
        }
        configured
            .or_else(|| resolver.resolve_from_env())
            .or_else(|| Some(SocketResolver::<E>::default_socket().to_owned()))
    }
}
