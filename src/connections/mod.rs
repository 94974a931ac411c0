//! Named remote connections.
//!
//! Connections are read from the `[engine.service_destinations]` table of
//! `containers.conf`:
//!
//! ```toml
//! [engine]
//! active_service = "QA"
//!
//! [engine.service_destinations.QA]
//! uri = "ssh://root@server.fubar.com:2222/run/podman/podman.sock"
//! identity = "/home/alice/.ssh/id_ed25519"
//! ```
//!
//! The store is read once and never written. An absent alias is a usage
//! error ([`ConnectionError::NotFound`]); a resolved connection with an
//! unusable URI is a configuration error ([`ConnectionError::InvalidUri`]).

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use mockable::Env;
use ortho_config::toml;
use serde::Deserialize;
use url::Url;

use crate::error::{ConnectionError, Result};


/// Environment variable naming an explicit `containers.conf`.
const CONTAINERS_CONF_ENV: &str = "CONTAINERS_CONF";
/// Path of `containers.conf` below a configuration home.
const CONTAINERS_CONF_SUFFIX: &str = "containers/containers.conf";
/// Port used when a connection URI omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A resolved named connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// The alias the connection is stored under.
    pub alias: String,
    /// The URI as written in the store.
    pub uri: String,
    /// Login user from the URI, if any.
    pub user: Option<String>,
    /// Remote host name or IP address, without brackets.
    pub host: String,
    /// Remote secure-shell port.
    pub port: u16,
    /// Engine socket path on the remote host, if the URI carries one.
    pub socket_path: Option<String>,
    /// Private key file used to authenticate.
    pub identity: Option<Utf8PathBuf>,
}

/// Read-only lookup of named connections.
pub trait ConnectionStore: Send + Sync {
    /// Resolves `alias` to a concrete connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotFound`] when the alias is not
    /// configured and [`ConnectionError::InvalidUri`] when its URI cannot be
    /// used for a secure-shell transfer.
    fn lookup(&self, alias: &str) -> Result<Connection>;
}

#[derive(Debug, Default, Deserialize)]
struct ContainersConf {
    #[serde(default)]
    engine: EngineSection,
}

#[derive(Debug, Default, Deserialize)]
struct EngineSection {
    active_service: Option<String>,
    #[serde(default)]
    service_destinations: BTreeMap<String, ServiceDestination>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceDestination {
    uri: String,
    identity: Option<String>,
}

/// Connection store backed by a `containers.conf` file.
#[derive(Debug)]
pub struct ContainersConfStore {
    path: Utf8PathBuf,
    active_service: Option<String>,
    destinations: BTreeMap<String, ServiceDestination>,
}

impl ContainersConfStore {
    /// Locates `containers.conf` for the invoking user.
    ///
    /// Checks, in order: `CONTAINERS_CONF`, the configured path,
    /// `$XDG_CONFIG_HOME/containers/containers.conf` and
    /// `$HOME/.config/containers/containers.conf`. Returns `None` when none
    /// of those can be formed.
    #[must_use]
    pub fn locate<E: Env>(env: &E, configured: Option<&str>) -> Option<Utf8PathBuf> {
        let non_empty = |value: &String| !value.is_empty();
        env.string(CONTAINERS_CONF_ENV)
            .filter(non_empty)
            .map(Utf8PathBuf::from)
            .or_else(|| {
                configured
                    .filter(|path| !path.is_empty())
                    .map(Utf8PathBuf::from)
            })
            .or_else(|| {
                env.string("XDG_CONFIG_HOME")
                    .filter(non_empty)
                    .map(|home| Utf8PathBuf::from(home).join(CONTAINERS_CONF_SUFFIX))
            })
            .or_else(|| {
                env.string("HOME").filter(non_empty).map(|home| {
                    Utf8PathBuf::from(home)
                        .join(".config")
                        .join(CONTAINERS_CONF_SUFFIX)
                })
            })
    }

    /// Loads the store from `path`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StoreUnreadable`] when the file exists but
    /// cannot be read or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let unreadable = |message: String| ConnectionError::StoreUnreadable {
            path: path.as_std_path().to_path_buf(),
            message,
        };

        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        let file_name = path.file_name().unwrap_or(path.as_str());

        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(error) => return Err(unreadable(error.to_string()).into()),
        };

        let content = match dir.read_to_string(file_name) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::empty(path));
            }
            Err(error) => return Err(unreadable(error.to_string()).into()),
        };

        Self::from_toml(path, &content)
    }

    /// Parses the store from TOML text attributed to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::StoreUnreadable`] when `content` is not a
    /// valid `containers.conf`.
    pub fn from_toml(path: &Utf8Path, content: &str) -> Result<Self> {
        let parsed: ContainersConf =
            toml::from_str(content).map_err(|error| ConnectionError::StoreUnreadable {
                path: path.as_std_path().to_path_buf(),
                message: error.to_string(),
            })?;
        tracing::debug!(
            event = "connections.loaded",
            path = %path,
            count = parsed.engine.service_destinations.len(),
        );
        Ok(Self {
            path: path.to_path_buf(),
            active_service: parsed.engine.active_service,
            destinations: parsed.engine.service_destinations,
        })
    }

    /// Creates a store with no connections.
    #[must_use]
    pub fn empty(path: &Utf8Path) -> Self {
        Self {
            path: path.to_path_buf(),
            active_service: None,
            destinations: BTreeMap::new(),
        }
    }

    /// Returns the file the store was read from.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the default connection named in the file, if any.
    #[must_use]
    pub fn active_service(&self) -> Option<&str> {
        self.active_service.as_deref()
    }
}

impl ConnectionStore for ContainersConfStore {
    fn lookup(&self, alias: &str) -> Result<Connection> {
        let destination =
            self.destinations
                .get(alias)
                .ok_or_else(|| ConnectionError::NotFound {
                    alias: alias.to_owned(),
                    store: self.path.as_std_path().to_path_buf(),
                })?;
        let connection = parse_connection(
            alias,
            &destination.uri,
            destination.identity.as_deref(),
        )?;
        Ok(connection)
    }
}

/// Parses a stored connection URI.
///
/// Only `ssh://` URIs describe a host the secure-shell transport can reach.
///
/// # Errors
///
/// Returns [`ConnectionError::InvalidUri`] when the URI does not parse, uses
/// another scheme or has no host.
pub fn parse_connection(
    alias: &str,
    uri: &str,
    identity: Option<&str>,
) -> std::result::Result<Connection, ConnectionError> {
    let invalid = |reason: String| ConnectionError::InvalidUri {
        alias: alias.to_owned(),
        uri: uri.to_owned(),
        reason,
    };

    let url = Url::parse(uri).map_err(|error| invalid(error.to_string()))?;
    if url.scheme() != "ssh" {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected 'ssh'",
            url.scheme()
        )));
    }

    let raw_host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid(String::from("missing host")))?;
    let host = raw_host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(raw_host);

    let user = Some(url.username())
        .filter(|user| !user.is_empty())
        .map(String::from);
    let socket_path = Some(url.path())
        .filter(|path| !path.is_empty() && *path != "/")
        .map(String::from);

    Ok(Connection {
        alias: alias.to_owned(),
        uri: uri.to_owned(),
        user,
        host: host.to_owned(),
        port: url.port().unwrap_or(DEFAULT_SSH_PORT),
        socket_path,
        identity: identity
            .filter(|identity| !identity.is_empty())
            .map(Utf8PathBuf::from),
    })
}
