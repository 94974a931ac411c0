//! Transport selection.
//!
//! [`select`] turns a parsed source and destination into a validated
//! [`TransferPlan`]: local credentials are resolved to accounts, connection
//! aliases are resolved to remote targets, and the combination is checked
//! against the supported transfer modes.
//!
//! | source   | destination | same account | mode             |
//! |----------|-------------|--------------|------------------|
//! | local    | local       | yes          | rejected (no-op) |
//! | local    | local       | no           | `LocalCrossUser` |
//! | local    | remote      |              | `PushRemote`     |
//! | remote   | local       |              | `PullRemote`     |
//! | remote   | remote      |              | rejected         |
//!
//! Connection aliases always select a remote mode, even when the alias
//! points at the local machine.

use std::fmt;

use camino::Utf8PathBuf;

use crate::address::{Credential, Destination, Endpoint, Location};
use crate::connections::{ConnectionStore, DEFAULT_SSH_PORT};
use crate::error::{PlanError, Result};
use crate::users::{UserDirectory, UserIdentity};


/// How image bytes move for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Same host, different local accounts.
    LocalCrossUser,
    /// Local source, remote destination.
    PushRemote,
    /// Remote source, local destination.
    PullRemote,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LocalCrossUser => "local-cross-user",
            Self::PushRemote => "push-remote",
            Self::PullRemote => "pull-remote",
        })
    }
}

/// A remote host reached over the secure shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Login user; the client's default when `None`.
    pub user: Option<String>,
    /// Host name or IP address, without brackets.
    pub host: String,
    /// Secure-shell port.
    pub port: u16,
    /// Private key file.
    pub identity: Option<Utf8PathBuf>,
    /// Engine socket path on the remote host.
    pub socket_path: Option<String>,
    /// The connection alias the target came from.
    pub alias: Option<String>,
}

impl RemoteTarget {
    /// Creates an ad-hoc target for an explicit host.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            user: None,
            host: host.into(),
            port,
            identity: None,
            socket_path: None,
            alias: None,
        }
    }

    /// Returns `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Where a resolved endpoint's image store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointLocation {
    /// A local account's store.
    Local(UserIdentity),
    /// A remote host's store.
    Remote(RemoteTarget),
}

/// An endpoint with its account or host fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Image reference in that store.
    pub image: String,
    /// The store's location.
    pub location: EndpointLocation,
}

impl ResolvedEndpoint {
    /// Returns the local account, if the endpoint is local.
    #[must_use]
    pub const fn local_user(&self) -> Option<&UserIdentity> {
        match &self.location {
            EndpointLocation::Local(user) => Some(user),
            EndpointLocation::Remote(_) => None,
        }
    }

    /// Returns the remote target, if the endpoint is remote.
    #[must_use]
    pub const fn remote(&self) -> Option<&RemoteTarget> {
        match &self.location {
            EndpointLocation::Remote(target) => Some(target),
            EndpointLocation::Local(_) => None,
        }
    }
}

/// A validated transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    /// Where the image comes from.
    pub source: ResolvedEndpoint,
    /// Where the image goes.
    pub destination: ResolvedEndpoint,
    /// The selected transport.
    pub mode: TransferMode,
}

/// Resolves a local endpoint's account: its credential, or the invoking
/// user when none was written.
///
/// # Errors
///
/// Returns [`PlanError::UnknownUser`] for an unknown credential.
pub fn resolve_local_user(endpoint: &Endpoint, users: &dyn UserDirectory) -> Result<UserIdentity> {
    endpoint
        .credential()
        .map_or_else(|| users.current(), |credential| users.resolve(credential))
}

/// Selects and validates the transfer plan for `source` and `destination`.
///
/// # Errors
///
/// Returns [`PlanError::RemoteToRemote`] when both sides are remote,
/// [`PlanError::SameEndpoint`] when both resolve to the same local account,
/// [`PlanError::NumericRemoteCredential`] for `uid[:gid]` on a remote side,
/// and connection or user lookup errors from the collaborators.
pub fn select(
    source: &Endpoint,
    destination: &Destination,
    users: &dyn UserDirectory,
    connections: &dyn ConnectionStore,
) -> Result<TransferPlan> {
    if let Destination::Endpoint(endpoint) = destination
        && !source.is_local()
        && !endpoint.is_local()
    {
        return Err(PlanError::RemoteToRemote.into());
    }

    let resolved_source = resolve_endpoint(source, users, connections)?;
    let resolved_destination = match destination {
        Destination::Endpoint(endpoint) => resolve_endpoint(endpoint, users, connections)?,
        Destination::Counterpart { image } => ResolvedEndpoint {
            image: image.clone(),
            location: EndpointLocation::Local(counterpart(&resolved_source, users)?),
        },
    };

    let mode = match (&resolved_source.location, &resolved_destination.location) {
        (EndpointLocation::Local(from), EndpointLocation::Local(to)) => {
            if from.same_account(to) {
                return Err(PlanError::SameEndpoint {
                    user: from.name.clone(),
                }
                .into());
            }
            TransferMode::LocalCrossUser
        }
        (EndpointLocation::Local(_), EndpointLocation::Remote(_)) => TransferMode::PushRemote,
        (EndpointLocation::Remote(_), EndpointLocation::Local(_)) => TransferMode::PullRemote,
        (EndpointLocation::Remote(_), EndpointLocation::Remote(_)) => {
            return Err(PlanError::RemoteToRemote.into());
        }
    };

    tracing::debug!(
        event = "plan.selected",
        %mode,
        source = %source,
        destination_image = %resolved_destination.image,
    );

    Ok(TransferPlan {
        source: resolved_source,
        destination: resolved_destination,
        mode,
    })
}

/// The account an omitted destination refers to: root for an ordinary
/// source account, the invoking user for a root or remote source.
fn counterpart(source: &ResolvedEndpoint, users: &dyn UserDirectory) -> Result<UserIdentity> {
    match source.local_user() {
        Some(user) if !user.is_root() => users.resolve(&Credential::Ids { uid: 0, gid: None }),
        _ => users.current(),
    }
}

fn resolve_endpoint(
    endpoint: &Endpoint,
    users: &dyn UserDirectory,
    connections: &dyn ConnectionStore,
) -> Result<ResolvedEndpoint> {
    let location = match endpoint.location() {
        Location::Local => EndpointLocation::Local(resolve_local_user(endpoint, users)?),
        Location::Host { host, port } => {
            let mut target = RemoteTarget::new(host.clone(), port.unwrap_or(DEFAULT_SSH_PORT));
            target.user = remote_user(endpoint.credential(), host)?;
            EndpointLocation::Remote(target)
        }
        Location::Connection(alias) => {
            let connection = connections.lookup(alias)?;
            let user = remote_user(endpoint.credential(), &connection.host)?.or(connection.user);
            EndpointLocation::Remote(RemoteTarget {
                user,
                host: connection.host,
                port: connection.port,
                identity: connection.identity,
                socket_path: connection.socket_path,
                alias: Some(connection.alias),
            })
        }
    };
    Ok(ResolvedEndpoint {
        image: endpoint.image().to_owned(),
        location,
    })
}

fn remote_user(credential: Option<&Credential>, host: &str) -> Result<Option<String>> {
    match credential {
        None => Ok(None),
        Some(Credential::Name(name)) => Ok(Some(name.clone())),
        Some(ids @ Credential::Ids { .. }) => Err(PlanError::NumericRemoteCredential {
            credential: ids.to_string(),
            host: host.to_owned(),
        }
        .into()),
    }
}
