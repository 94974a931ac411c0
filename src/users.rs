//! Local user database lookups.
//!
//! Credentials from transfer addresses are resolved to concrete accounts so
//! that `root` and `0` compare equal and the privilege switch knows the uid,
//! gid and home directory to run as.

use camino::Utf8PathBuf;
use nix::unistd::{Gid, Uid, User, getegid, geteuid};

use crate::address::Credential;
use crate::error::{PlanError, Result};

/// A resolved local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Login name.
    pub name: String,
    /// User id.
    pub uid: u32,
    /// Group id the transfer runs with.
    pub gid: u32,
    /// Home directory.
    pub home: Utf8PathBuf,
}

impl UserIdentity {
    /// Returns `true` for the superuser.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Returns `true` when both identities name the same account.
    ///
    /// Accounts are compared by uid only.
    #[must_use]
    pub const fn same_account(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

/// Read access to the local user database.
#[cfg_attr(test, mockall::automock)]
pub trait UserDirectory: Send + Sync {
    /// Returns the account the engine itself runs as.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UserLookupFailed`] when the effective uid has no
    /// database entry.
    fn current(&self) -> Result<UserIdentity>;

    /// Resolves an address credential to an account.
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::UnknownUser`] when no such account exists.
    fn resolve(&self, credential: &Credential) -> Result<UserIdentity>;
}

/// User directory backed by the host's password database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemUsers;

impl SystemUsers {
    /// Creates a directory over the host's password database.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl UserDirectory for SystemUsers {
    fn current(&self) -> Result<UserIdentity> {
        let uid = geteuid();
        let credential = Credential::Ids {
            uid: uid.as_raw(),
            gid: Some(getegid().as_raw()),
        };
        let user = User::from_uid(uid)
            .map_err(|error| lookup_failed(&credential, &error))?
            .ok_or_else(|| PlanError::UserLookupFailed {
                credential: credential.to_string(),
                message: String::from("effective uid has no passwd entry"),
            })?;
        identity_from(&credential, user, Some(getegid()))
    }

    fn resolve(&self, credential: &Credential) -> Result<UserIdentity> {
        let (found, gid) = match credential {
            Credential::Name(name) => (User::from_name(name), None),
            Credential::Ids { uid, gid } => (
                User::from_uid(Uid::from_raw(*uid)),
                gid.map(Gid::from_raw),
            ),
        };
        let user = found
            .map_err(|error| lookup_failed(credential, &error))?
            .ok_or_else(|| PlanError::UnknownUser {
                credential: credential.to_string(),
            })?;
        identity_from(credential, user, gid)
    }
}

fn lookup_failed(credential: &Credential, error: &nix::Error) -> PlanError {
    PlanError::UserLookupFailed {
        credential: credential.to_string(),
        message: error.to_string(),
    }
}

fn identity_from(credential: &Credential, user: User, gid: Option<Gid>) -> Result<UserIdentity> {
    let home = Utf8PathBuf::try_from(user.dir).map_err(|error| PlanError::UserLookupFailed {
        credential: credential.to_string(),
        message: format!("home directory is not valid UTF-8: {error}"),
    })?;
    Ok(UserIdentity {
        name: user.name,
        uid: user.uid.as_raw(),
        gid: gid.unwrap_or(user.gid).as_raw(),
        home,
    })
}
