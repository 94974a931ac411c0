//! Transports that move an image archive from one store to another.
//!
//! Every transport pairs a producer (an [`ImageStore::export`] stream) with
//! a consumer ([`ImageStore::import`]). The consumer pulls chunks from the
//! producer as it writes them, so bytes arrive in order and a failure on
//! either side drops the other, which terminates its child process.

mod local;
mod remote;
mod ssh;

pub use ssh::{ConnectFuture, OpenSshClient, SecureShell, SshSession};

use tokio::time::Instant;

use crate::engine::{EngineCli, ImageStore, ProcessLauncher};
use crate::error::{PlanError, Result};
use crate::plan::{EndpointLocation, TransferPlan};
use crate::users::UserIdentity;


/// Collaborators a transport runs with.
#[derive(Clone, Copy)]
pub struct TransportContext<'a> {
    /// Starts engine and secure-shell child processes.
    pub launcher: &'a dyn ProcessLauncher,
    /// Opens secure-shell sessions.
    pub shell: &'a dyn SecureShell,
    /// Engine CLI used for stores of other local accounts.
    pub engine_program: &'a str,
    /// The account the engine runs as.
    pub invoker: &'a UserIdentity,
    /// The invoking account's store.
    pub invoker_store: &'a dyn ImageStore,
    /// When the whole transfer must be finished.
    pub deadline: Option<Instant>,
}

/// A local account's image store.
pub enum LocalStore<'a> {
    /// The invoking account's store.
    Invoker(&'a dyn ImageStore),
    /// Another account's store, reached through the privilege switch.
    Switched(EngineCli<'a>),
}

impl LocalStore<'_> {
    /// Returns the store.
    #[must_use]
    pub fn as_store(&self) -> &dyn ImageStore {
        match self {
            Self::Invoker(store) => *store,
            Self::Switched(cli) => cli,
        }
    }
}

impl<'a> TransportContext<'a> {
    /// Returns the image store of local account `user`.
    #[must_use]
    pub fn local_store(&self, user: &UserIdentity) -> LocalStore<'a> {
        if user.same_account(self.invoker) {
            LocalStore::Invoker(self.invoker_store)
        } else {
            LocalStore::Switched(EngineCli::local(
                self.launcher,
                self.engine_program,
                Some(user.clone()),
            ))
        }
    }
}

/// Runs `plan`, returning the reference the image has in the destination
/// store.
///
/// # Errors
///
/// Returns the first producer, consumer or connection error.
pub async fn run(plan: &TransferPlan, context: &TransportContext<'_>) -> Result<String> {
    tracing::info!(
        event = "transfer.started",
        mode = %plan.mode,
        source_image = %plan.source.image,
        destination_image = %plan.destination.image,
    );
    let loaded = match (&plan.source.location, &plan.destination.location) {
        (EndpointLocation::Local(from), EndpointLocation::Local(to)) => {
            local::run(plan, from, to, context).await?
        }
        (EndpointLocation::Local(from), EndpointLocation::Remote(target)) => {
            remote::push(plan, from, target, context).await?
        }
        (EndpointLocation::Remote(target), EndpointLocation::Local(to)) => {
            remote::pull(plan, target, to, context).await?
        }
        (EndpointLocation::Remote(_), EndpointLocation::Remote(_)) => {
            return Err(PlanError::RemoteToRemote.into());
        }
    };
    tracing::info!(event = "transfer.completed", mode = %plan.mode, image = %loaded);
    Ok(loaded)
}

/// Streams `source_image` from `producer` into `consumer`.
///
/// When `destination_image` differs from `source_image` the imported image
/// is tagged with it and that name is returned.
pub(crate) async fn pipe_image(
    producer: &dyn ImageStore,
    source_image: &str,
    consumer: &dyn ImageStore,
    destination_image: &str,
) -> Result<String> {
    let archive = producer.export(source_image);
    let loaded = consumer.import(archive).await?;
    if destination_image == source_image {
        return Ok(loaded);
    }
    consumer.tag(&loaded, destination_image).await?;
    tracing::debug!(event = "transfer.tagged", loaded = %loaded, tag = %destination_image);
    Ok(destination_image.to_owned())
}
