//! Transfer orchestration.
//!
//! [`transfer`] is the library entry point behind the `podscp` binary. It
//! parses both addresses, checks that a local source image exists before
//! any privilege switch or network work, selects a plan and runs it under
//! the optional deadline. Failures never cross the boundary as errors: they
//! come back in [`TransferResult::message`] as one `Error: ` line.
//!
//! Collaborators are passed in as trait objects so embedders and tests can
//! substitute the user database, connection store, process launcher, secure
//! shell and the invoking user's image store.

use std::time::Duration;

use tokio::time::Instant;

use crate::address::{parse_destination, parse_source};
use crate::connections::ConnectionStore;
use crate::engine::{ImageStore, ProcessLauncher};
use crate::error::{Result, ScpError, TransferError};
use crate::plan::{resolve_local_user, select};
use crate::transport::{self, SecureShell, TransportContext};
use crate::users::UserDirectory;

/// Marker that starts every surfaced error line.
pub const ERROR_MARKER: &str = "Error: ";

/// Caller options for a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Suppress progress events. Errors are always reported.
    pub quiet: bool,
    /// Bound on the whole transfer, including connection set-up.
    pub deadline: Option<Duration>,
}

/// Outcome of a transfer, for reporting only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    /// Whether the image reached the destination store.
    pub success: bool,
    /// The single-line error, present iff the transfer failed.
    pub message: Option<String>,
    /// Reference of the image in the destination store on success.
    pub image: Option<String>,
}

impl TransferResult {
    fn succeeded(image: String) -> Self {
        Self {
            success: true,
            message: None,
            image: Some(image),
        }
    }

    fn failed(error: &ScpError) -> Self {
        Self {
            success: false,
            message: Some(error_line(error)),
            image: None,
        }
    }
}

/// Collaborators a transfer runs with.
///
/// Groups the injected services into a single struct to satisfy the
/// "no more than four parameters" convention.
#[derive(Clone, Copy)]
pub struct TransferServices<'a> {
    /// Local account lookups.
    pub users: &'a dyn UserDirectory,
    /// Named connections.
    pub connections: &'a dyn ConnectionStore,
    /// Starts engine and secure-shell children.
    pub launcher: &'a dyn ProcessLauncher,
    /// Opens secure-shell sessions.
    pub shell: &'a dyn SecureShell,
    /// The invoking user's image store.
    pub invoker_store: &'a dyn ImageStore,
    /// Engine CLI program for other local accounts' stores.
    pub engine_program: &'a str,
}

/// Transfers an image from `source` to `destination`.
///
/// `destination` may be empty, meaning the counterpart local account (root
/// for an ordinary user, the invoking user otherwise) under the source image
/// name.
pub async fn transfer(
    source: &str,
    destination: &str,
    options: TransferOptions,
    services: TransferServices<'_>,
) -> TransferResult {
    let deadline = options
        .deadline
        .and_then(|limit| Instant::now().checked_add(limit).map(|at| (limit, at)));
    let outcome = match deadline {
        // The transport gets the same instant, so a connection still being
        // set up fails with its own address first.
        Some((limit, at)) => {
            tokio::time::timeout_at(at, run(source, destination, options, Some(at), services))
                .await
                .unwrap_or_else(|_| Err(TransferError::Timeout { limit }.into()))
        }
        None => run(source, destination, options, None, services).await,
    };

    match outcome {
        Ok(image) => TransferResult::succeeded(image),
        Err(error) => {
            tracing::error!(event = "transfer.failed", error = %error);
            TransferResult::failed(&error)
        }
    }
}

async fn run(
    source_raw: &str,
    destination_raw: &str,
    options: TransferOptions,
    deadline: Option<Instant>,
    services: TransferServices<'_>,
) -> Result<String> {
    let source = parse_source(source_raw)?;
    let destination = parse_destination(destination_raw, &source)?;
    let invoker = services.users.current()?;
    let context = TransportContext {
        launcher: services.launcher,
        shell: services.shell,
        engine_program: services.engine_program,
        invoker: &invoker,
        invoker_store: services.invoker_store,
        deadline,
    };

    if source.is_local() {
        let owner = resolve_local_user(&source, services.users)?;
        let store = context.local_store(&owner);
        if !store.as_store().exists(source.image()).await? {
            return Err(TransferError::ImageNotFound {
                reference: source.image().to_owned(),
            }
            .into());
        }
    }

    let plan = select(&source, &destination, services.users, services.connections)?;
    if !options.quiet {
        tracing::info!(
            event = "transfer.progress",
            mode = %plan.mode,
            source = %source,
            "copying image"
        );
    }
    transport::run(&plan, &context).await
}

/// Renders `error` as one line starting with [`ERROR_MARKER`].
#[must_use]
pub fn error_line(error: &ScpError) -> String {
    let text = error.to_string();
    let flattened = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    format!("{ERROR_MARKER}{flattened}")
}
