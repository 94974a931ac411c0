//! Maps failed engine API pings onto [`ContainerError`] variants that name
//! the socket.

use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::Path;

use bollard::errors::Error as BollardError;

use crate::error::ContainerError;

/// Returns the filesystem path of a `unix://` or bare socket endpoint.
///
/// HTTP and TCP endpoints have no path.
pub(super) fn socket_path(endpoint: &str) -> Option<&Path> {
    match endpoint.split_once("://") {
        Some(("unix", path)) => Some(Path::new(path)),
        Some(_) => None,
        None => Some(Path::new(endpoint)),
    }
}

/// Classifies a failed ping of the engine at `endpoint`.
///
/// A missing or unreadable socket is reported with its path; everything
/// else keeps the client's message.
pub(super) fn classify_ping_error(error: &BollardError, endpoint: &str) -> ContainerError {
    let kind = match error {
        BollardError::SocketNotFoundError(_) => Some(ErrorKind::NotFound),
        BollardError::IOError { err } => Some(first_io_kind(err).unwrap_or_else(|| err.kind())),
        other => first_io_kind(other),
    };
    match (kind, socket_path(endpoint)) {
        (Some(ErrorKind::NotFound), Some(path)) => ContainerError::SocketNotFound {
            path: path.to_path_buf(),
        },
        (Some(ErrorKind::PermissionDenied), Some(path)) => ContainerError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ContainerError::ConnectionFailed {
            message: error.to_string(),
        },
    }
}

/// Returns the kind of the first `io::Error` in `error`'s source chain.
fn first_io_kind(error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    std::iter::successors(error.source(), |current: &&(dyn StdError + 'static)| {
        (*current).source()
    })
        .find_map(|source| source.downcast_ref::<std::io::Error>().map(std::io::Error::kind))
}
