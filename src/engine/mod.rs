//! Container engine access.
//!
//! Three layers live here:
//!
//! - [`EngineConnector`] and [`SocketResolver`] reach the invoking user's
//!   engine API. An explicit socket always wins; otherwise root falls back
//!   through `DOCKER_HOST`, `CONTAINER_HOST`, `PODMAN_HOST`, the rootless
//!   socket and `/run/podman/podman.sock`, while any other account only
//!   uses its rootless socket under `XDG_RUNTIME_DIR`.
//! - [`ImageStore`] is the export/import seam transfers are written
//!   against, implemented for the API client and for [`EngineCli`].
//! - [`ProcessLauncher`] starts engine and secure-shell children, switching
//!   account where a [`LaunchSpec`] asks for it.

mod connection;
mod image_store;
mod process;

pub use connection::{EngineConnector, SocketResolver};
pub use image_store::{EngineCli, ImageArchiveStream, ImageStore, ImageStoreFuture};
pub use process::{
    ChildInput, ChildOutput, ExitFuture, HostLauncher, LaunchSpec, OutputMode, PreparedCommand,
    ProcessExit, ProcessLauncher, SpawnedProcess,
};
