//! Command-line argument definitions for podscp.

use camino::Utf8PathBuf;
use clap::Parser;

/// Command-line interface for podscp.
///
/// Addresses follow the `[[user@]host-or-connection::]image` grammar. A bare
/// image name refers to the invoking user's local store.
#[derive(Debug, Parser)]
#[command(name = "podscp")]
#[command(
    author,
    version,
    about = "Copy container images between local users and remote hosts"
)]
pub struct Cli {
    /// Source image address, e.g. `alpine` or `root@localhost::alpine`.
    #[arg(required = true)]
    pub source: String,

    /// Destination address, e.g. `QA::` or `1000:1000@localhost::`.
    pub destination: Option<String>,

    /// Suppress progress output. Errors are always reported.
    #[arg(short, long)]
    pub quiet: bool,

    /// Abort the transfer after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<Utf8PathBuf>,

    /// Container engine socket path or URL.
    #[arg(long)]
    pub engine_socket: Option<String>,

    /// Log filter directive, e.g. `debug` or `podscp=trace`.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Returns the destination address, treating an omitted destination as
    /// empty.
    #[must_use]
    pub fn destination_or_default(&self) -> &str {
        self.destination.as_deref().unwrap_or_default()
    }
}
