//! Secure-shell sessions to remote engines.
//!
//! Connecting first dials the target's TCP port so that name resolution
//! failures, refusals and timeouts are reported distinctly and name the
//! address. A [`SshSession`] then runs engine commands through the
//! OpenSSH client, one client process per command.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::engine::{LaunchSpec, OutputMode, ProcessLauncher, SpawnedProcess};
use crate::error::{ConnectError, Result};
use crate::plan::RemoteTarget;

/// Boxed future returned by [`SecureShell::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<SshSession>> + Send>>;

/// Opens secure-shell sessions.
pub trait SecureShell: Send + Sync {
    /// Connects to `target`, failing with [`ConnectError`] when the host
    /// cannot be reached before the connect timeout or `deadline`, whichever
    /// comes first.
    fn connect(&self, target: &RemoteTarget, deadline: Option<Instant>) -> ConnectFuture;
}

/// Secure-shell client backed by the OpenSSH `ssh` binary.
#[derive(Debug, Clone)]
pub struct OpenSshClient {
    program: String,
    remote_engine: String,
    connect_timeout: Duration,
}

impl OpenSshClient {
    /// Creates a client running `program` and invoking `remote_engine` on
    /// the far side.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        remote_engine: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            remote_engine: remote_engine.into(),
            connect_timeout,
        }
    }

    /// Creates a session without dialling the target.
    #[must_use]
    pub fn session(&self, target: RemoteTarget) -> SshSession {
        SshSession {
            program: self.program.clone(),
            remote_engine: self.remote_engine.clone(),
            connect_timeout: self.connect_timeout,
            target,
        }
    }
}

impl SecureShell for OpenSshClient {
    fn connect(&self, target: &RemoteTarget, deadline: Option<Instant>) -> ConnectFuture {
        let client = self.clone();
        let target = target.clone();
        Box::pin(async move {
            tracing::debug!(
                event = "ssh.dial",
                address = %target.address(),
                alias = ?target.alias,
            );
            let limit = dial_deadline(client.connect_timeout, deadline);
            dial(&target.host, target.port, limit).await?;
            Ok(client.session(target))
        })
    }
}

/// Returns the instant a dial must finish by: the connect timeout from now,
/// cut short by the transfer `deadline`.
#[must_use]
fn dial_deadline(connect_timeout: Duration, deadline: Option<Instant>) -> Option<Instant> {
    match (Instant::now().checked_add(connect_timeout), deadline) {
        (Some(limit), Some(overall)) => Some(limit.min(overall)),
        (limit, overall) => limit.or(overall),
    }
}

/// Checks that `host:port` accepts TCP connections before `deadline`.
///
/// # Errors
///
/// Returns [`ConnectError::Lookup`] when the name does not resolve,
/// [`ConnectError::Refused`] when every address refuses,
/// [`ConnectError::TimedOut`] when the deadline passes, and
/// [`ConnectError::Io`] for any other socket failure.
async fn dial(
    host: &str,
    port: u16,
    deadline: Option<Instant>,
) -> std::result::Result<(), ConnectError> {
    let address = RemoteTarget::new(host, port).address();

    let attempt = async {
        let candidates = tokio::net::lookup_host((host, port))
            .await
            .map_err(|error| ConnectError::Lookup {
                host: host.to_owned(),
                message: error.to_string(),
            })?;

        let mut last_error = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(_) => return Ok(()),
                Err(error) => last_error = Some(error),
            }
        }

        Err(last_error.map_or_else(
            || ConnectError::Lookup {
                host: host.to_owned(),
                message: String::from("no addresses found"),
            },
            |error| classify_dial_error(&address, &error),
        ))
    };

    match deadline {
        Some(at) => tokio::time::timeout_at(at, attempt)
            .await
            .map_err(|_| ConnectError::TimedOut {
                address: address.clone(),
            })?,
        None => attempt.await,
    }
}

/// Maps a socket error from dialling `address` to a [`ConnectError`].
#[must_use]
fn classify_dial_error(address: &str, error: &io::Error) -> ConnectError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::Refused {
            address: address.to_owned(),
        },
        io::ErrorKind::TimedOut => ConnectError::TimedOut {
            address: address.to_owned(),
        },
        _ => ConnectError::Io {
            address: address.to_owned(),
            message: error.to_string(),
        },
    }
}

/// An established route to a remote engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    program: String,
    remote_engine: String,
    connect_timeout: Duration,
    target: RemoteTarget,
}

impl SshSession {
    /// Returns the remote target.
    #[must_use]
    pub const fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// Returns the remote engine command line for `engine_args`.
    #[must_use]
    pub fn remote_command(&self, engine_args: &[String]) -> Vec<String> {
        let mut command = vec![self.remote_engine.clone()];
        if let Some(socket) = &self.target.socket_path {
            command.push(String::from("--url"));
            command.push(format!("unix://{socket}"));
        }
        command.extend(engine_args.iter().cloned());
        command
    }

    /// Builds the client invocation that runs `engine_args` remotely.
    ///
    /// The login and host never reach the client's option parser: the user
    /// goes through `-l` and the host follows `--`.
    #[must_use]
    pub fn launch_spec(&self, engine_args: &[String]) -> LaunchSpec {
        let mut args = vec![
            String::from("-oBatchMode=yes"),
            format!("-oConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(user) = &self.target.user {
            args.push(String::from("-l"));
            args.push(user.clone());
        }
        args.push(String::from("-p"));
        args.push(self.target.port.to_string());
        if let Some(identity) = &self.target.identity {
            args.push(String::from("-i"));
            args.push(identity.to_string());
        }
        args.push(String::from("--"));
        args.push(self.target.host.clone());
        args.extend(self.remote_command(engine_args).iter().map(|word| quote(word)));
        LaunchSpec::new(self.program.clone(), args)
    }

    /// Runs `engine_args` on the remote engine.
    ///
    /// # Errors
    ///
    /// Returns the launcher's error when the client cannot be started.
    pub fn exec(
        &self,
        launcher: &dyn ProcessLauncher,
        engine_args: &[String],
        stdin: bool,
        output: OutputMode,
    ) -> Result<SpawnedProcess> {
        let mut spec = self.launch_spec(engine_args);
        spec.stdin = stdin;
        spec.stdout = output;
        tracing::debug!(
            event = "ssh.exec",
            address = %self.target.address(),
            command = %self.remote_command(engine_args).join(" "),
        );
        launcher.launch(&spec)
    }
}

/// Quotes `word` for the remote shell.
fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c));
    if safe {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
