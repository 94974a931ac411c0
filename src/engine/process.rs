//! Child processes and privilege switching.
//!
//! Image stores that are not reachable through the invoking user's engine
//! socket are driven through child processes: the engine CLI run as another
//! local account, or the secure-shell client for a remote host. The
//! [`ProcessLauncher`] seam lets tests substitute in-memory processes.
//!
//! The engine never changes its own credentials. When a child must run as
//! another account, [`HostLauncher`] either sets the child's uid and gid
//! before exec (when the engine runs as root) or wraps the command in the
//! configured switch program (`sudo -n -u #<uid> -g #<gid>`).

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::Command;

use crate::error::{Result, TransferError};
use crate::users::UserIdentity;

/// Directory holding per-user runtime directories.
const RUNTIME_DIR_ROOT: &str = "/run/user";

/// How a child's standard output is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Handed to the caller as a reader.
    Stream,
    /// Collected and returned with the exit status.
    Capture,
}

/// Description of a child process to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, excluding the program.
    pub args: Vec<String>,
    /// Account to run as; the engine's own account when `None`.
    pub run_as: Option<UserIdentity>,
    /// Whether the caller writes to the child's standard input.
    pub stdin: bool,
    /// How standard output is consumed.
    pub stdout: OutputMode,
}

impl LaunchSpec {
    /// Creates a spec that runs `program` as the engine's own account with
    /// captured output and no input.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            run_as: None,
            stdin: false,
            stdout: OutputMode::Capture,
        }
    }

    /// Runs the child as `user`.
    #[must_use]
    pub fn run_as(mut self, user: Option<UserIdentity>) -> Self {
        self.run_as = user;
        self
    }
}

/// How a child process finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code; `None` when the child was killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output ([`OutputMode::Capture`] only).
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ProcessExit {
    /// Returns `true` for a zero exit code.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Returns the trimmed standard error, or a description of the exit
    /// status when the child wrote nothing.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().collect::<Vec<_>>().join("; ");
        }
        self.code.map_or_else(
            || String::from("terminated by signal"),
            |code| format!("exit status {code}"),
        )
    }
}

/// Future resolving to a child's exit.
pub type ExitFuture = Pin<Box<dyn Future<Output = io::Result<ProcessExit>> + Send>>;

/// Writer for a child's standard input.
pub type ChildInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Reader for a child's standard output.
pub type ChildOutput = Box<dyn AsyncRead + Send + Unpin>;

/// A started child process.
///
/// Dropping `exit` before it resolves terminates the child.
pub struct SpawnedProcess {
    /// Standard input, when requested.
    pub stdin: Option<ChildInput>,
    /// Standard output, in [`OutputMode::Stream`].
    pub stdout: Option<ChildOutput>,
    /// Resolves once the child has exited and its output is collected.
    pub exit: ExitFuture,
}

/// Starts child processes.
pub trait ProcessLauncher: Send + Sync {
    /// Starts the process described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Spawn`] when the process cannot be started.
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedProcess>;
}

/// The concrete command a [`LaunchSpec`] becomes on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// uid and gid to set in the child before exec.
    pub credentials: Option<(u32, u32)>,
    /// Environment overrides.
    pub env: Vec<(String, String)>,
}

/// Launches real host processes with `tokio::process`.
#[derive(Debug, Clone)]
pub struct HostLauncher {
    switch_program: String,
    effective_uid: u32,
}

impl HostLauncher {
    /// Creates a launcher for an engine running as `effective_uid`, using
    /// `switch_program` when it must run a child as another account without
    /// being root.
    #[must_use]
    pub fn new(switch_program: impl Into<String>, effective_uid: u32) -> Self {
        Self {
            switch_program: switch_program.into(),
            effective_uid,
        }
    }

    /// Decides how `spec` runs on this host.
    #[must_use]
    pub fn prepare(&self, spec: &LaunchSpec) -> PreparedCommand {
        let target = spec
            .run_as
            .as_ref()
            .filter(|user| user.uid != self.effective_uid);

        let Some(user) = target else {
            return PreparedCommand {
                program: spec.program.clone(),
                args: spec.args.clone(),
                credentials: None,
                env: Vec::new(),
            };
        };

        if self.effective_uid == 0 {
            return PreparedCommand {
                program: spec.program.clone(),
                args: spec.args.clone(),
                credentials: Some((user.uid, user.gid)),
                env: vec![
                    (String::from("HOME"), user.home.to_string()),
                    (String::from("USER"), user.name.clone()),
                    (String::from("LOGNAME"), user.name.clone()),
                    (
                        String::from("XDG_RUNTIME_DIR"),
                        format!("{RUNTIME_DIR_ROOT}/{}", user.uid),
                    ),
                ],
            };
        }

        let mut args = vec![
            String::from("-n"),
            String::from("-H"),
            String::from("-u"),
            format!("#{}", user.uid),
            String::from("-g"),
            format!("#{}", user.gid),
            String::from("--"),
        ];
        args.push(spec.program.clone());
        args.extend(spec.args.iter().cloned());
        PreparedCommand {
            program: self.switch_program.clone(),
            args,
            credentials: None,
            env: Vec::new(),
        }
    }
}

impl ProcessLauncher for HostLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        let prepared = self.prepare(spec);
        tracing::debug!(
            event = "process.launch",
            program = %prepared.program,
            args = ?prepared.args,
            run_as = ?spec.run_as.as_ref().map(|user| user.uid),
            switched = prepared.credentials.is_some(),
        );

        let mut command = Command::new(&prepared.program);
        command
            .args(&prepared.args)
            .envs(prepared.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if spec.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some((uid, gid)) = prepared.credentials {
            command.uid(uid).gid(gid);
        }

        let mut child = command.spawn().map_err(|error| TransferError::Spawn {
            program: prepared.program.clone(),
            message: error.to_string(),
        })?;

        let stdin = child
            .stdin
            .take()
            .map(|pipe| Box::new(pipe) as ChildInput);
        let stdout_pipe = child.stdout.take();
        let stderr_task = child.stderr.take().map(|pipe| tokio::spawn(read_all(pipe)));

        let (stdout, stdout_task) = match spec.stdout {
            OutputMode::Stream => (stdout_pipe.map(|pipe| Box::new(pipe) as ChildOutput), None),
            OutputMode::Capture => (None, stdout_pipe.map(|pipe| tokio::spawn(read_all(pipe)))),
        };

        let exit = Box::pin(async move {
            let status = child.wait().await?;
            let stdout = match stdout_task {
                Some(task) => task.await.map_err(io::Error::other)??,
                None => String::new(),
            };
            let stderr = match stderr_task {
                Some(task) => task.await.map_err(io::Error::other)??,
                None => String::new(),
            };
            Ok(ProcessExit {
                code: status.code(),
                stdout,
                stderr,
            })
        });

        Ok(SpawnedProcess {
            stdin,
            stdout,
            exit,
        })
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<String> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
