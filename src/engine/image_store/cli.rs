//! Image store driven through the engine CLI.
//!
//! Used for stores the engine API socket cannot reach: another local
//! account's rootless store (through the privilege switch) and a remote
//! host's store (through a secure-shell session).

use futures_util::stream::{self, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{ImageArchiveStream, ImageStore, ImageStoreFuture, parse_loaded_reference};
use crate::engine::{
    ChildOutput, ExitFuture, LaunchSpec, OutputMode, ProcessExit, ProcessLauncher, SpawnedProcess,
};
use crate::error::{ConnectError, Result, ScpError, StreamSide, TransferError};
use crate::transport::SshSession;
use crate::users::UserIdentity;

/// Read size for archive chunks.
const CHUNK_SIZE: usize = 64 * 1024;

/// Exit status the OpenSSH client reserves for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Exit status of `image exists` for a missing image.
const IMAGE_MISSING: i32 = 1;

/// Where engine commands run.
#[derive(Debug, Clone)]
enum CommandHost {
    /// On this machine, optionally as another account.
    Local {
        /// Engine CLI program.
        program: String,
        /// Account to run as.
        run_as: Option<UserIdentity>,
    },
    /// On a remote host.
    Remote(SshSession),
}

/// An [`ImageStore`] operated through engine CLI commands.
pub struct EngineCli<'a> {
    launcher: &'a dyn ProcessLauncher,
    host: CommandHost,
}

impl<'a> EngineCli<'a> {
    /// Creates a store for a local account.
    #[must_use]
    pub fn local(
        launcher: &'a dyn ProcessLauncher,
        program: impl Into<String>,
        run_as: Option<UserIdentity>,
    ) -> Self {
        Self {
            launcher,
            host: CommandHost::Local {
                program: program.into(),
                run_as,
            },
        }
    }

    /// Creates a store on the far side of `session`.
    #[must_use]
    pub const fn remote(launcher: &'a dyn ProcessLauncher, session: SshSession) -> Self {
        Self {
            launcher,
            host: CommandHost::Remote(session),
        }
    }

    fn launch(
        &self,
        args: &[String],
        stdin: bool,
        output: OutputMode,
    ) -> Result<SpawnedProcess> {
        match &self.host {
            CommandHost::Local { program, run_as } => {
                let mut spec = LaunchSpec::new(program.clone(), args.to_vec()).run_as(run_as.clone());
                spec.stdin = stdin;
                spec.stdout = output;
                self.launcher.launch(&spec)
            }
            CommandHost::Remote(session) => session.exec(self.launcher, args, stdin, output),
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        match &self.host {
            CommandHost::Local { program, .. } => std::iter::once(program.clone())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" "),
            CommandHost::Remote(session) => session.remote_command(args).join(" "),
        }
    }

    /// Maps an unsuccessful exit of `args` to the error for this host.
    fn failure(&self, side: StreamSide, args: &[String], exit: &ProcessExit) -> ScpError {
        let command = self.command_line(args);
        match &self.host {
            CommandHost::Local { .. } => TransferError::Stream {
                side,
                message: format!("{command}: {}", exit.diagnostic()),
            }
            .into(),
            CommandHost::Remote(session) if exit.code == Some(SSH_CLIENT_FAILURE) => {
                ConnectError::Session {
                    address: session.target().address(),
                    message: exit.diagnostic(),
                }
                .into()
            }
            CommandHost::Remote(session) => TransferError::RemoteExec {
                host: session.target().host.clone(),
                command,
                status: exit.code.unwrap_or(-1),
                stderr: exit.diagnostic(),
            }
            .into(),
        }
    }

    async fn run_captured(&self, args: &[String], side: StreamSide) -> Result<ProcessExit> {
        let process = self.launch(args, false, OutputMode::Capture)?;
        process
            .exit
            .await
            .map_err(|error| stream_error(side, &error))
    }
}

fn stream_error(side: StreamSide, error: &std::io::Error) -> ScpError {
    TransferError::Stream {
        side,
        message: error.to_string(),
    }
    .into()
}

fn args(words: &[&str]) -> Vec<String> {
    words.iter().map(|word| String::from(*word)).collect()
}

/// State of an export while its output is being read.
enum ExportState {
    Reading {
        stdout: ChildOutput,
        exit: ExitFuture,
    },
    Finished,
}

enum FeedError {
    Producer(ScpError),
    Write(std::io::Error),
}

/// Which side of an import finished first.
enum ImportRace {
    Fed(std::result::Result<(), FeedError>),
    Exited(std::io::Result<ProcessExit>),
}

impl ImageStore for EngineCli<'_> {
    fn exists<'a>(&'a self, reference: &'a str) -> ImageStoreFuture<'a, bool> {
        Box::pin(async move {
            let command = args(&["image", "exists", reference]);
            let exit = self.run_captured(&command, StreamSide::Producer).await?;
            match exit.code {
                Some(0) => Ok(true),
                Some(IMAGE_MISSING) => Ok(false),
                _ => Err(self.failure(StreamSide::Producer, &command, &exit)),
            }
        })
    }

    fn export<'a>(&'a self, reference: &'a str) -> ImageArchiveStream<'a> {
        let command = args(&["save", "--quiet", reference]);
        let initial = match self.launch(&command, false, OutputMode::Stream) {
            Ok(process) => match process.stdout {
                Some(stdout) => Ok(ExportState::Reading {
                    stdout,
                    exit: process.exit,
                }),
                None => Err(stream_error(
                    StreamSide::Producer,
                    &std::io::Error::other("export produced no output stream"),
                )),
            },
            Err(error) => Err(error),
        };

        let chunks = stream::unfold(Some(initial), move |state| {
            let save_args = command.clone();
            async move {
                match state? {
                    Err(error) => Some((Err(error), None)),
                    Ok(ExportState::Finished) => None,
                    Ok(ExportState::Reading { mut stdout, exit }) => {
                        let mut buffer = vec![0_u8; CHUNK_SIZE];
                        match stdout.read(&mut buffer).await {
                            Ok(0) => {
                                drop(stdout);
                                match exit.await {
                                    Ok(status) if status.success() => None,
                                    Ok(status) => Some((
                                        Err(self.failure(StreamSide::Producer, &save_args, &status)),
                                        Some(Ok(ExportState::Finished)),
                                    )),
                                    Err(error) => Some((
                                        Err(stream_error(StreamSide::Producer, &error)),
                                        Some(Ok(ExportState::Finished)),
                                    )),
                                }
                            }
                            Ok(read) => {
                                buffer.truncate(read);
                                Some((
                                    Ok(bytes::Bytes::from(buffer)),
                                    Some(Ok(ExportState::Reading { stdout, exit })),
                                ))
                            }
                            Err(error) => Some((
                                Err(stream_error(StreamSide::Producer, &error)),
                                Some(Ok(ExportState::Finished)),
                            )),
                        }
                    }
                }
            }
        });
        Box::pin(chunks)
    }

    fn import<'a>(&'a self, mut archive: ImageArchiveStream<'a>) -> ImageStoreFuture<'a, String> {
        Box::pin(async move {
            let command = args(&["load"]);
            let process = self.launch(&command, true, OutputMode::Capture)?;
            let mut exit = process.exit;
            let mut stdin = process.stdin.ok_or_else(|| {
                stream_error(
                    StreamSide::Consumer,
                    &std::io::Error::other("import has no input stream"),
                )
            })?;

            let race = {
                let feed = async {
                    while let Some(item) = archive.next().await {
                        let chunk = item.map_err(FeedError::Producer)?;
                        stdin.write_all(&chunk).await.map_err(FeedError::Write)?;
                    }
                    stdin.shutdown().await.map_err(FeedError::Write)
                };
                tokio::pin!(feed);
                tokio::select! {
                    biased;
                    fed = &mut feed => ImportRace::Fed(fed),
                    exited = &mut exit => ImportRace::Exited(exited),
                }
            };

            let status = match race {
                ImportRace::Fed(Ok(())) => exit.await,
                ImportRace::Fed(Err(FeedError::Producer(error))) => {
                    // Killed with its input still open: the consumer never
                    // sees end-of-file after a partial archive.
                    drop(exit);
                    drop(stdin);
                    return Err(error);
                }
                ImportRace::Fed(Err(FeedError::Write(write_error))) => match exit.await {
                    Ok(status) if !status.success() => Ok(status),
                    _ => return Err(stream_error(StreamSide::Consumer, &write_error)),
                },
                ImportRace::Exited(Ok(status)) if status.success() => {
                    return Err(stream_error(
                        StreamSide::Consumer,
                        &std::io::Error::other("import finished before the whole archive was sent"),
                    ));
                }
                ImportRace::Exited(other) => other,
            }
            .map_err(|error| stream_error(StreamSide::Consumer, &error))?;

            if !status.success() {
                return Err(self.failure(StreamSide::Consumer, &command, &status));
            }

            parse_loaded_reference(&status.stdout).ok_or_else(|| {
                stream_error(
                    StreamSide::Consumer,
                    &std::io::Error::other("engine did not report the loaded image"),
                )
            })
        })
    }

    fn tag<'a>(&'a self, source: &'a str, target: &'a str) -> ImageStoreFuture<'a, ()> {
        Box::pin(async move {
            let command = args(&["tag", source, target]);
            let exit = self.run_captured(&command, StreamSide::Consumer).await?;
            if exit.success() {
                Ok(())
            } else {
                Err(self.failure(StreamSide::Consumer, &command, &exit))
            }
        })
    }
}
