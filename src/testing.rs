//! In-memory process and store doubles shared by unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, TryStreamExt};
use mockall::mock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::engine::{
    ChildInput, ChildOutput, ImageArchiveStream, ImageStore, ImageStoreFuture, LaunchSpec,
    OutputMode, ProcessExit, ProcessLauncher, SpawnedProcess,
};
use crate::error::{Result, StreamSide, TransferError};
use crate::plan::RemoteTarget;
use crate::transport::{ConnectFuture, OpenSshClient, SecureShell};

/// Buffer size of the in-memory pipes.
const PIPE_CAPACITY: usize = 8 * 1024;

mock! {
    pub Shell {}

    impl SecureShell for Shell {
        fn connect(&self, target: &RemoteTarget, deadline: Option<Instant>) -> ConnectFuture;
    }
}

/// A shell whose sessions connect without dialling.
pub fn connecting_shell() -> MockShell {
    let mut shell = MockShell::new();
    shell.expect_connect().returning(|target, _| {
        let session =
            OpenSshClient::new("ssh", "podman", Duration::from_secs(30)).session(target.clone());
        Box::pin(async move { Ok(session) })
    });
    shell
}

/// Scripted behaviour of one fake child.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Bytes written to a streamed standard output.
    pub stdout: Vec<u8>,
    /// Text returned as captured standard output.
    pub captured: String,
    /// Standard error text.
    pub stderr: String,
    /// Exit code.
    pub code: Option<i32>,
    /// Whether the child reads its whole input before exiting.
    pub reads_input: bool,
}

impl Script {
    pub fn exits(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn streaming(stdout: &[u8]) -> Self {
        Self {
            stdout: stdout.to_vec(),
            code: Some(0),
            ..Self::default()
        }
    }

    pub fn loading(captured: &str) -> Self {
        Self {
            captured: String::from(captured),
            code: Some(0),
            reads_input: true,
            ..Self::default()
        }
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            stderr: String::from(stderr),
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, stdout: &[u8]) -> Self {
        self.stdout = stdout.to_vec();
        self
    }
}

/// Marks a fake child as killed when its exit future is dropped.
struct KillOnDrop(Arc<AtomicBool>);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A launcher that plays back [`Script`]s in order.
///
/// A child that reads its input does so on its own task, like a real
/// process. Only input that reaches end-of-file before the child is killed
/// counts as received.
#[derive(Debug, Default, Clone)]
pub struct FakeLauncher {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    launched: Arc<Mutex<Vec<LaunchSpec>>>,
    received: Arc<Mutex<Vec<u8>>>,
    readers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FakeLauncher {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            ..Self::default()
        }
    }

    /// Specs launched so far.
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().expect("launch log lock").clone()
    }

    /// The first spec launched.
    pub fn first_launch(&self) -> LaunchSpec {
        self.launched()
            .first()
            .cloned()
            .expect("a process should have been launched")
    }

    /// Bytes read to end-of-file by children that consume their input.
    pub fn received(&self) -> Vec<u8> {
        self.received.lock().expect("input log lock").clone()
    }

    /// Waits for every child reading its input to finish.
    pub async fn settle(&self) {
        let readers: Vec<JoinHandle<()>> =
            self.readers.lock().expect("reader lock").drain(..).collect();
        for reader in readers {
            reader.await.expect("reader task should not panic");
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        self.launched
            .lock()
            .expect("launch log lock")
            .push(spec.clone());
        let script = self
            .scripts
            .lock()
            .expect("script lock")
            .pop_front()
            .ok_or_else(|| TransferError::Spawn {
                program: spec.program.clone(),
                message: String::from("no script left"),
            })?;

        let (stdin, stdin_reader) = if spec.stdin {
            let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
            (Some(Box::new(writer) as ChildInput), Some(reader))
        } else {
            (None, None)
        };

        let stdout = match spec.stdout {
            OutputMode::Stream => {
                let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
                let bytes = script.stdout.clone();
                tokio::spawn(async move {
                    let written = writer.write_all(&bytes).await;
                    drop(writer);
                    written
                });
                Some(Box::new(reader) as ChildOutput)
            }
            OutputMode::Capture => None,
        };

        let killed = Arc::new(AtomicBool::new(false));
        let (read_done, read_result) = oneshot::channel::<io::Result<()>>();
        match stdin_reader {
            Some(mut reader) if script.reads_input => {
                let received = Arc::clone(&self.received);
                let child_killed = Arc::clone(&killed);
                let task = tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let read = reader.read_to_end(&mut buffer).await.map(|_| ());
                    if !child_killed.load(Ordering::SeqCst) {
                        received
                            .lock()
                            .expect("input log lock")
                            .extend_from_slice(&buffer);
                    }
                    read_done.send(read).ok();
                });
                self.readers.lock().expect("reader lock").push(task);
            }
            _ => {
                read_done.send(Ok(())).ok();
            }
        }

        let exit = Box::pin(async move {
            let _kill = KillOnDrop(killed);
            read_result
                .await
                .map_err(|_| io::Error::other("input reader vanished"))??;
            Ok(ProcessExit {
                code: script.code,
                stdout: script.captured,
                stderr: script.stderr,
            })
        });

        Ok(SpawnedProcess {
            stdin,
            stdout,
            exit,
        })
    }
}

/// An image store held in memory.
///
/// An image's archive is its reference followed by a newline and a payload;
/// importing stores the archive under the reference on its first line.
#[derive(Debug, Default)]
pub struct MemoryStore {
    images: Mutex<BTreeMap<String, Vec<u8>>>,
    tags: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn with_image(reference: &str) -> Self {
        let store = Self::default();
        store
            .images
            .lock()
            .expect("image lock")
            .insert(String::from(reference), format!("{reference}\npayload").into_bytes());
        store
    }

    pub fn contains(&self, reference: &str) -> bool {
        self.images.lock().expect("image lock").contains_key(reference)
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags.lock().expect("tag lock").clone()
    }

    /// The archive stored under `reference`.
    pub fn archive(&self, reference: &str) -> Option<Vec<u8>> {
        self.images.lock().expect("image lock").get(reference).cloned()
    }
}

impl ImageStore for MemoryStore {
    fn exists<'a>(&'a self, reference: &'a str) -> ImageStoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.contains(reference)) })
    }

    fn export<'a>(&'a self, reference: &'a str) -> ImageArchiveStream<'a> {
        let archive = self.images.lock().expect("image lock").get(reference).cloned();
        let chunks: Vec<Result<Bytes>> = match archive {
            Some(bytes) => bytes
                .chunks(4)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect(),
            None => vec![Err(TransferError::Stream {
                side: StreamSide::Producer,
                message: format!("{reference}: image not known"),
            }
            .into())],
        };
        Box::pin(stream::iter(chunks))
    }

    fn import<'a>(&'a self, archive: ImageArchiveStream<'a>) -> ImageStoreFuture<'a, String> {
        Box::pin(async move {
            let chunks: Vec<Bytes> = archive.try_collect().await?;
            let bytes = chunks.concat();
            let reference = String::from_utf8_lossy(&bytes)
                .lines()
                .next()
                .unwrap_or_default()
                .to_owned();
            self.images
                .lock()
                .expect("image lock")
                .insert(reference.clone(), bytes);
            Ok(reference)
        })
    }

    fn tag<'a>(&'a self, source: &'a str, target: &'a str) -> ImageStoreFuture<'a, ()> {
        Box::pin(async move {
            let mut images = self.images.lock().expect("image lock");
            let archive = images.get(source).cloned().unwrap_or_default();
            images.insert(String::from(target), archive);
            self.tags
                .lock()
                .expect("tag lock")
                .push((String::from(source), String::from(target)));
            Ok(())
        })
    }
}
