//! A simulated container engine reached through the process seam.
//!
//! Every local account and remote host gets its own in-memory store. Engine
//! commands are routed to a store by the account a child runs as or by the
//! secure-shell host, so the whole CLI path (`image exists`, `save`,
//! `load`, `tag`) runs unchanged against it.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use podscp::engine::{
    ChildInput, ChildOutput, LaunchSpec, OutputMode, ProcessExit, ProcessLauncher, SpawnedProcess,
};
use podscp::error::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Uid of the account running the transfer.
pub(crate) const INVOKER_UID: u32 = 1000;

const PIPE_CAPACITY: usize = 8 * 1024;

/// Identifies one image store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum StoreKey {
    /// A local account's store.
    Local(u32),
    /// A remote host's store.
    Remote(String),
}

type Stores = BTreeMap<StoreKey, BTreeMap<String, Vec<u8>>>;

enum Reply {
    Exit(ProcessExit),
    Stream(Vec<u8>),
    Load,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeEngine {
    invoker_uid: u32,
    stores: Arc<Mutex<Stores>>,
    launched: Arc<Mutex<Vec<LaunchSpec>>>,
}

impl FakeEngine {
    pub(crate) fn new(invoker_uid: u32) -> Self {
        Self {
            invoker_uid,
            ..Self::default()
        }
    }

    /// Adds `reference` to the store `key`.
    pub(crate) fn add_image(&self, key: StoreKey, reference: &str) {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .insert(
                String::from(reference),
                format!("{reference}\npayload").into_bytes(),
            );
    }

    pub(crate) fn holds(&self, key: &StoreKey, reference: &str) -> bool {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|images| images.contains_key(reference))
    }

    pub(crate) fn launched(&self) -> Vec<LaunchSpec> {
        self.launched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Splits `spec` into the store it addresses and the engine arguments.
    fn route(&self, spec: &LaunchSpec) -> (StoreKey, Vec<String>) {
        let separator = (spec.program == "ssh")
            .then(|| spec.args.iter().position(|arg| arg == "--"))
            .flatten();
        let Some(separator) = separator else {
            let uid = spec.run_as.as_ref().map_or(self.invoker_uid, |user| user.uid);
            return (StoreKey::Local(uid), spec.args.clone());
        };
        let host = spec
            .args
            .get(separator + 1)
            .cloned()
            .unwrap_or_default();
        // Skip the host, the remote engine program and any `--url <socket>` pair.
        let mut words: Vec<String> = spec.args.iter().skip(separator + 3).cloned().collect();
        if words.first().is_some_and(|word| word == "--url") {
            words.drain(..2);
        }
        (StoreKey::Remote(host), words)
    }

    fn reply(&self, key: &StoreKey, args: &[String]) -> Reply {
        let images = self
            .stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default();
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["image", "exists", reference] => {
                Reply::Exit(exit(i32::from(!images.contains_key(*reference)), ""))
            }
            ["save", "--quiet", reference] => images.get(*reference).cloned().map_or_else(
                || Reply::Exit(exit(125, &format!("Error: {reference}: image not known"))),
                Reply::Stream,
            ),
            ["load"] => Reply::Load,
            ["tag", source, target] => match images.get(*source) {
                Some(archive) => {
                    self.store(key, target, archive.clone());
                    Reply::Exit(exit(0, ""))
                }
                None => Reply::Exit(exit(125, &format!("Error: {source}: image not known"))),
            },
            other => Reply::Exit(exit(125, &format!("Error: unexpected command {other:?}"))),
        }
    }

    fn store(&self, key: &StoreKey, reference: &str, archive: Vec<u8>) {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .insert(String::from(reference), archive);
    }
}

fn exit(code: i32, stderr: &str) -> ProcessExit {
    ProcessExit {
        code: Some(code),
        stdout: String::new(),
        stderr: String::from(stderr),
    }
}

impl ProcessLauncher for FakeEngine {
    fn launch(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
        self.launched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        let (key, words) = self.route(spec);
        let reply = self.reply(&key, &words);

        let (stdin, input) = if spec.stdin {
            let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
            (Some(Box::new(writer) as ChildInput), Some(reader))
        } else {
            (None, None)
        };

        let streamed = match &reply {
            Reply::Stream(bytes) => bytes.clone(),
            Reply::Exit(_) | Reply::Load => Vec::new(),
        };
        let stdout = (spec.stdout == OutputMode::Stream).then(|| {
            let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
            tokio::spawn(async move { writer.write_all(&streamed).await });
            Box::new(reader) as ChildOutput
        });

        let engine = self.clone();
        let exit_future = Box::pin(async move {
            match reply {
                Reply::Exit(status) => Ok(status),
                Reply::Stream(_) => Ok(exit(0, "")),
                Reply::Load => {
                    let mut reader =
                        input.ok_or_else(|| io::Error::other("load started without input"))?;
                    let mut archive = Vec::new();
                    reader.read_to_end(&mut archive).await?;
                    let reference = String::from_utf8_lossy(&archive)
                        .lines()
                        .next()
                        .unwrap_or_default()
                        .to_owned();
                    engine.store(&key, &reference, archive);
                    Ok(ProcessExit {
                        code: Some(0),
                        stdout: format!("Loaded image: {reference}\n"),
                        stderr: String::new(),
                    })
                }
            }
        });

        Ok(SpawnedProcess {
            stdin,
            stdout,
            exit: exit_future,
        })
    }
}
