//! Image stores that transfers export from and import into.
//!
//! The invoking user's store is reached through the engine API with
//! `bollard`; other local accounts and remote hosts are reached through the
//! engine CLI ([`EngineCli`]). Archives move as ordered streams of
//! [`Bytes`] chunks and are never buffered whole.

use std::future::Future;
use std::io;
use std::pin::Pin;

use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{ImportImageOptionsBuilder, TagImageOptionsBuilder};
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{ContainerError, Result, ScpError, StreamSide, TransferError};

mod cli;

pub use cli::EngineCli;


/// Chunks buffered between a producer and the engine API import.
const IMPORT_CHANNEL_CAPACITY: usize = 16;

/// An image archive in transit.
pub type ImageArchiveStream<'a> = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'a>>;

/// Boxed future returned by [`ImageStore`] operations.
pub type ImageStoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// An image store that can export and import archives.
pub trait ImageStore: Send + Sync {
    /// Returns whether `reference` names an image in the store.
    fn exists<'a>(&'a self, reference: &'a str) -> ImageStoreFuture<'a, bool>;

    /// Streams `reference` out of the store as an archive.
    ///
    /// A failure part-way through is yielded as an error item; the stream is
    /// never silently truncated.
    fn export<'a>(&'a self, reference: &'a str) -> ImageArchiveStream<'a>;

    /// Imports an archive, returning the reference it was loaded as.
    ///
    /// An error item in `archive` aborts the import.
    fn import<'a>(&'a self, archive: ImageArchiveStream<'a>) -> ImageStoreFuture<'a, String>;

    /// Adds `target` as a name for the image `source`.
    fn tag<'a>(&'a self, source: &'a str, target: &'a str) -> ImageStoreFuture<'a, ()>;
}

/// Extracts the image reference from engine `load` output.
///
/// Recognises `Loaded image: <ref>` and `Loaded image(s): <ref>[,<ref>...]`
/// and returns the first reference.
fn parse_loaded_reference(output: &str) -> Option<String> {
    output.lines().map(str::trim).find_map(|line| {
        line.strip_prefix("Loaded image(s):")
            .or_else(|| line.strip_prefix("Loaded image:"))
            .or_else(|| line.strip_prefix("Loaded image ID:"))
            .and_then(|rest| rest.split(',').next())
            .map(str::trim)
            .filter(|reference| !reference.is_empty())
            .map(String::from)
    })
}

/// Splits `repo[:tag]` without mistaking a registry port for a tag.
fn split_tag(reference: &str) -> (&str, Option<&str>) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, Some(tag)),
        _ => (reference, None),
    }
}

fn request_failed(error: &BollardError) -> ScpError {
    ContainerError::RequestFailed {
        message: error.to_string(),
    }
    .into()
}

const fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Turns the receiving end of the import channel into a request body.
fn import_body(
    receiver: mpsc::Receiver<io::Result<Bytes>>,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    })
}

/// Forwards `archive` into the import channel.
///
/// A producer error is sent on as an error item before it is returned, so
/// the body never ends cleanly after a truncated archive.
async fn relay(
    mut archive: ImageArchiveStream<'_>,
    sender: mpsc::Sender<io::Result<Bytes>>,
) -> Result<()> {
    while let Some(item) = archive.next().await {
        match item {
            Ok(chunk) => {
                if sender.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                let aborted = io::Error::other(error.to_string());
                if sender.send(Err(aborted)).await.is_err() {
                    tracing::debug!(event = "image.import_body_closed");
                }
                return Err(error);
            }
        }
    }
    Ok(())
}

impl ImageStore for Docker {
    fn exists<'a>(&'a self, reference: &'a str) -> ImageStoreFuture<'a, bool> {
        Box::pin(async move {
            match self.inspect_image(reference).await {
                Ok(_) => Ok(true),
                Err(error) if is_not_found(&error) => Ok(false),
                Err(error) => Err(request_failed(&error)),
            }
        })
    }

    fn export<'a>(&'a self, reference: &'a str) -> ImageArchiveStream<'a> {
        Box::pin(self.export_image(reference).map(|chunk| {
            chunk.map_err(|error| {
                ScpError::from(TransferError::Stream {
                    side: StreamSide::Producer,
                    message: error.to_string(),
                })
            })
        }))
    }

    fn import<'a>(&'a self, archive: ImageArchiveStream<'a>) -> ImageStoreFuture<'a, String> {
        Box::pin(async move {
            // The API client needs a 'static body, so chunks are relayed
            // through a bounded channel fed from this task.
            let (sender, receiver) = mpsc::channel::<io::Result<Bytes>>(IMPORT_CHANNEL_CAPACITY);
            let body = import_body(receiver);

            let feed = relay(archive, sender);

            let options = ImportImageOptionsBuilder::new().quiet(true).build();
            let import = async {
                let mut loaded = None;
                let mut progress = self.import_image_stream(options, body, None);
                while let Some(item) = progress.next().await {
                    let info = item.map_err(|error| TransferError::Stream {
                        side: StreamSide::Consumer,
                        message: error.to_string(),
                    })?;
                    if let Some(detail) = info.error_detail.and_then(|detail| detail.message) {
                        return Err(TransferError::Stream {
                            side: StreamSide::Consumer,
                            message: detail,
                        }
                        .into());
                    }
                    if let Some(reference) = info.stream.as_deref().and_then(parse_loaded_reference)
                    {
                        loaded = Some(reference);
                    }
                }
                Ok::<Option<String>, ScpError>(loaded)
            };

            tokio::pin!(feed);
            tokio::pin!(import);

            let loaded = tokio::select! {
                fed = &mut feed => {
                    fed?;
                    import.await?
                }
                imported = &mut import => {
                    let loaded = imported?;
                    feed.await?;
                    loaded
                }
            };

            loaded.ok_or_else(|| {
                TransferError::Stream {
                    side: StreamSide::Consumer,
                    message: String::from("engine did not report the loaded image"),
                }
                .into()
            })
        })
    }

    fn tag<'a>(&'a self, source: &'a str, target: &'a str) -> ImageStoreFuture<'a, ()> {
        Box::pin(async move {
            let (repo, tag) = split_tag(target);
            let mut builder = TagImageOptionsBuilder::new().repo(repo);
            if let Some(tag) = tag {
                builder = builder.tag(tag);
            }
            self.tag_image(source, Some(builder.build()))
                .await
                .map_err(|error| request_failed(&error))
        })
    }
}
