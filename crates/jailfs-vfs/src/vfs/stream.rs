//! Lazy, cancellable stream adapters.
//!
//! Opening a file through the jail needs an async resolution, but callers get
//! their stream back synchronously. The open future is parked inside the
//! stream and driven by the first poll (read) or first operation (write), so
//! an open failure shows up as the stream's terminal error instead of being
//! lost.
//!
//! Both directions take a [`CancellationToken`]; once it fires, the next item
//! or operation yields `ECANCELED` and the stream is finished.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::error::{VfsError, VfsResult};
use super::host::HostError;
use super::types::ReadStreamOptions;

/// An opened host file plus its real path (for error messages).
#[derive(Debug)]
pub struct OpenedFile {
    pub file: File,
    pub path: PathBuf,
}

/// Deferred open: resolves the path and opens the file when first driven.
pub type PendingOpen = BoxFuture<'static, VfsResult<OpenedFile>>;

enum ReadState {
    Opening(PendingOpen),
    Reading {
        opened: OpenedFile,
        remaining: Option<u64>,
    },
    Done,
}

/// Byte stream over a file in the jail.
///
/// Yields chunks of at most `chunk_size` bytes. Any error, including a failed
/// open or cancellation, is the final item.
pub struct ReadStream {
    inner: BoxStream<'static, VfsResult<Vec<u8>>>,
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream").finish_non_exhaustive()
    }
}

impl ReadStream {
    /// Wrap a pending open. Returns immediately; nothing runs until polled.
    pub fn new(open: PendingOpen, options: ReadStreamOptions, cancel: CancellationToken) -> Self {
        let chunk_size = options.chunk_size.max(1);
        let state = ReadState::Opening(open);

        let inner = futures::stream::unfold(state, move |state| {
            let cancel = cancel.clone();
            async move {
                let (mut opened, remaining) = match state {
                    ReadState::Done => return None,
                    ReadState::Reading { opened, remaining } => (opened, remaining),
                    ReadState::Opening(open) => {
                        let result = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Err(VfsError::cancelled()),
                            result = open => result,
                        };
                        let seeked = match result {
                            Ok(opened) => seek_to(opened, options.position).await,
                            Err(e) => Err(e),
                        };
                        match seeked {
                            Ok(opened) => (opened, options.length),
                            Err(e) => return Some((Err(e), ReadState::Done)),
                        }
                    }
                };

                let want = match remaining {
                    Some(0) => return None,
                    Some(left) => left.min(chunk_size as u64) as usize,
                    None => chunk_size,
                };

                let mut buf = vec![0u8; want];
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Some((Err(VfsError::cancelled()), ReadState::Done)),
                    read = opened.file.read(&mut buf) => read,
                };

                match read {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        let remaining = remaining.map(|left| left - n as u64);
                        Some((Ok(buf), ReadState::Reading { opened, remaining }))
                    }
                    Err(e) => {
                        let err = VfsError::from(HostError::at("read", &opened.path, e));
                        Some((Err(err), ReadState::Done))
                    }
                }
            }
        });

        Self {
            inner: Box::pin(inner),
        }
    }
}

async fn seek_to(mut opened: OpenedFile, position: u64) -> VfsResult<OpenedFile> {
    if position > 0 {
        opened
            .file
            .seek(std::io::SeekFrom::Start(position))
            .await
            .map_err(|e| HostError::at("read", &opened.path, e))?;
    }
    Ok(opened)
}

impl Stream for ReadStream {
    type Item = VfsResult<Vec<u8>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

enum WriteState {
    Opening(PendingOpen),
    Open(OpenedFile),
    Failed,
}

/// Write side of the stream bridge.
///
/// Created synchronously; the first [`write`](Self::write) or
/// [`close`](Self::close) completes the open and reports its failure.
pub struct WriteStream {
    state: WriteState,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            WriteState::Opening(_) => "opening",
            WriteState::Open(_) => "open",
            WriteState::Failed => "failed",
        };
        f.debug_struct("WriteStream").field("state", &state).finish()
    }
}

impl WriteStream {
    pub fn new(open: PendingOpen, cancel: CancellationToken) -> Self {
        Self {
            state: WriteState::Opening(open),
            cancel,
        }
    }

    /// Write a chunk. Data is flushed to the host before returning.
    pub async fn write(&mut self, chunk: &[u8]) -> VfsResult<()> {
        let cancel = self.cancel.clone();
        let opened = self.ensure_open().await?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VfsError::cancelled()),
            result = write_chunk(opened, chunk) => result,
        };
        if result.is_err() {
            self.state = WriteState::Failed;
        }
        result
    }

    /// Finish the stream, surfacing a deferred open failure if there was one.
    pub async fn close(mut self) -> VfsResult<()> {
        let cancel = self.cancel.clone();
        let opened = self.ensure_open().await?;
        let path = opened.path.clone();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VfsError::cancelled()),
            result = opened.file.shutdown() => {
                result.map_err(|e| VfsError::from(HostError::at("close", &path, e)))
            }
        }
    }

    async fn ensure_open(&mut self) -> VfsResult<&mut OpenedFile> {
        if self.cancel.is_cancelled() {
            self.state = WriteState::Failed;
            return Err(VfsError::cancelled());
        }

        let state = std::mem::replace(&mut self.state, WriteState::Failed);
        self.state = match state {
            WriteState::Open(opened) => WriteState::Open(opened),
            WriteState::Failed => {
                return Err(VfsError::other("write stream already failed"));
            }
            WriteState::Opening(open) => {
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Err(VfsError::cancelled()),
                    result = open => result,
                };
                WriteState::Open(result?)
            }
        };

        match &mut self.state {
            WriteState::Open(opened) => Ok(opened),
            _ => Err(VfsError::other("write stream is not open")),
        }
    }
}

async fn write_chunk(opened: &mut OpenedFile, chunk: &[u8]) -> VfsResult<()> {
    opened
        .file
        .write_all(chunk)
        .await
        .map_err(|e| HostError::at("write", &opened.path, e))?;
    opened
        .file
        .flush()
        .await
        .map_err(|e| HostError::at("write", &opened.path, e))?;
    Ok(())
}
