//! Chunk writer
//!
//! Owns the write half of the transport and the outgoing chunk state.
//! Messages are chunked into a scratch buffer and written out with a per
//! attempt timeout; transient failures (timeouts, `WouldBlock`,
//! `Interrupted`) are retried a bounded number of times before the error is
//! surfaced.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::chunk::{ChunkEncoder, RawMessage};
use super::message::RtmpMessage;
use crate::error::{Error, Result};

/// Outcome of one successful write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    /// Bytes put on the wire, chunk headers included
    pub bytes: usize,
    /// Attempts that failed transiently before the write completed
    pub retries: u32,
}

/// Writes messages as chunks to an async transport
pub struct ChunkWriter<W> {
    inner: W,
    encoder: ChunkEncoder,
    scratch: BytesMut,
    write_timeout: Duration,
    max_retries: u32,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    pub fn new(inner: W, write_timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            encoder: ChunkEncoder::new(),
            scratch: BytesMut::with_capacity(64 * 1024),
            write_timeout,
            max_retries,
        }
    }

    pub fn chunk_size(&self) -> u32 {
        self.encoder.chunk_size()
    }

    /// Announce and switch to a larger outgoing chunk size
    pub async fn set_chunk_size(&mut self, size: u32) -> Result<WriteReport> {
        let report = self
            .send(&RtmpMessage::SetChunkSize(size).to_raw(0), false)
            .await?;
        self.encoder.set_chunk_size(size)?;
        tracing::debug!(chunk_size = size, "Outgoing chunk size changed");
        Ok(report)
    }

    /// Write a typed message on its conventional chunk stream
    pub async fn write_message(&mut self, msg: &RtmpMessage, stream_id: u32) -> Result<WriteReport> {
        self.send(&msg.to_raw(stream_id), false).await
    }

    /// Chunk and write `msg`.
    ///
    /// `sync` forces a fmt 0 header so the receiver resynchronises the
    /// chunk stream on an absolute timestamp.
    pub async fn send(&mut self, msg: &RawMessage, sync: bool) -> Result<WriteReport> {
        self.scratch.clear();
        if sync {
            self.encoder.encode_sync(msg, &mut self.scratch);
        } else {
            self.encoder.encode(msg, &mut self.scratch);
        }
        self.flush_scratch().await
    }

    async fn flush_scratch(&mut self) -> Result<WriteReport> {
        let mut written = 0;
        let mut retries = 0;

        while written < self.scratch.len() {
            let attempt = tokio::time::timeout(
                self.write_timeout,
                self.inner.write(&self.scratch[written..]),
            )
            .await;

            let err = match attempt {
                Ok(Ok(0)) => Error::from(std::io::Error::from(std::io::ErrorKind::WriteZero)),
                Ok(Ok(n)) => {
                    written += n;
                    continue;
                }
                Ok(Err(e)) => Error::from(e),
                Err(_) => Error::Timeout("write"),
            };

            if !err.is_transient() || retries >= self.max_retries {
                return Err(err);
            }
            retries += 1;
            tracing::warn!(retries = retries, written = written, error = %err, "Retrying chunk write");
        }

        match tokio::time::timeout(self.write_timeout, self.inner.flush()).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout("flush")),
        }

        Ok(WriteReport {
            bytes: written,
            retries,
        })
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}
