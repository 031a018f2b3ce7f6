//! Chunk emission for the sending endpoint.
//!
//! Files are framed as one `Start`, chunks in index order, then one `End`.
//! Emission is paced: the sender yields between chunks instead of spinning,
//! and the sink itself is bounded so a slow channel suspends the sender
//! (backpressure) rather than growing an unbounded buffer.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::constants::{CHUNK_PACING, CHUNK_SIZE, FILE_PACING};
use crate::error::{Error, Result};
use crate::protocol::TransferFrame;

/// Destination for transfer frames.
///
/// Implementations are expected to exert backpressure: `send_frame` should
/// suspend while the underlying channel's buffer is full.
pub trait FrameSink: Send {
    fn send_frame(&mut self, frame: TransferFrame) -> impl Future<Output = Result<()>> + Send;
}

impl FrameSink for mpsc::Sender<TransferFrame> {
    async fn send_frame(&mut self, frame: TransferFrame) -> Result<()> {
        mpsc::Sender::send(self, frame)
            .await
            .map_err(|_| Error::ChannelClosedMidTransfer)
    }
}

/// A file queued for sending.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data,
        }
    }
}

/// Sending half of the chunked transfer engine.
///
/// Files are processed strictly sequentially: a `send_file` call emits its
/// `End` before returning, so a second `Start` can never overtake an open
/// transfer on the same sender.
#[derive(Debug)]
pub struct ChunkSender {
    chunk_size: usize,
    chunk_pacing: Duration,
    file_pacing: Duration,
}

impl Default for ChunkSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkSender {
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            chunk_pacing: CHUNK_PACING,
            file_pacing: FILE_PACING,
        }
    }

    /// Override framing parameters (tests exercise small chunk tables).
    pub fn with_params(chunk_size: usize, chunk_pacing: Duration, file_pacing: Duration) -> Self {
        Self {
            chunk_size,
            chunk_pacing,
            file_pacing,
        }
    }

    /// Number of chunks a payload of `size` bytes frames into.
    pub fn chunk_count(&self, size: u64) -> u32 {
        size.div_ceil(self.chunk_size as u64) as u32
    }

    /// Send one file through the sink.
    ///
    /// `on_chunk_sent` observes cumulative bytes emitted after each chunk,
    /// for progress telemetry. Returns the total chunk count.
    pub async fn send_file<S, F>(
        &self,
        file: &OutgoingFile,
        sink: &mut S,
        mut on_chunk_sent: F,
    ) -> Result<u32>
    where
        S: FrameSink,
        F: FnMut(u64) + Send,
    {
        let size = file.data.len() as u64;
        let total_chunks = self.chunk_count(size);

        debug!(file_name = %file.name, size, total_chunks, "sending file");
        sink.send_frame(TransferFrame::Start {
            name: file.name.clone(),
            size,
            mime_type: file.mime_type.clone(),
            total_chunks,
        })
        .await?;

        for index in 0..total_chunks {
            let start = index as usize * self.chunk_size;
            let end = usize::min(start + self.chunk_size, file.data.len());
            sink.send_frame(TransferFrame::Chunk {
                index,
                payload: file.data[start..end].to_vec(),
            })
            .await?;
            on_chunk_sent(end as u64);

            // Yield between chunks rather than spinning; the sink's bound
            // handles the rest of the flow control.
            if index + 1 < total_chunks {
                tokio::time::sleep(self.chunk_pacing).await;
            }
        }

        sink.send_frame(TransferFrame::End {
            name: file.name.clone(),
        })
        .await?;

        Ok(total_chunks)
    }

    /// Send a batch of files sequentially with inter-file pacing.
    pub async fn send_all<S>(&self, files: &[OutgoingFile], sink: &mut S) -> Result<()>
    where
        S: FrameSink,
    {
        for (i, file) in files.iter().enumerate() {
            self.send_file(file, sink, |_| {}).await?;
            if i + 1 < files.len() {
                tokio::time::sleep(self.file_pacing).await;
            }
        }
        Ok(())
    }
}
