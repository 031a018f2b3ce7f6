//! Chunk reassembly state machine for the receiving endpoint.
//!
//! On `Start` a slot table with `total_chunks` empty slots is allocated; each
//! `Chunk` is written into slot `index` (duplicates are idempotent); `End`
//! either yields the concatenated payload or fails with `TransferTruncated`.
//! A partial payload is never observable outside this module.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use crate::constants::{CHUNK_SIZE, MAX_TRANSFER_SIZE};
use crate::error::{Error, Result};
use crate::protocol::TransferFrame;

/// Buffered state for one in-flight inbound file.
///
/// Exclusively owned by the receiving endpoint; destroyed on completion or
/// abort.
#[derive(Debug)]
struct TransferState {
    file_name: String,
    total_size: u64,
    mime_type: String,
    total_chunks: u32,
    slots: Vec<Option<Bytes>>,
    received_count: u32,
}

/// A fully reassembled file, ready to hand to the application layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedFile {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: Bytes,
}

/// Receiving half of the chunked transfer engine.
///
/// Processes one file at a time; the sender guarantees a single in-flight
/// transfer per direction.
#[derive(Debug)]
pub struct TransferReceiver {
    state: Option<TransferState>,
    chunk_size: usize,
}

impl Default for TransferReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferReceiver {
    pub fn new() -> Self {
        Self {
            state: None,
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Override the chunk size (tests exercise small tables).
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            state: None,
            chunk_size,
        }
    }

    /// True while a transfer is buffering.
    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Fraction of chunks received for the in-flight transfer.
    ///
    /// Non-decreasing per transfer. `None` when idle. Completion (the exact
    /// 100% report) is signaled by `handle_frame` returning a file, not by
    /// this accessor.
    pub fn progress(&self) -> Option<f64> {
        self.state.as_ref().map(|s| {
            if s.total_chunks == 0 {
                0.0
            } else {
                f64::from(s.received_count) / f64::from(s.total_chunks)
            }
        })
    }

    /// Process one transfer frame.
    ///
    /// Returns `Ok(Some(file))` when `End` completes a transfer. Any error
    /// releases the buffered state; the caller may surface the failure and
    /// let the peer retry the file.
    pub fn handle_frame(&mut self, frame: TransferFrame) -> Result<Option<CompletedFile>> {
        match frame {
            TransferFrame::Start {
                name,
                size,
                mime_type,
                total_chunks,
            } => {
                self.on_start(name, size, mime_type, total_chunks)?;
                Ok(None)
            }
            TransferFrame::Chunk { index, payload } => {
                self.on_chunk(index, payload)?;
                Ok(None)
            }
            TransferFrame::End { name } => self.on_end(&name).map(Some),
        }
    }

    /// Drop any buffered transfer, releasing its slots immediately.
    ///
    /// Returns the abandoned file name, if a transfer was in flight.
    pub fn abort(&mut self) -> Option<String> {
        let state = self.state.take()?;
        debug!(
            file_name = %state.file_name,
            received = state.received_count,
            total = state.total_chunks,
            "aborting in-flight transfer"
        );
        Some(state.file_name)
    }

    fn on_start(
        &mut self,
        name: String,
        size: u64,
        mime_type: String,
        total_chunks: u32,
    ) -> Result<()> {
        if let Some(stale) = self.state.take() {
            // A second START without END is a framing violation; the stale
            // buffers are released and never surfaced.
            warn!(file_name = %stale.file_name, "START while a transfer was in flight");
            return Err(Error::Protocol {
                message: format!(
                    "START for {name:?} received while {:?} was still in flight",
                    stale.file_name
                ),
            });
        }

        if size > MAX_TRANSFER_SIZE {
            return Err(Error::Protocol {
                message: format!(
                    "announced size {size} for {name:?} exceeds the {MAX_TRANSFER_SIZE}-byte limit"
                ),
            });
        }

        let expected = size.div_ceil(self.chunk_size as u64);
        if u64::from(total_chunks) != expected {
            return Err(Error::Protocol {
                message: format!(
                    "chunk count mismatch for {name:?}: announced {total_chunks}, \
                     expected {expected} for {size} bytes"
                ),
            });
        }

        debug!(file_name = %name, size, total_chunks, "transfer started");
        self.state = Some(TransferState {
            file_name: name,
            total_size: size,
            mime_type,
            total_chunks,
            slots: vec![None; total_chunks as usize],
            received_count: 0,
        });
        Ok(())
    }

    fn on_chunk(&mut self, index: u32, payload: Vec<u8>) -> Result<()> {
        let state = self.state.as_mut().ok_or_else(|| Error::Protocol {
            message: format!("CHUNK {index} received with no transfer in flight"),
        })?;

        if index >= state.total_chunks {
            let message = format!(
                "chunk index {index} out of range (total {})",
                state.total_chunks
            );
            self.state = None;
            return Err(Error::Protocol { message });
        }

        // Duplicate delivery overwrites the slot; the count only moves on
        // first fill so progress stays non-decreasing and bounded.
        let slot = &mut state.slots[index as usize];
        if slot.is_none() {
            state.received_count += 1;
        }
        *slot = Some(Bytes::from(payload));
        Ok(())
    }

    fn on_end(&mut self, name: &str) -> Result<CompletedFile> {
        let state = self.state.take().ok_or_else(|| Error::Protocol {
            message: format!("END for {name:?} received with no transfer in flight"),
        })?;

        if state.file_name != name {
            return Err(Error::Protocol {
                message: format!(
                    "END names {name:?} but {:?} is in flight",
                    state.file_name
                ),
            });
        }

        let missing = state.slots.iter().filter(|slot| slot.is_none()).count();
        if missing > 0 {
            return Err(Error::TransferTruncated {
                file_name: state.file_name,
                missing,
                total: state.total_chunks as usize,
            });
        }

        let mut data = BytesMut::with_capacity(state.total_size as usize);
        for slot in &state.slots {
            // All slots verified non-empty above
            data.put_slice(slot.as_ref().expect("slot checked non-empty"));
        }

        if data.len() as u64 != state.total_size {
            return Err(Error::Protocol {
                message: format!(
                    "reassembled {} bytes for {:?}, expected {}",
                    data.len(),
                    state.file_name,
                    state.total_size
                ),
            });
        }

        debug!(file_name = %state.file_name, size = state.total_size, "transfer complete");
        Ok(CompletedFile {
            name: state.file_name,
            size: state.total_size,
            mime_type: state.mime_type,
            data: data.freeze(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CHUNK: usize = 4;

    fn start_frame(name: &str, size: u64) -> TransferFrame {
        TransferFrame::Start {
            name: name.into(),
            size,
            mime_type: "application/octet-stream".into(),
            total_chunks: size.div_ceil(TEST_CHUNK as u64) as u32,
        }
    }

    fn chunks_of(data: &[u8]) -> Vec<TransferFrame> {
        data.chunks(TEST_CHUNK)
            .enumerate()
            .map(|(i, c)| TransferFrame::Chunk {
                index: i as u32,
                payload: c.to_vec(),
            })
            .collect()
    }

    #[test]
    fn forward_order_reassembly() {
        let data = b"the quick brown fox jumps over".to_vec();
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);

        rx.handle_frame(start_frame("fox.txt", data.len() as u64))
            .unwrap();
        for frame in chunks_of(&data) {
            assert!(rx.handle_frame(frame).unwrap().is_none());
        }
        let file = rx
            .handle_frame(TransferFrame::End {
                name: "fox.txt".into(),
            })
            .unwrap()
            .unwrap();

        assert_eq!(file.data.as_ref(), data.as_slice());
        assert_eq!(file.size, data.len() as u64);
        assert!(!rx.is_active());
    }

    #[test]
    fn reverse_order_reassembly_is_byte_identical() {
        let data: Vec<u8> = (0u8..=255).cycle().take(100).collect();
        let forward = {
            let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
            rx.handle_frame(start_frame("blob", data.len() as u64))
                .unwrap();
            for frame in chunks_of(&data) {
                rx.handle_frame(frame).unwrap();
            }
            rx.handle_frame(TransferFrame::End { name: "blob".into() })
                .unwrap()
                .unwrap()
        };

        let reverse = {
            let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
            rx.handle_frame(start_frame("blob", data.len() as u64))
                .unwrap();
            for frame in chunks_of(&data).into_iter().rev() {
                rx.handle_frame(frame).unwrap();
            }
            rx.handle_frame(TransferFrame::End { name: "blob".into() })
                .unwrap()
                .unwrap()
        };

        assert_eq!(forward.data, reverse.data);
        assert_eq!(forward.data.as_ref(), data.as_slice());
    }

    #[test]
    fn duplicate_chunks_are_idempotent() {
        let data = b"abcdefgh".to_vec();
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("dup", data.len() as u64))
            .unwrap();

        let frames = chunks_of(&data);
        rx.handle_frame(frames[0].clone()).unwrap();
        rx.handle_frame(frames[0].clone()).unwrap();
        assert_eq!(rx.progress(), Some(0.5));

        rx.handle_frame(frames[1].clone()).unwrap();
        let file = rx
            .handle_frame(TransferFrame::End { name: "dup".into() })
            .unwrap()
            .unwrap();
        assert_eq!(file.data.as_ref(), data.as_slice());
    }

    #[test]
    fn progress_is_monotonic() {
        let data = vec![7u8; 40];
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("mono", data.len() as u64))
            .unwrap();

        let mut last = 0.0;
        for frame in chunks_of(&data) {
            rx.handle_frame(frame).unwrap();
            let p = rx.progress().unwrap();
            assert!(p >= last, "progress went backwards: {p} < {last}");
            last = p;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn truncated_transfer_releases_state() {
        let data = vec![1u8; 20];
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("trunc", data.len() as u64))
            .unwrap();

        let frames = chunks_of(&data);
        // Deliver all but one chunk
        for frame in frames.iter().take(frames.len() - 1) {
            rx.handle_frame(frame.clone()).unwrap();
        }

        let err = rx
            .handle_frame(TransferFrame::End {
                name: "trunc".into(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TransferTruncated {
                missing: 1,
                total: 5,
                ..
            }
        ));
        // Buffered state is gone; the partial payload is unobservable
        assert!(!rx.is_active());
    }

    #[test]
    fn abort_releases_buffers() {
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("gone", 20)).unwrap();
        rx.handle_frame(TransferFrame::Chunk {
            index: 0,
            payload: vec![0u8; 4],
        })
        .unwrap();

        assert_eq!(rx.abort().as_deref(), Some("gone"));
        assert!(!rx.is_active());
        assert!(rx.abort().is_none());
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("oob", 8)).unwrap();
        let err = rx
            .handle_frame(TransferFrame::Chunk {
                index: 2,
                payload: vec![0u8; 4],
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!rx.is_active());
    }

    #[test]
    fn chunk_without_start_rejected() {
        let mut rx = TransferReceiver::new();
        let err = rx
            .handle_frame(TransferFrame::Chunk {
                index: 0,
                payload: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn second_start_rejected_and_stale_state_released() {
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(start_frame("first", 8)).unwrap();
        let err = rx.handle_frame(start_frame("second", 8)).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!rx.is_active());
    }

    #[test]
    fn chunk_count_mismatch_rejected() {
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        let err = rx
            .handle_frame(TransferFrame::Start {
                name: "bad".into(),
                size: 8,
                mime_type: "text/plain".into(),
                total_chunks: 3,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
    }

    #[test]
    fn empty_file_completes_with_no_chunks() {
        let mut rx = TransferReceiver::with_chunk_size(TEST_CHUNK);
        rx.handle_frame(TransferFrame::Start {
            name: "empty".into(),
            size: 0,
            mime_type: "text/plain".into(),
            total_chunks: 0,
        })
        .unwrap();
        let file = rx
            .handle_frame(TransferFrame::End {
                name: "empty".into(),
            })
            .unwrap()
            .unwrap();
        assert!(file.data.is_empty());
    }

    #[test]
    fn oversized_announcement_is_rejected_before_allocation() {
        let mut rx = TransferReceiver::new();
        let size = MAX_TRANSFER_SIZE + 1;
        let err = rx
            .handle_frame(TransferFrame::Start {
                name: "huge.bin".into(),
                size,
                mime_type: "application/octet-stream".into(),
                total_chunks: size.div_ceil(CHUNK_SIZE as u64) as u32,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }));
        assert!(!rx.is_active());
    }

    #[test]
    fn chunk_arithmetic_for_reference_sizes() {
        // 1,000,000 bytes at 16 KiB -> 62 chunks, final chunk 576 bytes
        let size: u64 = 1_000_000;
        let total = size.div_ceil(CHUNK_SIZE as u64);
        assert_eq!(total, 62);
        assert_eq!(size - (total - 1) * CHUNK_SIZE as u64, 576);
    }
}
