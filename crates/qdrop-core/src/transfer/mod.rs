//! Chunked transfer engine: framing, pacing, reassembly, telemetry.

mod progress;
pub(crate) mod receiver;
mod sender;

pub use progress::ProgressTracker;
pub use receiver::{CompletedFile, TransferReceiver};
pub use sender::{ChunkSender, FrameSink, OutgoingFile};
