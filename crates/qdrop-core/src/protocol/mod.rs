//! Protocol message definitions and wire format codec.

mod codec;
mod message;
mod proptest;
mod types;

pub use codec::{Codec, FRAME_HEADER_LEN};
pub use message::{
    CreateSessionPayload, ErrorPayload, FileListUpdatePayload, JoinAckPayload, JoinPayload,
    JoinRejectReason, JoinRejectedPayload, Message, ParticipantUpdatePayload, ProgressUpdate,
    SessionCreatedPayload, SignalKind, SignalPayload, TransferAbortedPayload, TransferDirection,
    TransferFrame,
};
pub use types::{
    ConnectionId, FileEntry, FileId, FileRecord, ParticipantInfo, Role, SessionId,
    SessionSettings, ShareCode, TransferMode,
};
