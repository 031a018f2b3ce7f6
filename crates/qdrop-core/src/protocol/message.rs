//! Top-level protocol message enum.
//!
//! Every frame on a qdrop connection is one `Message`. The enum is closed:
//! unknown frame kinds fail decoding at the process boundary instead of being
//! dispatched.

use serde::{Deserialize, Serialize};

use super::types::{FileEntry, Role, SessionId, SessionSettings, ShareCode, TransferMode};
use crate::error::Error;

// =============================================================================
// Top-level Message Enum
// =============================================================================

/// Top-level protocol message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // =========================================================================
    // Session lifecycle
    // =========================================================================
    /// Register a new sharing session.
    CreateSession(CreateSessionPayload),
    /// Server response to a successful create.
    SessionCreated(SessionCreatedPayload),
    /// Join an existing session by share code.
    Join(JoinPayload),
    /// Join accepted.
    JoinAck(JoinAckPayload),
    /// Join rejected; surfaced only to the requester.
    JoinRejected(JoinRejectedPayload),
    /// Voluntary leave (disconnect implies the same).
    Leave,
    /// Membership-count broadcast to the other members.
    ParticipantUpdate(ParticipantUpdatePayload),
    /// Ordered file list, broadcast after each upload.
    FileListUpdate(FileListUpdatePayload),

    // =========================================================================
    // Connection negotiation
    // =========================================================================
    /// Opaque signaling payload, routed verbatim between session members.
    Signal(SignalPayload),

    // =========================================================================
    // Chunked transfer
    // =========================================================================
    /// Transfer frame, relayed to the counterpart endpoint(s).
    Transfer(TransferFrame),
    /// Receiver asks the sharing side to start sending its files.
    TransferRequest,
    /// An in-flight transfer was abandoned (counterparty disconnect).
    TransferAborted(TransferAbortedPayload),

    // =========================================================================
    // Telemetry
    // =========================================================================
    /// Advisory rate/ETA update; latest value wins.
    Progress(ProgressUpdate),

    // =========================================================================
    // Errors
    // =========================================================================
    /// Explicit error response to the requesting endpoint.
    Error(ErrorPayload),
}

// =============================================================================
// Session Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionPayload {
    /// Stable identity of the creating user.
    pub user_id: String,
    /// How file bytes will move for this session.
    pub transfer_mode: TransferMode,
    /// Settings fixed at creation; `None` for server defaults.
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCreatedPayload {
    pub share_code: ShareCode,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub share_code: ShareCode,
    pub user_id: String,
    pub display_name: String,
    pub desired_role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAckPayload {
    pub share_code: ShareCode,
    pub role: Role,
    pub participant_count: usize,
    pub file_count: usize,
}

/// Why a join was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinRejectReason {
    /// Unknown or already-retired share code.
    SessionNotFound,
    /// Participant capacity reached.
    SessionFull,
    /// Creator role claimed by a non-creator.
    NotAuthorized,
}

impl JoinRejectReason {
    /// Classify a join error; `None` for errors that are not join rejections.
    pub fn from_error(err: &Error) -> Option<Self> {
        match err {
            Error::SessionNotFound(_) => Some(Self::SessionNotFound),
            Error::SessionFull(_) => Some(Self::SessionFull),
            Error::NotAuthorized => Some(Self::NotAuthorized),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRejectedPayload {
    pub share_code: ShareCode,
    pub reason: JoinRejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdatePayload {
    pub participant_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListUpdatePayload {
    /// Upload order is preserved.
    pub files: Vec<FileEntry>,
}

// =============================================================================
// Signaling
// =============================================================================

/// Kind of connection-negotiation message.
///
/// Candidates may arrive in any order; consumers apply them idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

/// Opaque negotiation payload. The relay never inspects `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub share_code: ShareCode,
    pub kind: SignalKind,
    pub payload: Vec<u8>,
}

// =============================================================================
// Transfer Frames
// =============================================================================

/// Chunked transfer protocol frames.
///
/// Per file, in sender order: one `Start`, then `Chunk` for
/// `index = 0..total_chunks`, then one `End`. Chunks may arrive out of order
/// on unordered channels; the receiver always writes into slot `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferFrame {
    Start {
        name: String,
        size: u64,
        mime_type: String,
        total_chunks: u32,
    },
    Chunk {
        index: u32,
        payload: Vec<u8>,
    },
    End {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferAbortedPayload {
    pub file_name: String,
    pub reason: String,
}

// =============================================================================
// Telemetry
// =============================================================================

/// Which half of a transfer a progress update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Advisory progress sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub file_name: String,
    /// Percent complete in `[0, 100]`.
    pub progress: f32,
    /// Bytes per second since the previous sample.
    pub speed_bps: f64,
    /// `None` when the rate is zero (ETA unknown).
    pub eta_secs: Option<u64>,
    pub direction: TransferDirection,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

impl ErrorPayload {
    pub fn from_error(err: &Error) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
