//! Connection-negotiation relay.
//!
//! Forwards signaling payloads between session members without parsing them.
//! The relay only guarantees per-sender ordering (each connection's frames
//! are queued in arrival order); consumers already tolerate reordered
//! candidates.

use tracing::{debug, trace};

use qdrop_core::protocol::{ConnectionId, Message, SignalPayload};

use crate::registry::SessionRegistry;

/// Route one signaling message to the other members of its session.
///
/// Signals for unknown or retired sessions are dropped silently; stale
/// negotiation traffic after expiry is expected, not an error.
pub async fn relay(registry: &SessionRegistry, from: ConnectionId, signal: SignalPayload) {
    let Some(session) = registry.lookup(&signal.share_code).await else {
        debug!(
            share_code = %signal.share_code,
            conn = %from,
            "dropping signal for unknown session"
        );
        return;
    };

    trace!(
        share_code = %signal.share_code,
        conn = %from,
        kind = ?signal.kind,
        bytes = signal.payload.len(),
        "relaying signal"
    );
    session.broadcast(&Message::Signal(signal), Some(from)).await;
}
