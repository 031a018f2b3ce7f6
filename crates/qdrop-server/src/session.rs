//! Session aggregate and per-session state.
//!
//! A `Session` splits into an immutable header (ids, creator, settings,
//! creation time) and a `Mutex<SessionState>` holding everything join/leave
//! and upload events mutate. The mutex serializes all mutation for one
//! session without any cross-session lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};
use tracing::{debug, trace};

use qdrop_core::protocol::{
    ConnectionId, FileEntry, FileRecord, Message, ParticipantInfo, Role, SessionId,
    SessionSettings, ShareCode, TransferMode,
};

/// One connected member: identity plus the handle used to push messages to it.
#[derive(Debug, Clone)]
pub struct Member {
    pub info: ParticipantInfo,
    /// Bounded outbound queue drained by the member's connection writer.
    pub outbound: mpsc::Sender<Message>,
}

/// Mutable interior of a session, guarded by the session's own mutex.
#[derive(Debug, Default)]
pub struct SessionState {
    pub participants: HashMap<ConnectionId, Member>,
    /// Upload order preserved; records removed only with the whole session.
    pub files: Vec<Arc<FileRecord>>,
    /// Flips false exactly once, at deletion.
    pub is_active: bool,
    /// Occupied while a relayed file is mid-flight: owner connection and
    /// file name. One transfer slot per session per direction; the reverse
    /// direction (creator pulling) shares the same relay path.
    pub transfer_slot: Option<(ConnectionId, String)>,
}

/// The aggregate of membership, files, and settings for one sharing
/// interaction.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub share_code: ShareCode,
    pub creator_id: String,
    pub settings: SessionSettings,
    pub transfer_mode: TransferMode,
    created_at: Instant,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        share_code: ShareCode,
        creator_id: String,
        settings: SessionSettings,
        transfer_mode: TransferMode,
    ) -> Self {
        Self {
            id: SessionId::new(),
            share_code,
            creator_id,
            settings,
            transfer_mode,
            created_at: Instant::now(),
            state: Mutex::new(SessionState {
                is_active: true,
                ..SessionState::default()
            }),
        }
    }

    /// Age of the session, for the TTL sweep.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Lock the per-session state. Hold briefly; never across channel sends
    /// that can suspend.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active
    }

    pub async fn participant_count(&self) -> usize {
        self.state.lock().await.participants.len()
    }

    /// Mark the session inactive and strip it for deletion.
    ///
    /// Returns the stored keys to delete, or `None` if the session was
    /// already deactivated (deletion is idempotent).
    pub async fn deactivate(&self) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        if !state.is_active {
            return None;
        }
        state.is_active = false;
        state.participants.clear();
        state.transfer_slot = None;
        let keys = state
            .files
            .iter()
            .map(|f| f.stored_key.clone())
            .collect();
        debug!(share_code = %self.share_code, "session deactivated");
        Some(keys)
    }

    /// Append an uploaded file; returns the full ordered list for the
    /// file-list notification.
    pub async fn register_file(&self, record: FileRecord) -> Option<Vec<FileEntry>> {
        let mut state = self.state.lock().await;
        if !state.is_active {
            return None;
        }
        state.files.push(Arc::new(record));
        Some(state.files.iter().map(|f| f.to_entry()).collect())
    }

    pub async fn find_file(&self, id: qdrop_core::protocol::FileId) -> Option<Arc<FileRecord>> {
        let state = self.state.lock().await;
        state.files.iter().find(|f| f.id == id).cloned()
    }

    /// Queue a message to every member except `skip`, without blocking.
    ///
    /// Uses `try_send`: a member whose outbound queue is full misses one
    /// advisory update rather than stalling the session.
    pub async fn broadcast(&self, msg: &Message, skip: Option<ConnectionId>) {
        let state = self.state.lock().await;
        for (conn_id, member) in &state.participants {
            if Some(*conn_id) == skip {
                continue;
            }
            if member.outbound.try_send(msg.clone()).is_err() {
                trace!(
                    share_code = %self.share_code,
                    conn = %conn_id,
                    "dropping broadcast for slow or closed member"
                );
            }
        }
    }

    /// Clone the outbound handles of every member except `skip`.
    ///
    /// Used when the caller needs awaited (backpressured) sends: the clones
    /// are taken under the lock, the sends happen after it is released.
    pub async fn member_outbounds(
        &self,
        skip: Option<ConnectionId>,
    ) -> Vec<(ConnectionId, mpsc::Sender<Message>)> {
        let state = self.state.lock().await;
        state
            .participants
            .iter()
            .filter(|(conn_id, _)| Some(**conn_id) != skip)
            .map(|(conn_id, member)| (*conn_id, member.outbound.clone()))
            .collect()
    }

    /// Outbound handle of the creator's live connection, if joined.
    pub async fn creator_outbound(&self) -> Option<mpsc::Sender<Message>> {
        let state = self.state.lock().await;
        state
            .participants
            .values()
            .find(|m| m.info.role == Role::Creator)
            .map(|m| m.outbound.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdrop_core::protocol::ParticipantUpdatePayload;
    use std::time::SystemTime;

    fn member(outbound: mpsc::Sender<Message>, role: Role) -> Member {
        Member {
            info: ParticipantInfo {
                user_id: "u".into(),
                display_name: "U".into(),
                role,
                joined_at: SystemTime::now(),
            },
            outbound,
        }
    }

    fn session() -> Session {
        Session::new(
            ShareCode::parse("AAAAAA").unwrap(),
            "creator".into(),
            SessionSettings::default(),
            TransferMode::Relayed,
        )
    }

    #[tokio::test]
    async fn deactivate_is_idempotent_and_returns_keys() {
        let s = session();
        s.register_file(FileRecord::new(
            "a".into(),
            "key-a".into(),
            1,
            "text/plain".into(),
            "creator".into(),
        ))
        .await
        .unwrap();

        let keys = s.deactivate().await.unwrap();
        assert_eq!(keys, vec!["key-a".to_string()]);
        assert!(s.deactivate().await.is_none());
        assert!(!s.is_active().await);
    }

    #[tokio::test]
    async fn register_file_on_inactive_session_fails() {
        let s = session();
        s.deactivate().await;
        let result = s
            .register_file(FileRecord::new(
                "b".into(),
                "key-b".into(),
                1,
                "text/plain".into(),
                "creator".into(),
            ))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn broadcast_skips_the_originator() {
        let s = session();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        {
            let mut state = s.lock().await;
            state
                .participants
                .insert(ConnectionId(1), member(tx_a, Role::Creator));
            state
                .participants
                .insert(ConnectionId(2), member(tx_b, Role::Participant));
        }

        let msg = Message::ParticipantUpdate(ParticipantUpdatePayload {
            participant_count: 2,
        });
        s.broadcast(&msg, Some(ConnectionId(1))).await;

        assert_eq!(rx_b.try_recv().unwrap(), msg);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn creator_outbound_finds_the_creator() {
        let s = session();
        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        {
            let mut state = s.lock().await;
            state
                .participants
                .insert(ConnectionId(1), member(tx_a, Role::Participant));
            state
                .participants
                .insert(ConnectionId(2), member(tx_b, Role::Creator));
        }
        assert!(s.creator_outbound().await.is_some());
    }
}
