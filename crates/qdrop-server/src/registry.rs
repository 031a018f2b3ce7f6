//! Session registry for qdrop-server.
//!
//! The authoritative table of active sessions keyed by share code. The map
//! lock is short-held and distinct from per-session state: handlers resolve
//! an `Arc<Session>` here and do all further work under that session's own
//! mutex.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use qdrop_core::error::{Error, Result};
use qdrop_core::protocol::{SessionId, SessionSettings, ShareCode, TransferMode};

use crate::session::Session;

/// Registry of active sessions.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<ShareCode, Arc<Session>>>,
    /// Session count change notification (sends current count on each change).
    count_tx: watch::Sender<usize>,
    count_rx: watch::Receiver<usize>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (count_tx, count_rx) = watch::channel(0usize);
        Self {
            sessions: Mutex::new(HashMap::new()),
            count_tx,
            count_rx,
        }
    }

    /// Register a new session, regenerating the share code on the
    /// (astronomically rare) collision with an active one.
    pub async fn create(
        &self,
        creator_id: &str,
        settings: SessionSettings,
        transfer_mode: TransferMode,
    ) -> (ShareCode, SessionId) {
        let mut sessions = self.sessions.lock().await;
        let share_code = loop {
            let candidate = ShareCode::generate();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };

        let session = Arc::new(Session::new(
            share_code,
            creator_id.to_string(),
            settings,
            transfer_mode,
        ));
        let session_id = session.id;
        sessions.insert(share_code, session);
        let _ = self.count_tx.send(sessions.len());

        info!(%share_code, %session_id, creator = creator_id, "session created");
        (share_code, session_id)
    }

    /// Resolve an active session by share code.
    pub async fn lookup(&self, share_code: &ShareCode) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(share_code).cloned()
    }

    /// Like `lookup`, but maps absence to the protocol-level error.
    pub async fn lookup_or_not_found(&self, share_code: &ShareCode) -> Result<Arc<Session>> {
        self.lookup(share_code)
            .await
            .ok_or_else(|| Error::SessionNotFound(share_code.to_string()))
    }

    /// Remove a session and deactivate it.
    ///
    /// Idempotent: deleting an absent or already-deactivated session is a
    /// no-op. Returns the stored keys whose backing objects should be
    /// deleted, when this call performed the deactivation.
    pub async fn delete(&self, share_code: &ShareCode) -> Option<Vec<String>> {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            let removed = sessions.remove(share_code);
            if removed.is_some() {
                let _ = self.count_tx.send(sessions.len());
            }
            removed
        };

        // Deactivation takes the per-session lock, so it happens after the
        // registry lock is released.
        let session = removed?;
        let keys = session.deactivate().await;
        if keys.is_some() {
            debug!(%share_code, "session deleted");
        }
        keys
    }

    /// Snapshot of all active sessions, for the expiry sweep.
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().await.values().cloned().collect()
    }

    /// Current number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Watch session count changes.
    pub fn count_watch(&self) -> watch::Receiver<usize> {
        self.count_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_unique_codes() {
        let registry = SessionRegistry::new();
        let (code_a, id_a) = registry
            .create("alice", SessionSettings::default(), TransferMode::Relayed)
            .await;
        let (code_b, id_b) = registry
            .create("bob", SessionSettings::default(), TransferMode::Relayed)
            .await;

        assert_ne!(code_a, code_b);
        assert_ne!(id_a, id_b);
        assert_eq!(registry.session_count().await, 2);
    }

    #[tokio::test]
    async fn lookup_finds_active_sessions_only() {
        let registry = SessionRegistry::new();
        let (code, _) = registry
            .create("alice", SessionSettings::default(), TransferMode::Relayed)
            .await;

        assert!(registry.lookup(&code).await.is_some());
        registry.delete(&code).await;
        assert!(registry.lookup(&code).await.is_none());
        assert!(matches!(
            registry.lookup_or_not_found(&code).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let registry = SessionRegistry::new();
        let (code, _) = registry
            .create("alice", SessionSettings::default(), TransferMode::Relayed)
            .await;

        assert!(registry.delete(&code).await.is_some());
        assert!(registry.delete(&code).await.is_none());
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn count_watch_tracks_changes() {
        let registry = SessionRegistry::new();
        let watch = registry.count_watch();
        assert_eq!(*watch.borrow(), 0);

        let (code, _) = registry
            .create("alice", SessionSettings::default(), TransferMode::Relayed)
            .await;
        assert_eq!(*watch.borrow(), 1);

        registry.delete(&code).await;
        assert_eq!(*watch.borrow(), 0);
    }

    #[tokio::test]
    async fn codes_may_be_reused_after_deletion() {
        // Can't force a collision through the public API; exercise the
        // invariant directly: delete frees the key for reinsertion.
        let registry = SessionRegistry::new();
        let (code, _) = registry
            .create("alice", SessionSettings::default(), TransferMode::Relayed)
            .await;
        registry.delete(&code).await;

        let session = Arc::new(Session::new(
            code,
            "bob".into(),
            SessionSettings::default(),
            TransferMode::Relayed,
        ));
        registry.sessions.lock().await.insert(code, session);
        assert!(registry.lookup(&code).await.is_some());
    }
}
