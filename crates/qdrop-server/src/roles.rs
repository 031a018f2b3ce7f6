//! Join/leave policy.
//!
//! Enforces the role rules at the session boundary: the creator role is
//! reserved for the creating user and at most one live creator connection,
//! participants are capacity-checked, and membership changes feed both the
//! broadcast fan-out and the grace timer.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use qdrop_core::error::{Error, Result};
use qdrop_core::protocol::{
    ConnectionId, JoinAckPayload, JoinPayload, Message, ParticipantInfo,
    ParticipantUpdatePayload, Role, TransferAbortedPayload,
};
use tokio::sync::mpsc;

use crate::registry::SessionRegistry;
use crate::scheduler::SchedulerHandle;
use crate::session::{Member, Session};

/// Membership policy over the registry, wired to the expiry scheduler.
#[derive(Clone)]
pub struct RoleManager {
    registry: Arc<SessionRegistry>,
    scheduler: SchedulerHandle,
}

impl RoleManager {
    pub fn new(registry: Arc<SessionRegistry>, scheduler: SchedulerHandle) -> Self {
        Self {
            registry,
            scheduler,
        }
    }

    /// Admit a connection into a session.
    ///
    /// On success the member is registered, any pending grace timer is
    /// cancelled, and the other members receive a `ParticipantUpdate`.
    pub async fn join(
        &self,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Message>,
        payload: &JoinPayload,
    ) -> Result<(Arc<Session>, JoinAckPayload)> {
        let session = self.registry.lookup_or_not_found(&payload.share_code).await?;

        let (participant_count, file_count) = {
            let mut state = session.lock().await;
            if !state.is_active {
                return Err(Error::SessionNotFound(payload.share_code.to_string()));
            }

            match payload.desired_role {
                Role::Creator => {
                    if payload.user_id != session.creator_id {
                        return Err(Error::NotAuthorized);
                    }
                    // One live creator connection at a time.
                    if state
                        .participants
                        .values()
                        .any(|m| m.info.role == Role::Creator)
                    {
                        return Err(Error::NotAuthorized);
                    }
                }
                Role::Participant => {
                    if state.participants.len() >= session.settings.max_participants {
                        return Err(Error::SessionFull(payload.share_code.to_string()));
                    }
                }
            }

            state.participants.insert(
                conn_id,
                Member {
                    info: ParticipantInfo {
                        user_id: payload.user_id.clone(),
                        display_name: payload.display_name.clone(),
                        role: payload.desired_role,
                        joined_at: SystemTime::now(),
                    },
                    outbound,
                },
            );
            (state.participants.len(), state.files.len())
        };

        self.scheduler.cancel_grace(payload.share_code);
        session
            .broadcast(
                &Message::ParticipantUpdate(ParticipantUpdatePayload { participant_count }),
                Some(conn_id),
            )
            .await;

        info!(
            share_code = %payload.share_code,
            conn = %conn_id,
            user = payload.user_id,
            role = ?payload.desired_role,
            participant_count,
            "member joined"
        );

        Ok((
            Arc::clone(&session),
            JoinAckPayload {
                share_code: payload.share_code,
                role: payload.desired_role,
                participant_count,
                file_count,
            },
        ))
    }

    /// Remove a member; used for both explicit `Leave` and disconnect.
    ///
    /// Clears an in-flight transfer owned by the leaver (notifying the other
    /// members), broadcasts the new count, and arms the grace timer when the
    /// session empties. Idempotent for connections that never joined.
    pub async fn leave(&self, session: &Arc<Session>, conn_id: ConnectionId) {
        let (removed, participant_count, aborted_file) = {
            let mut state = session.lock().await;
            let removed = state.participants.remove(&conn_id).is_some();
            let aborted_file = match &state.transfer_slot {
                Some((owner, file_name)) if *owner == conn_id => {
                    let name = file_name.clone();
                    state.transfer_slot = None;
                    Some(name)
                }
                _ => None,
            };
            (removed, state.participants.len(), aborted_file)
        };

        if !removed {
            return;
        }

        if let Some(file_name) = aborted_file {
            session
                .broadcast(
                    &Message::TransferAborted(TransferAbortedPayload {
                        file_name,
                        reason: "sender disconnected".into(),
                    }),
                    None,
                )
                .await;
        }

        session
            .broadcast(
                &Message::ParticipantUpdate(ParticipantUpdatePayload { participant_count }),
                None,
            )
            .await;

        debug!(
            share_code = %session.share_code,
            conn = %conn_id,
            participant_count,
            "member left"
        );

        if participant_count == 0 {
            self.scheduler.arm_grace(session.share_code);
        }
    }
}
