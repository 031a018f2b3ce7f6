//! Per-connection actor.
//!
//! Each network connection gets one actor owning that connection's view of
//! the world: its id, its outbound queue, and its current session membership.
//! The actor drains the inbound message stream, dispatches each message, and
//! on stream end performs disconnect cleanup (implicit leave).

use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use qdrop_core::error::{Error, Result};
use qdrop_core::protocol::{
    ConnectionId, CreateSessionPayload, ErrorPayload, JoinRejectReason, JoinRejectedPayload,
    Message, ProgressUpdate, Role, SessionCreatedPayload, SignalPayload, TransferAbortedPayload,
    TransferDirection, TransferFrame,
};
use tokio::sync::mpsc;

use crate::registry::SessionRegistry;
use crate::roles::RoleManager;
use crate::scheduler::SchedulerHandle;
use crate::session::Session;
use crate::signaling;
use crate::storage::Storage;

/// Shared server state handed to every connection actor.
pub struct ServerContext<S> {
    pub registry: Arc<SessionRegistry>,
    pub roles: RoleManager,
    pub scheduler: SchedulerHandle,
    pub storage: Arc<S>,
}

// Manual impl: `S` itself need not be `Clone` behind the `Arc`.
impl<S> Clone for ServerContext<S> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            roles: self.roles.clone(),
            scheduler: self.scheduler.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}

struct Membership {
    session: Arc<Session>,
    role: Role,
}

/// Actor for one connection.
pub struct ConnectionActor<S> {
    ctx: ServerContext<S>,
    conn_id: ConnectionId,
    outbound: mpsc::Sender<Message>,
    membership: Option<Membership>,
}

impl<S: Storage> ConnectionActor<S> {
    pub fn new(
        ctx: ServerContext<S>,
        conn_id: ConnectionId,
        outbound: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            ctx,
            conn_id,
            outbound,
            membership: None,
        }
    }

    /// Drain the inbound stream until the peer disconnects, then clean up.
    #[instrument(skip_all, fields(conn = %self.conn_id))]
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Message>) {
        while let Some(msg) = inbound.recv().await {
            match self.dispatch(msg).await {
                Ok(()) => {}
                Err(Error::ConnectionClosed) => break,
                Err(err) => {
                    if err.is_rejection() {
                        debug!(%err, "request rejected");
                    } else {
                        warn!(%err, "request failed");
                    }
                    if self.reply(Message::Error(ErrorPayload::from_error(&err))).await.is_err() {
                        break;
                    }
                }
            }
        }

        // Disconnect implies leave.
        if let Some(membership) = self.membership.take() {
            self.ctx.roles.leave(&membership.session, self.conn_id).await;
        }
        trace!("connection actor finished");
    }

    async fn dispatch(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::CreateSession(payload) => self.on_create(payload).await,
            Message::Join(payload) => self.on_join(payload).await,
            Message::Leave => self.on_leave().await,
            Message::Signal(payload) => self.on_signal(payload).await,
            Message::Transfer(frame) => self.on_transfer(frame).await,
            Message::TransferRequest => self.on_transfer_request().await,
            Message::TransferAborted(payload) => self.on_transfer_aborted(payload).await,
            Message::Progress(update) => self.on_progress(update).await,

            // Server-to-client messages arriving from a client.
            Message::SessionCreated(_)
            | Message::JoinAck(_)
            | Message::JoinRejected(_)
            | Message::ParticipantUpdate(_)
            | Message::FileListUpdate(_)
            | Message::Error(_) => Err(Error::Protocol {
                message: "unexpected server-side message from client".into(),
            }),
        }
    }

    async fn on_create(&mut self, payload: CreateSessionPayload) -> Result<()> {
        let (share_code, session_id) = self
            .ctx
            .registry
            .create(
                &payload.user_id,
                payload.settings.unwrap_or_default(),
                payload.transfer_mode,
            )
            .await;

        // A session nobody ever joins must not linger until the TTL.
        self.ctx.scheduler.arm_grace(share_code);

        self.reply(Message::SessionCreated(SessionCreatedPayload {
            share_code,
            session_id,
        }))
        .await
    }

    async fn on_join(&mut self, payload: qdrop_core::protocol::JoinPayload) -> Result<()> {
        if self.membership.is_some() {
            return Err(Error::Protocol {
                message: "connection already joined a session".into(),
            });
        }

        match self
            .ctx
            .roles
            .join(self.conn_id, self.outbound.clone(), &payload)
            .await
        {
            Ok((session, ack)) => {
                self.membership = Some(Membership {
                    session,
                    role: ack.role,
                });
                self.reply(Message::JoinAck(ack)).await
            }
            Err(err) => match JoinRejectReason::from_error(&err) {
                Some(reason) => {
                    self.reply(Message::JoinRejected(JoinRejectedPayload {
                        share_code: payload.share_code,
                        reason,
                    }))
                    .await
                }
                None => Err(err),
            },
        }
    }

    async fn on_leave(&mut self) -> Result<()> {
        if let Some(membership) = self.membership.take() {
            self.ctx.roles.leave(&membership.session, self.conn_id).await;
        }
        Ok(())
    }

    async fn on_signal(&mut self, payload: SignalPayload) -> Result<()> {
        // Only signals for the connection's own session are relayed; anything
        // else is stale or confused traffic and is dropped.
        match &self.membership {
            Some(m) if m.session.share_code == payload.share_code => {
                signaling::relay(&self.ctx.registry, self.conn_id, payload).await;
            }
            _ => {
                debug!(share_code = %payload.share_code, "dropping signal from non-member");
            }
        }
        Ok(())
    }

    async fn on_transfer(&mut self, frame: TransferFrame) -> Result<()> {
        let session = self.session()?;

        match &frame {
            TransferFrame::Start { name, .. } => {
                let mut state = session.lock().await;
                if !state.is_active {
                    return Err(Error::SessionNotFound(session.share_code.to_string()));
                }
                match &state.transfer_slot {
                    Some((owner, in_flight)) if *owner != self.conn_id => {
                        return Err(Error::TransferBusy(in_flight.clone()));
                    }
                    _ => state.transfer_slot = Some((self.conn_id, name.clone())),
                }
            }
            TransferFrame::Chunk { .. } | TransferFrame::End { .. } => {
                let state = session.lock().await;
                if !state.is_active {
                    return Err(Error::SessionNotFound(session.share_code.to_string()));
                }
                match &state.transfer_slot {
                    Some((owner, _)) if *owner == self.conn_id => {}
                    _ => {
                        return Err(Error::Protocol {
                            message: "transfer frame without an open transfer".into(),
                        });
                    }
                }
            }
        }

        let is_end = matches!(frame, TransferFrame::End { .. });
        self.forward_to_members(Message::Transfer(frame)).await?;

        if is_end {
            session.lock().await.transfer_slot = None;
        }
        Ok(())
    }

    async fn on_transfer_request(&mut self) -> Result<()> {
        let membership = self.membership.as_ref().ok_or(Error::Protocol {
            message: "not joined to any session".into(),
        })?;
        if membership.role == Role::Creator {
            return Err(Error::Protocol {
                message: "creator cannot request a transfer from itself".into(),
            });
        }
        let session = &membership.session;
        // The request travels to the sharing side's live connection.
        match session.creator_outbound().await {
            Some(tx) => {
                if tx.send(Message::TransferRequest).await.is_err() {
                    warn!(share_code = %session.share_code, "creator connection gone");
                }
            }
            None => {
                debug!(share_code = %session.share_code, "transfer request with no creator online");
            }
        }
        Ok(())
    }

    async fn on_transfer_aborted(&mut self, payload: TransferAbortedPayload) -> Result<()> {
        let session = self.session()?;
        {
            let mut state = session.lock().await;
            if !state.is_active {
                return Err(Error::SessionNotFound(session.share_code.to_string()));
            }
            if matches!(&state.transfer_slot, Some((owner, _)) if *owner == self.conn_id) {
                state.transfer_slot = None;
            }
        }
        session
            .broadcast(&Message::TransferAborted(payload), Some(self.conn_id))
            .await;
        Ok(())
    }

    /// Route a progress sample. Upload progress fans out to the receiving
    /// side; download progress goes back to the sharer. Advisory either way:
    /// slow consumers miss samples instead of stalling the transfer.
    async fn on_progress(&mut self, update: ProgressUpdate) -> Result<()> {
        let session = self.session()?;
        match update.direction {
            TransferDirection::Upload => {
                session
                    .broadcast(&Message::Progress(update), Some(self.conn_id))
                    .await;
            }
            TransferDirection::Download => {
                if let Some(tx) = session.creator_outbound().await {
                    let _ = tx.try_send(Message::Progress(update));
                }
            }
        }
        Ok(())
    }

    /// Forward one message to every other member with backpressure: sends
    /// are awaited on handles cloned out from under the session lock.
    async fn forward_to_members(&self, msg: Message) -> Result<()> {
        let session = self.session()?;
        let targets = session.member_outbounds(Some(self.conn_id)).await;
        for (conn_id, tx) in targets {
            if tx.send(msg.clone()).await.is_err() {
                trace!(conn = %conn_id, "member queue closed during forward");
            }
        }
        Ok(())
    }

    fn session(&self) -> Result<&Arc<Session>> {
        self.membership
            .as_ref()
            .map(|m| &m.session)
            .ok_or(Error::Protocol {
                message: "not joined to any session".into(),
            })
    }

    async fn reply(&self, msg: Message) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{self, SchedulerConfig};
    use crate::storage::MemoryStorage;
    use qdrop_core::constants::OUTBOUND_QUEUE_DEPTH;
    use qdrop_core::protocol::{JoinPayload, ShareCode, TransferMode};
    use tokio::sync::watch;

    // The watch sender keeps the scheduler alive for the test's duration.
    fn context() -> (ServerContext<MemoryStorage>, watch::Sender<bool>) {
        let registry = Arc::new(SessionRegistry::new());
        let storage = Arc::new(MemoryStorage::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (scheduler, _task) = scheduler::spawn(
            Arc::clone(&registry),
            Arc::clone(&storage),
            SchedulerConfig::default(),
            shutdown_rx,
        );
        (
            ServerContext {
                roles: RoleManager::new(Arc::clone(&registry), scheduler.clone()),
                registry,
                scheduler,
                storage,
            },
            shutdown_tx,
        )
    }

    struct TestConn {
        inbound_tx: mpsc::Sender<Message>,
        outbound_rx: mpsc::Receiver<Message>,
    }

    impl TestConn {
        fn spawn(ctx: &ServerContext<MemoryStorage>, conn: u64) -> Self {
            let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
            let actor = ConnectionActor::new(ctx.clone(), ConnectionId(conn), outbound_tx);
            tokio::spawn(actor.run(inbound_rx));
            Self {
                inbound_tx,
                outbound_rx,
            }
        }

        async fn send(&self, msg: Message) {
            self.inbound_tx.send(msg).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            tokio::time::timeout(std::time::Duration::from_secs(5), self.outbound_rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("connection closed")
        }
    }

    async fn create_session(conn: &mut TestConn) -> ShareCode {
        conn.send(Message::CreateSession(CreateSessionPayload {
            user_id: "alice".into(),
            transfer_mode: TransferMode::Relayed,
            settings: None,
        }))
        .await;
        match conn.recv().await {
            Message::SessionCreated(p) => p.share_code,
            other => panic!("expected SessionCreated, got {other:?}"),
        }
    }

    fn join(code: ShareCode, user: &str, role: Role) -> Message {
        Message::Join(JoinPayload {
            share_code: code,
            user_id: user.into(),
            display_name: user.to_uppercase(),
            desired_role: role,
        })
    }

    #[tokio::test]
    async fn create_join_and_reject_flow() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;

        alice.send(join(code, "alice", Role::Creator)).await;
        match alice.recv().await {
            Message::JoinAck(ack) => {
                assert_eq!(ack.role, Role::Creator);
                assert_eq!(ack.participant_count, 1);
            }
            other => panic!("expected JoinAck, got {other:?}"),
        }

        let mut mallory = TestConn::spawn(&ctx, 2);
        mallory.send(join(code, "mallory", Role::Creator)).await;
        match mallory.recv().await {
            Message::JoinRejected(p) => {
                assert_eq!(p.reason, JoinRejectReason::NotAuthorized);
            }
            other => panic!("expected JoinRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_start_from_another_member_is_busy() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;
        alice.send(join(code, "alice", Role::Creator)).await;
        let _ = alice.recv().await;

        let mut bob = TestConn::spawn(&ctx, 2);
        bob.send(join(code, "bob", Role::Participant)).await;
        let _ = bob.recv().await;
        let _ = alice.recv().await; // participant update

        alice
            .send(Message::Transfer(TransferFrame::Start {
                name: "a.bin".into(),
                size: 10,
                mime_type: "application/octet-stream".into(),
                total_chunks: 1,
            }))
            .await;
        match bob.recv().await {
            Message::Transfer(TransferFrame::Start { name, .. }) => assert_eq!(name, "a.bin"),
            other => panic!("expected relayed Start, got {other:?}"),
        }

        bob.send(Message::Transfer(TransferFrame::Start {
            name: "b.bin".into(),
            size: 10,
            mime_type: "application/octet-stream".into(),
            total_chunks: 1,
        }))
        .await;
        match bob.recv().await {
            Message::Error(p) => assert!(p.message.contains("transfer already in progress")),
            other => panic!("expected busy error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn chunk_without_start_is_a_protocol_error() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;
        alice.send(join(code, "alice", Role::Creator)).await;
        let _ = alice.recv().await;

        alice
            .send(Message::Transfer(TransferFrame::Chunk {
                index: 0,
                payload: vec![0u8; 4],
            }))
            .await;
        match alice.recv().await {
            Message::Error(p) => assert!(p.message.contains("without an open transfer")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn progress_routes_by_direction() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;
        alice.send(join(code, "alice", Role::Creator)).await;
        let _ = alice.recv().await;

        let mut bob = TestConn::spawn(&ctx, 2);
        bob.send(join(code, "bob", Role::Participant)).await;
        let _ = bob.recv().await;
        let _ = alice.recv().await; // participant update

        // Upload progress from the sharer lands on the participant.
        alice
            .send(Message::Progress(ProgressUpdate {
                file_name: "a.bin".into(),
                progress: 50.0,
                speed_bps: 2048.0,
                eta_secs: Some(4),
                direction: TransferDirection::Upload,
            }))
            .await;
        match bob.recv().await {
            Message::Progress(p) => assert_eq!(p.direction, TransferDirection::Upload),
            other => panic!("expected Progress, got {other:?}"),
        }

        // Download progress from the participant lands on the creator.
        bob.send(Message::Progress(ProgressUpdate {
            file_name: "a.bin".into(),
            progress: 25.0,
            speed_bps: 1024.0,
            eta_secs: Some(12),
            direction: TransferDirection::Download,
        }))
        .await;
        match alice.recv().await {
            Message::Progress(p) => assert_eq!(p.direction, TransferDirection::Download),
            other => panic!("expected Progress, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_side_message_from_client_is_rejected() {
        let (ctx, _shutdown) = context();
        let mut conn = TestConn::spawn(&ctx, 1);
        conn.send(Message::ParticipantUpdate(
            qdrop_core::protocol::ParticipantUpdatePayload {
                participant_count: 3,
            },
        ))
        .await;
        match conn.recv().await {
            Message::Error(p) => assert!(p.message.contains("unexpected")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transfer_into_expired_session_is_not_found() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;
        alice.send(join(code, "alice", Role::Creator)).await;
        let _ = alice.recv().await;

        let session = ctx.registry.lookup(&code).await.unwrap();
        // Expire the session out from under the member, as the scheduler does.
        ctx.registry.delete(&code).await;

        alice
            .send(Message::Transfer(TransferFrame::Start {
                name: "late.bin".into(),
                size: 10,
                mime_type: "application/octet-stream".into(),
                total_chunks: 1,
            }))
            .await;
        match alice.recv().await {
            Message::Error(p) => assert!(p.message.contains("session not found")),
            other => panic!("expected Error, got {other:?}"),
        }
        // The dead session must not pick up a transfer slot.
        assert!(session.lock().await.transfer_slot.is_none());
    }

    #[tokio::test]
    async fn disconnect_implies_leave() {
        let (ctx, _shutdown) = context();
        let mut alice = TestConn::spawn(&ctx, 1);
        let code = create_session(&mut alice).await;
        alice.send(join(code, "alice", Role::Creator)).await;
        let _ = alice.recv().await;

        let session = ctx.registry.lookup(&code).await.unwrap();
        assert_eq!(session.participant_count().await, 1);

        drop(alice.inbound_tx);
        // Actor runs cleanup on stream end.
        tokio::task::yield_now().await;
        for _ in 0..100 {
            if session.participant_count().await == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("leave cleanup did not run");
    }
}
