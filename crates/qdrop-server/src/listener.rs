//! TCP listener and connection plumbing.
//!
//! Accepts connections, assigns connection ids, and splits each socket into
//! a reader task (bytes in, frames decoded, messages to the actor) and a
//! writer task (messages from the actor's outbound queue, frames encoded,
//! bytes out). The actor itself never touches the socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace};

use qdrop_core::constants::OUTBOUND_QUEUE_DEPTH;
use qdrop_core::error::Result;
use qdrop_core::protocol::{Codec, ConnectionId, Message};

use crate::connection::{ConnectionActor, ServerContext};
use crate::storage::Storage;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Accept connections until shutdown is signalled.
pub async fn serve<S: Storage>(
    bind: SocketAddr,
    ctx: ServerContext<S>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = ConnectionId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
                        debug!(conn = %conn_id, %peer, "connection accepted");
                        tokio::spawn(handle_connection(stream, conn_id, ctx.clone()));
                    }
                    Err(err) => {
                        // Transient accept errors (e.g. EMFILE) must not kill
                        // the listener.
                        error!(%err, "accept failed");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection<S: Storage>(stream: TcpStream, conn_id: ConnectionId, ctx: ServerContext<S>) {
    let (reader, writer) = stream.into_split();
    let (in_tx, in_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
    let (out_tx, out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);

    let read_task = tokio::spawn(read_loop(reader, conn_id, in_tx));
    let write_task = tokio::spawn(write_loop(writer, conn_id, out_rx));

    ConnectionActor::new(ctx, conn_id, out_tx).run(in_rx).await;

    read_task.abort();
    write_task.abort();
    trace!(conn = %conn_id, "connection torn down");
}

/// Decode frames off the socket and feed them to the actor. Ends on EOF,
/// read error, or malformed frame; dropping the sender ends the actor too.
async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    conn_id: ConnectionId,
    in_tx: mpsc::Sender<Message>,
) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        match Codec::decode(&mut buf) {
            Ok(Some(msg)) => {
                if in_tx.send(msg).await.is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                debug!(conn = %conn_id, %err, "dropping connection on malformed frame");
                return;
            }
        }

        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                trace!(conn = %conn_id, "peer closed connection");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(conn = %conn_id, %err, "read error");
                return;
            }
        }
    }
}

/// Drain the actor's outbound queue onto the socket.
async fn write_loop(
    mut writer: tokio::net::tcp::OwnedWriteHalf,
    conn_id: ConnectionId,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        let frame = match Codec::encode(&msg) {
            Ok(frame) => frame,
            Err(err) => {
                error!(conn = %conn_id, %err, "failed to encode outbound message");
                continue;
            }
        };
        if let Err(err) = writer.write_all(&frame).await {
            debug!(conn = %conn_id, %err, "write error");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
