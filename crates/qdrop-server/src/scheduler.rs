//! Expiry scheduler supervisor.
//!
//! One background task owns all lifetime bookkeeping: the periodic TTL sweep
//! and the grace timers for sessions whose last participant left. Handlers
//! never delete sessions themselves; they send commands here and the
//! supervisor serializes every deletion through `SessionRegistry::delete`,
//! which is idempotent, so a rejoin racing a grace expiry resolves cleanly
//! in either order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

use qdrop_core::constants::{EMPTY_GRACE_PERIOD, SESSION_TTL, SWEEP_INTERVAL};
use qdrop_core::protocol::ShareCode;

use crate::registry::SessionRegistry;
use crate::storage::Storage;

/// Scheduler timing knobs, overridable from the CLI.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum session lifetime, measured from creation.
    pub ttl: Duration,
    /// How long an empty session survives before deletion.
    pub grace: Duration,
    /// Spacing between sweeps.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ttl: SESSION_TTL,
            grace: EMPTY_GRACE_PERIOD,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

enum Command {
    /// The session just became empty; start its grace countdown.
    ArmGrace(ShareCode),
    /// A participant (re)joined; stop any pending countdown.
    CancelGrace(ShareCode),
}

/// Cheap cloneable handle for sending commands to the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    pub fn arm_grace(&self, share_code: ShareCode) {
        // Send fails only after shutdown, when expiry no longer matters.
        let _ = self.cmd_tx.send(Command::ArmGrace(share_code));
    }

    pub fn cancel_grace(&self, share_code: ShareCode) {
        let _ = self.cmd_tx.send(Command::CancelGrace(share_code));
    }
}

/// Spawn the scheduler supervisor task.
pub fn spawn<S: Storage>(
    registry: Arc<SessionRegistry>,
    storage: Arc<S>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(registry, storage, config, cmd_rx, shutdown));
    (SchedulerHandle { cmd_tx }, task)
}

async fn run<S: Storage>(
    registry: Arc<SessionRegistry>,
    storage: Arc<S>,
    config: SchedulerConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut grace_deadlines: HashMap<ShareCode, Instant> = HashMap::new();
    let mut ticker = tokio::time::interval(config.sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        ttl_secs = config.ttl.as_secs(),
        grace_secs = config.grace.as_secs(),
        sweep_secs = config.sweep_interval.as_secs(),
        "expiry scheduler started"
    );

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::ArmGrace(code)) => {
                        let deadline = Instant::now() + config.grace;
                        grace_deadlines.insert(code, deadline);
                        debug!(share_code = %code, "grace timer armed");
                    }
                    Some(Command::CancelGrace(code)) => {
                        if grace_deadlines.remove(&code).is_some() {
                            debug!(share_code = %code, "grace timer cancelled");
                        }
                    }
                    None => {
                        // All handles dropped; nothing can arm timers anymore.
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                sweep(&registry, &*storage, &config, &mut grace_deadlines).await;
            }
            changed = shutdown.changed() => {
                // A dropped sender means the server is gone; treat it like an
                // explicit shutdown instead of spinning on the closed watch.
                if changed.is_err() || *shutdown.borrow() {
                    info!("expiry scheduler shutting down");
                    break;
                }
            }
        }
    }
}

/// One sweep pass: retire TTL-expired sessions, then fire elapsed grace
/// timers.
async fn sweep<S: Storage>(
    registry: &SessionRegistry,
    storage: &S,
    config: &SchedulerConfig,
    grace_deadlines: &mut HashMap<ShareCode, Instant>,
) {
    let now = Instant::now();

    for session in registry.snapshot().await {
        if !session.settings.auto_expire {
            continue;
        }
        if session.age() >= config.ttl {
            info!(
                share_code = %session.share_code,
                age_secs = session.age().as_secs(),
                "session reached its lifetime limit"
            );
            grace_deadlines.remove(&session.share_code);
            delete_session(registry, storage, &session.share_code).await;
        }
    }

    let elapsed: Vec<ShareCode> = grace_deadlines
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(code, _)| *code)
        .collect();

    for code in elapsed {
        grace_deadlines.remove(&code);

        // Re-check under the session's own lock: a rejoin may have raced the
        // cancel command past this sweep.
        let Some(session) = registry.lookup(&code).await else {
            continue;
        };
        if session.participant_count().await > 0 {
            trace!(share_code = %code, "grace expired but session repopulated");
            continue;
        }

        info!(share_code = %code, "empty session grace period elapsed");
        delete_session(registry, storage, &code).await;
    }
}

/// Delete one session and its stored objects. Storage failures are logged
/// and skipped; an orphaned object is better than a wedged sweep.
async fn delete_session<S: Storage>(
    registry: &SessionRegistry,
    storage: &S,
    share_code: &ShareCode,
) {
    let Some(keys) = registry.delete(share_code).await else {
        return;
    };
    for key in keys {
        if let Err(err) = storage.delete(&key).await {
            error!(%share_code, key, %err, "failed to delete stored object");
        }
    }
}
