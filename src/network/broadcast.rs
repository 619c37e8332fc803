//! Broadcast Engine
//!
//! Fans registry notifications out to their target sessions. Payloads are
//! snapshotted under the registry lock; delivery happens here, after the
//! lock is released, so a slow or dead peer never stalls unrelated
//! registry operations.
//!
//! A failed send means the target's transport is gone: that session is put
//! through disconnect cleanup, which may emit further notifications for the
//! survivors. The cascade is bounded because cleanup is idempotent per
//! `(player, connection)` pair — a session closes at most once.

use std::sync::Arc;

use tracing::debug;

use crate::network::protocol::ServerMessage;
use crate::network::registry::Registry;
use crate::network::session::SessionHandle;

/// One pending notification: a snapshot message bound for one session.
#[derive(Debug)]
pub struct Delivery {
    /// The session to notify.
    pub target: SessionHandle,
    /// Snapshot payload, taken under the registry lock.
    pub message: ServerMessage,
}

/// Sends delivery batches and runs the dead-peer cascade.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    /// Create a broadcaster over the registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Deliver a batch, cleaning up any target whose transport is gone.
    pub async fn deliver(&self, mut batch: Vec<Delivery>) {
        while !batch.is_empty() {
            let mut dead = Vec::new();

            for Delivery { target, message } in batch.drain(..) {
                if target.sender.send(message).await.is_err() {
                    debug!(player = %target.player_id, conn = %target.conn_id,
                        "broadcast target unreachable");
                    // Wake the reader loop in case it has not noticed yet.
                    target.close.notify_one();
                    dead.push(target);
                }
            }

            for target in dead {
                batch.extend(
                    self.registry
                        .disconnect(target.player_id, target.conn_id)
                        .await,
                );
            }
        }
    }
}
