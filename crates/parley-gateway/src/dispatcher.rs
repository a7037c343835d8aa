use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// Manages connected clients and fans events out to them. REST handlers
/// broadcast through this after each mutation; connected clients use the
/// events as a signal to re-run the affected query.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for gateway events — every connection receives
    /// every event and filters chat-scoped ones by its own subscriptions.
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Online users: user_id -> owning connection id. A reconnect replaces
    /// the owner, so a late disconnect from the old socket cannot flap the
    /// user offline.
    online: RwLock<HashMap<Uuid, Uuid>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a connection for a user, taking ownership of their online
    /// entry, and announce them online. Returns the connection id.
    pub async fn connect(&self, user_id: Uuid) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.online.write().await.insert(user_id, conn_id);

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            is_online: true,
        });

        conn_id
    }

    /// Drop a connection. Only the owning connection may flip the user
    /// offline; returns whether it did.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        {
            let mut online = self.inner.online.write().await;
            match online.get(&user_id) {
                Some(owner) if *owner == conn_id => {
                    online.remove(&user_id);
                }
                // A newer connection has taken over — don't touch anything
                _ => return false,
            }
        }

        self.broadcast(GatewayEvent::PresenceUpdate {
            user_id,
            is_online: false,
        });
        true
    }

    /// Users with a live gateway connection.
    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online.read().await.keys().copied().collect()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        let user_id = Uuid::new_v4();
        dispatcher.broadcast(GatewayEvent::PresenceUpdate { user_id, is_online: true });

        match rx.recv().await.unwrap() {
            GatewayEvent::PresenceUpdate { user_id: got, is_online } => {
                assert_eq!(got, user_id);
                assert!(is_online);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_flap_presence() {
        let dispatcher = Dispatcher::new();
        let user_id = Uuid::new_v4();

        let old_conn = dispatcher.connect(user_id).await;
        // the user reconnects before the old socket tears down
        let _new_conn = dispatcher.connect(user_id).await;

        assert!(!dispatcher.disconnect(user_id, old_conn).await);
        assert_eq!(dispatcher.online_users().await, vec![user_id]);
    }

    #[tokio::test]
    async fn test_owning_disconnect_goes_offline() {
        let dispatcher = Dispatcher::new();
        let user_id = Uuid::new_v4();

        let conn = dispatcher.connect(user_id).await;
        assert!(dispatcher.disconnect(user_id, conn).await);
        assert!(dispatcher.online_users().await.is_empty());
    }
}
