use std::sync::Arc;

use tokio::sync::broadcast;
use uuid::Uuid;

use campus_types::events::GatewayEvent;

/// An event on the wire, tagged with the channel it concerns so each
/// connection can filter against its subscription set. Org-wide events
/// carry no channel id and reach every connection.
#[derive(Debug, Clone)]
pub struct BroadcastMessage {
    pub channel_id: Option<Uuid>,
    pub event: GatewayEvent,
}

/// Fans domain events out to connected gateway clients. All state changes
/// happen in the HTTP layer first; this only relays.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner { broadcast_tx }),
        }
    }

    /// Subscribe to the event stream. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastMessage> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish an event; delivery is best-effort, lagging receivers skip.
    pub fn broadcast(&self, channel_id: Option<Uuid>, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(BroadcastMessage { channel_id, event });
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
