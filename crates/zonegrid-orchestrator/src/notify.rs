//! Fire-and-forget zone change notifications.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use zonegrid_state::ZoneState;

/// A change other processes may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ZoneEvent {
    Created { zone_id: String, space: String },
    Updated { zone_id: String, space: String, state: ZoneState },
    Removed { zone_id: String, space: String },
}

/// Best-effort, at-most-once publisher. Must never block the caller.
pub trait NotificationBus: Send + Sync {
    fn publish(&self, event: ZoneEvent);
}

/// In-process bus backed by a `tokio::sync::broadcast` channel.
///
/// Slow subscribers lag and lose events; publishing with no subscribers is
/// a no-op.
#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<ZoneEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ZoneEvent> {
        self.tx.subscribe()
    }
}

impl NotificationBus for BroadcastBus {
    fn publish(&self, event: ZoneEvent) {
        if self.tx.send(event).is_err() {
            trace!("zone event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = BroadcastBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(ZoneEvent::Created {
            zone_id: "z1".into(),
            space: "s1".into(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            ZoneEvent::Created {
                zone_id: "z1".into(),
                space: "s1".into()
            }
        );
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = BroadcastBus::new(1);
        bus.publish(ZoneEvent::Removed {
            zone_id: "z1".into(),
            space: "s1".into(),
        });
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ZoneEvent::Updated {
            zone_id: "z1".into(),
            space: "s1".into(),
            state: ZoneState::Ready,
        })
        .unwrap();
        assert_eq!(json["type"], "updated");
        assert_eq!(json["state"], "READY");
    }
}
