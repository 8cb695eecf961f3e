use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Published when a booking is created.
pub const NEW_BOOKING: &str = "new-booking";
/// Published for service and document alerts.
pub const MAINTENANCE_ALERT: &str = "maintenance-alert";

const CHANNEL_CAPACITY: usize = 256;

/// Notification collaborator. Fire-and-forget: the engine never learns
/// whether anyone received the message.
pub trait Notifier: Send + Sync {
    fn publish(&self, kind: &str, payload: Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub payload: Value,
}

/// Broadcast hub with one channel per notification kind.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind. Creates the channel if needed.
    pub fn subscribe(&self, kind: &str) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(kind.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening.
    fn publish(&self, kind: &str, payload: Value) {
        metrics::counter!(crate::observability::NOTIFICATIONS_PUBLISHED_TOTAL, "kind" => kind.to_string())
            .increment(1);
        if let Some(sender) = self.channels.get(kind) {
            let _ = sender.send(Notification {
                kind: kind.to_string(),
                payload,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(NEW_BOOKING);

        hub.publish(NEW_BOOKING, json!({ "booking_id": "b1" }));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, NEW_BOOKING);
        assert_eq!(received.payload["booking_id"], "b1");
    }

    #[tokio::test]
    async fn kinds_are_isolated() {
        let hub = NotifyHub::new();
        let mut bookings = hub.subscribe(NEW_BOOKING);
        let mut alerts = hub.subscribe(MAINTENANCE_ALERT);

        hub.publish(MAINTENANCE_ALERT, json!({ "kind": "service-500" }));

        assert_eq!(alerts.recv().await.unwrap().payload["kind"], "service-500");
        assert!(matches!(
            bookings.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish("nobody-listens", json!(null));
    }
}
