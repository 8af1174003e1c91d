use tokio::sync::broadcast;

use super::FlowEvent;

/// Broadcast channel for dispatcher lifecycle events.
///
/// Thin wrapper over [`tokio::sync::broadcast`]: `publish` never blocks and
/// drops the event if nobody listens; each `subscribe` call creates an
/// independent receiver that only sees events sent after it subscribed.
/// Unsubscribing is dropping the receiver. No replay of missed events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        bus.publish(FlowEvent::InstanceCancelled {
            execution_id: "x".into(),
            reason: "noop".into(),
        });
        // A receiver created afterwards sees nothing from before.
        let mut rx = bus.subscribe();
        bus.publish(FlowEvent::InstanceCancelled {
            execution_id: "y".into(),
            reason: "seen".into(),
        });
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.execution_id(), "y");
    }

    #[tokio::test]
    async fn subscribers_see_events_in_emission_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        for id in ["a", "b", "c"] {
            bus.publish(FlowEvent::InstanceCancelled {
                execution_id: id.into(),
                reason: String::new(),
            });
        }
        assert_eq!(rx.recv().await.unwrap().execution_id(), "a");
        assert_eq!(rx.recv().await.unwrap().execution_id(), "b");
        assert_eq!(rx.recv().await.unwrap().execution_id(), "c");
    }
}
