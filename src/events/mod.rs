use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Domain events emitted by the services. Consumed in-process; external
/// notification transport is a separate collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    CheckoutInitiated {
        order_id: Uuid,
        checkout_id: String,
    },
    PaymentConfirmed(Uuid),
    PaymentFailed(Uuid),
    PointsAwarded {
        user_id: Uuid,
        order_id: Uuid,
        points: i64,
    },
    PointsExpired {
        user_id: Uuid,
        points: i64,
    },
    BirthdayRewardIssued(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Creates a connected sender/receiver pair.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drains and logs events. Spawned once at startup.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::PointsAwarded {
                user_id,
                order_id,
                points,
            } => {
                info!(user_id = %user_id, order_id = %order_id, points = points, "Points awarded");
            }
            Event::PaymentConfirmed(order_id) => {
                info!(order_id = %order_id, "Payment confirmed");
            }
            Event::PaymentFailed(order_id) => {
                info!(order_id = %order_id, "Payment failed");
            }
            other => debug!(event = ?other, "Event processed"),
        }
    }
    info!("Event processor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_flow_through_the_channel() {
        let (sender, mut rx) = channel(8);
        let order_id = Uuid::new_v4();
        sender
            .send(Event::PaymentConfirmed(order_id))
            .await
            .expect("send");
        match rx.recv().await {
            Some(Event::PaymentConfirmed(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
