pub mod payload;
pub mod protocol;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use pagelift_core_types::LiftError;

/// Trait implemented by payload types that can be carried on a bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), LiftError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory bus backing one messaging boundary (page or extension side).
///
/// Each browser context in the original design owns exactly one event loop;
/// the broadcast channel reproduces the fan-out each bus listener sees.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), LiftError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|err| LiftError::new(err.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Helper to materialise an mpsc receiver from the bus subscription
/// so callers can await events without handling broadcast semantics directly.
pub fn to_mpsc<E>(bus: Arc<InMemoryBus<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = bus.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        while let Ok(ev) = rx.recv().await {
            if tx.send(ev).await.is_err() {
                break;
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(8);
        let mut rx_a = bus.subscribe();
        let mut rx_b = bus.subscribe();

        bus.publish(7).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), 7);
        assert_eq!(rx_b.recv().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_an_error() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(8);
        assert!(bus.publish(1).await.is_err());
    }

    #[tokio::test]
    async fn mpsc_adapter_preserves_send_order() {
        let bus: Arc<InMemoryBus<u32>> = InMemoryBus::new(8);
        let mut rx = to_mpsc(Arc::clone(&bus), 8);

        bus.publish(1).await.unwrap();
        bus.publish(2).await.unwrap();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
