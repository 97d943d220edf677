//! In-process event bus.

use async_trait::async_trait;
use gantry_core::Result;
use gantry_core::events::Event;
use gantry_core::ports::EventBus;
use tokio::sync::broadcast;

/// Fans events out to every subscriber. Publishing with no subscribers is not
/// an error, and slow subscribers lose the oldest events.
#[derive(Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let _ = self.sender.send(event);
        Ok(())
    }
}
