//! Best-effort event publication
//!
//! A thin wrapper around a `tokio::sync::broadcast` channel. Publishing with
//! no subscribers, or to a subscriber that lags behind, is not an error: the
//! ledger outcome has already been committed when an event is published.

use tokio::sync::broadcast;

use crate::types::LedgerEvent;

const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LedgerEvent) {
        match self.sender.send(event) {
            Ok(receivers) => tracing::debug!(receivers, "Published ledger event"),
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(?event, "No subscribers for ledger event")
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reset_event() -> LedgerEvent {
        LedgerEvent::DailyLimitsReset {
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            accounts: 3,
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        EventBus::new().publish(reset_event());
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        bus.publish(reset_event());
        assert_eq!(receiver.recv().await.unwrap(), reset_event());
    }
}
