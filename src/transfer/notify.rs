//! Post-commit notification sink
//!
//! Delivery is at-most-once and never blocks the authorizer: `publish` is a
//! synchronous, non-waiting call and a full or closed channel drops the event.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::types::TransferEvent;

pub trait NotificationSink: Send + Sync {
    fn publish(&self, event: TransferEvent);
}

/// Bounded channel to an external delivery task
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TransferEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn publish(&self, event: TransferEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    transaction_id = %event.transaction_id,
                    receiver = %event.key(),
                    "Notification channel full, event dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(transaction_id = %event.transaction_id, "Notification channel closed");
            }
        }
    }
}

/// Writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn publish(&self, event: TransferEvent) {
        info!(
            transaction_id = %event.transaction_id,
            sender = %event.sender,
            receiver = %event.receiver,
            amount = %event.amount,
            "Transfer event"
        );
    }
}
