// SPDX-License-Identifier: MIT
//! The alert pipeline: single-slot ingestion mailbox, the batch
//! coordinator ([`processor::CheckProcessor`]) and the reminder
//! reconciliation loop ([`reminders::ReminderScheduler`]).

pub mod processor;
pub mod reminders;

use std::sync::Mutex;
use tokio::sync::Notify;

/// Depth-1 buffer with overwrite-newest semantics.
///
/// A producer that finds the slot occupied replaces the stale value, so the
/// consumer only ever sees the most recent deposit and a burst of triggers
/// collapses to one batch. Producers never block.
#[derive(Debug, Default)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Deposit a value, replacing any unconsumed one.
    /// Returns true when a stale value was discarded.
    pub fn deposit(&self, value: T) -> bool {
        let replaced = {
            let mut slot = self.slot.lock().expect("mailbox lock poisoned");
            let replaced = slot.is_some();
            *slot = Some(value);
            replaced
        };
        self.notify.notify_one();
        replaced
    }

    /// Wait for the next value. Cancel-safe: dropping the future before it
    /// resolves leaves any deposited value in the slot.
    pub async fn recv(&self) -> T {
        loop {
            if let Some(value) = self.take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    /// Non-blocking take of a pending value, if any.
    pub fn take(&self) -> Option<T> {
        self.slot.lock().expect("mailbox lock poisoned").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mailbox_delivers_deposit() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.deposit(1u32));
        assert_eq!(mailbox.recv().await, 1);
    }

    #[tokio::test]
    async fn test_mailbox_coalesces_to_newest() {
        let mailbox = Mailbox::new();
        assert!(!mailbox.deposit("stale"));
        assert!(mailbox.deposit("fresh"));
        assert_eq!(mailbox.recv().await, "fresh");
        assert!(mailbox.take().is_none());
    }

    #[tokio::test]
    async fn test_mailbox_wakes_pending_receiver() {
        let mailbox = std::sync::Arc::new(Mailbox::new());
        let rx = mailbox.clone();
        let waiter = tokio::spawn(async move { rx.recv().await });
        tokio::task::yield_now().await;
        mailbox.deposit(7u64);
        assert_eq!(waiter.await.unwrap(), 7);
    }
}
