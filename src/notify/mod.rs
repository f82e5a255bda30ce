// SPDX-License-Identifier: MIT
//! Notification engine seam.
//!
//! The pipeline hands composed message batches to a [`NotificationEngine`]
//! and never awaits delivery. Real transports (email, chat, webhooks) live
//! behind this trait; the binary ships [`LogNotifier`], which writes each
//! batch to the log.

use crate::model::Message;
use async_trait::async_trait;
use tracing::{debug, info};

/// Accepts message batches for asynchronous delivery.
#[async_trait]
pub trait NotificationEngine: Send + Sync {
    /// Queue a batch. Implementations must not block the pipeline on
    /// delivery; failures are theirs to log and retry.
    async fn queue_messages(&self, messages: Vec<Message>);
}

/// Log-backed engine: one structured line per message, full payload at
/// debug. Useful standalone and as the default wiring in the binary.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationEngine for LogNotifier {
    async fn queue_messages(&self, messages: Vec<Message>) {
        for message in &messages {
            info!(
                node = %message.node,
                service = %message.service_id,
                check = %message.check_id,
                status = %message.status,
                interval = message.interval,
                "notification queued"
            );
            if let Ok(payload) = serde_json::to_string(message) {
                debug!(payload = %payload, "notification payload");
            }
        }
    }
}
