// SPDX-License-Identifier: MIT
//! Alert pipeline coordinator.
//!
//! A single long-lived task that drains the ingestion mailbox one batch at
//! a time: refresh config, gate on cluster leadership, let a burst of check
//! changes settle, diff, compose messages, queue them. Leadership polls and
//! settle waits are cancellable sleeps so shutdown never blocks on a timer.

use crate::cluster::{ClusterStateClient, LeaderHandle};
use crate::model::{Check, CheckStatus, Message};
use crate::notify::NotificationEngine;
use crate::pipeline::Mailbox;
use crate::registry::ServiceRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How many times to poll for a leader before abandoning a batch.
const LEADER_WAIT_POLLS: u32 = 6;
/// Pause between leadership polls.
const LEADER_POLL_PAUSE: Duration = Duration::from_secs(5);
/// Settle-wait refresh cadence.
const SETTLE_STEP_SECS: u64 = 10;

pub struct CheckProcessor {
    cluster: Arc<dyn ClusterStateClient>,
    notifier: Arc<dyn NotificationEngine>,
    registry: Arc<dyn ServiceRegistry>,
    leader: Arc<LeaderHandle>,
    mailbox: Arc<Mailbox<Vec<Check>>>,
    shutdown: watch::Receiver<bool>,
}

impl CheckProcessor {
    pub fn new(
        cluster: Arc<dyn ClusterStateClient>,
        notifier: Arc<dyn NotificationEngine>,
        registry: Arc<dyn ServiceRegistry>,
        leader: Arc<LeaderHandle>,
        mailbox: Arc<Mailbox<Vec<Check>>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            cluster,
            notifier,
            registry,
            leader,
            mailbox,
            shutdown,
        }
    }

    /// Main loop: idle until the mailbox delivers a batch, process it,
    /// repeat. Exits on the shutdown signal.
    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let mailbox = Arc::clone(&self.mailbox);
            let batch = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                batch = mailbox.recv() => batch,
            };
            if !self.handle_checks(batch).await {
                break;
            }
        }
        info!("check processor stopped");
    }

    /// Drive one batch through the pipeline.
    /// Returns false when a shutdown signal interrupted a wait.
    pub async fn handle_checks(&mut self, batch: Vec<Check>) -> bool {
        if let Err(e) = self.cluster.load_config().await {
            warn!(err = %e, "config refresh failed, continuing with last known config");
        }

        // A follower-turned-candidate only waits so long for an election
        // to resolve before the batch goes stale.
        let mut polls = 0;
        while !self.leader.has_leader() {
            if polls >= LEADER_WAIT_POLLS {
                warn!("no leader elected within the wait bound, skipping this batch");
                return true;
            }
            info!("there is currently no alert leader, waiting for one");
            if !self.pause(LEADER_POLL_PAUSE).await {
                return false;
            }
            polls += 1;
        }

        if !self.leader.is_leader() {
            info!("currently not the leader, ignoring checks");
            return true;
        }

        info!(batch = batch.len(), "running health check");
        let threshold = self.cluster.check_change_threshold().await;
        let mut elapsed = 0;
        while elapsed + SETTLE_STEP_SECS <= threshold {
            if !self.pause(Duration::from_secs(SETTLE_STEP_SECS)).await {
                return false;
            }
            elapsed += SETTLE_STEP_SECS;
            if let Err(e) = self.cluster.update_check_data().await {
                warn!(err = %e, "check data refresh failed during settle wait");
            }
        }
        // One final refresh regardless of threshold, so threshold=0 still
        // diffs against fresh data.
        if let Err(e) = self.cluster.update_check_data().await {
            warn!(err = %e, "final check data refresh failed");
        }

        debug!("processing health checks for notification");
        let alerts = match self.cluster.new_alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(err = %e, "could not diff check data, skipping this batch");
                return true;
            }
        };
        if !alerts.is_empty() {
            self.notify(alerts).await;
        }
        true
    }

    /// Compose and queue messages for newly alerting checks, with reminder
    /// bookkeeping for reminder-eligible ones.
    async fn notify(&self, alerts: Vec<Check>) {
        let mut messages = Vec::with_capacity(alerts.len());
        for alert in alerts {
            let profile = self
                .cluster
                .get_profile_info(&alert.node, &alert.service_id, &alert.check_id, alert.status)
                .await;
            let tags = self.registry.service_tags(&alert.service_id).await;
            let message = Message::compose(&alert, &profile, tags, Utc::now());

            if profile.interval > 0 {
                match alert.status {
                    CheckStatus::Passing => {
                        if let Err(e) = self
                            .cluster
                            .delete_reminder(&alert.node, &alert.check_id)
                            .await
                        {
                            warn!(node = %alert.node, check = %alert.check_id, err = %e,
                                "reminder delete failed");
                        }
                    }
                    CheckStatus::Warning | CheckStatus::Critical => {
                        if let Err(e) = self.cluster.set_reminder(&message).await {
                            warn!(node = %alert.node, check = %alert.check_id, err = %e,
                                "reminder upsert failed");
                        }
                    }
                    CheckStatus::Unknown => {}
                }
            }
            messages.push(message);
        }

        if messages.is_empty() {
            debug!("nothing to notify");
            return;
        }
        info!(count = messages.len(), "queueing notifications");
        self.notifier.queue_messages(messages).await;
    }

    /// Sleep that a shutdown signal can interrupt. Returns false on shutdown.
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.shutdown.changed() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
