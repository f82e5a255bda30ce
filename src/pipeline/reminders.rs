// SPDX-License-Identifier: MIT
//! Reminder scheduler.
//!
//! Timer-driven reconciliation of outstanding reminders: every tick, on the
//! leader only, blacklisted reminders are deleted and due reminders are
//! re-fired with their last-reminder timestamp advanced. A reminder is due
//! once its full interval has elapsed — never early, even by a second.

use crate::cluster::{ClusterStateClient, LeaderHandle};
use crate::notify::NotificationEngine;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Whether a reminder last fired at `last` with `interval_mins` is due at
/// `now`. Exact-seconds comparison: 9m59s is not due for a 10-minute
/// interval, 10m00s is.
fn reminder_due(last: DateTime<Utc>, interval_mins: i64, now: DateTime<Utc>) -> bool {
    if interval_mins <= 0 {
        return false;
    }
    (now - last).num_seconds() >= interval_mins * 60
}

pub struct ReminderScheduler {
    cluster: Arc<dyn ClusterStateClient>,
    notifier: Arc<dyn NotificationEngine>,
    leader: Arc<LeaderHandle>,
    shutdown: watch::Receiver<bool>,
    tick: Duration,
}

impl ReminderScheduler {
    pub fn new(
        cluster: Arc<dyn ClusterStateClient>,
        notifier: Arc<dyn NotificationEngine>,
        leader: Arc<LeaderHandle>,
        shutdown: watch::Receiver<bool>,
        tick: Duration,
    ) -> Self {
        Self {
            cluster,
            notifier,
            leader,
            shutdown,
            tick,
        }
    }

    /// Tick loop. Exits on the shutdown signal.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                _ = ticker.tick() => self.run_once().await,
            }
        }
        info!("reminder scheduler stopped");
    }

    /// One reconciliation pass. Public so embedders and tests can drive
    /// ticks directly.
    pub async fn run_once(&self) {
        if !self.leader.is_leader() {
            debug!("currently not the leader, ignoring reminders");
            return;
        }
        info!("running reminder check");

        let reminders = match self.cluster.get_reminders().await {
            Ok(reminders) => reminders,
            Err(e) => {
                warn!(err = %e, "could not fetch reminders, skipping this tick");
                return;
            }
        };

        let mut due = Vec::new();
        for mut message in reminders {
            let check = message.to_check();

            // Blacklisting always wins over cadence.
            if self.cluster.is_blacklisted(&check).await {
                info!(node = %check.node, service = %check.service_id, check = %check.check_id,
                    "blacklisted, deleting reminder");
                if let Err(e) = self
                    .cluster
                    .delete_reminder(&check.node, &check.check_id)
                    .await
                {
                    warn!(node = %check.node, check = %check.check_id, err = %e,
                        "reminder delete failed");
                }
                continue;
            }

            let now = Utc::now();
            if reminder_due(message.rmd_check, message.interval, now) {
                message.rmd_check = now;
                // Persist the advanced timestamp before queueing, so a crash
                // between the two cannot double-fire on the next tick.
                if let Err(e) = self.cluster.set_reminder(&message).await {
                    warn!(node = %message.node, check = %message.check_id, err = %e,
                        "reminder refresh failed");
                }
                due.push(message);
            }
        }

        if !due.is_empty() {
            info!(count = due.len(), "re-firing overdue reminders");
            self.notifier.queue_messages(due).await;
        }
    }
}
