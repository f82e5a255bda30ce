// SPDX-License-Identifier: MIT
//! Cluster state access.
//!
//! [`ClusterStateClient`] is the seam between the alert pipeline and
//! whatever coordination service backs it. The pipeline and the reminder
//! scheduler only ever talk to this trait, so tests substitute fakes and
//! the binary wires the Consul-backed [`consul::ConsulClient`].
//!
//! [`LeaderHandle`] is the shared leadership view. Election itself is
//! external; whoever runs it flips these flags.

pub mod consul;

use crate::model::{Check, CheckStatus, Message, NotificationProfile};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Capability set the alert pipeline consumes from the coordination service.
///
/// Fallible operations return `Result`; the pipeline logs failures and moves
/// on — retry policy belongs to the implementation, not the caller.
#[async_trait]
pub trait ClusterStateClient: Send + Sync {
    /// Refresh alerting configuration from the cluster.
    async fn load_config(&self) -> Result<()>;

    /// Whether check processing is administratively enabled.
    async fn checks_enabled(&self) -> bool;

    /// Settle-wait duration in seconds before diffing a changed check set.
    async fn check_change_threshold(&self) -> u64;

    /// Refresh/merge the current check snapshot from the cluster.
    async fn update_check_data(&self) -> Result<()>;

    /// Checks whose status changed since the last call.
    async fn new_alerts(&self) -> Result<Vec<Check>>;

    /// Notification policy for one check. Lookup failures degrade to the
    /// default profile, never to an error.
    async fn get_profile_info(
        &self,
        node: &str,
        service_id: &str,
        check_id: &str,
        status: CheckStatus,
    ) -> NotificationProfile;

    /// Whether an operator has suppressed notifications for this check.
    async fn is_blacklisted(&self, check: &Check) -> bool;

    /// Create or refresh the reminder record for a message.
    async fn set_reminder(&self, message: &Message) -> Result<()>;

    /// Delete the reminder record for (node, check), if any.
    async fn delete_reminder(&self, node: &str, check_id: &str) -> Result<()>;

    /// All pending reminder records.
    async fn get_reminders(&self) -> Result<Vec<Message>>;
}

/// Shared leadership view, updated by the election mechanism and read by
/// both pipeline tasks. Two flags: whether the cluster has *any* leader,
/// and whether *this* node is it.
#[derive(Debug, Default)]
pub struct LeaderHandle {
    is_leader: AtomicBool,
    has_leader: AtomicBool,
}

impl LeaderHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    pub fn has_leader(&self) -> bool {
        self.has_leader.load(Ordering::SeqCst)
    }

    pub fn set_leader(&self, leader: bool) {
        self.is_leader.store(leader, Ordering::SeqCst);
        if leader {
            self.has_leader.store(true, Ordering::SeqCst);
        }
    }

    pub fn set_has_leader(&self, has: bool) {
        self.has_leader.store(has, Ordering::SeqCst);
    }
}
