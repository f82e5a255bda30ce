// SPDX-License-Identifier: MIT
//! Core data model: checks arriving from the cluster watch, per-check
//! notification profiles, and the [`Message`] unit handed to the
//! notification engine.
//!
//! `Check` mirrors the Consul health-check wire casing because the trigger
//! body is the raw watch payload. `Message` is also the persisted reminder
//! record, so it derives `Deserialize` as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Health-check status as reported by the cluster.
///
/// Anything the wire sends that we don't recognize decodes to `Unknown`
/// rather than failing the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
    #[serde(other)]
    Unknown,
}

impl CheckStatus {
    /// Warning and critical are the alerting states; passing and unknown
    /// never create or refresh reminders.
    pub fn is_alerting(self) -> bool {
        matches!(self, CheckStatus::Warning | CheckStatus::Critical)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckStatus::Passing => "passing",
            CheckStatus::Warning => "warning",
            CheckStatus::Critical => "critical",
            CheckStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A point-in-time observation of one monitored health check.
///
/// Field names follow the Consul `/v1/health/state/any` casing so the same
/// type decodes both the trigger body and the health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    #[serde(rename = "Node")]
    pub node: String,
    #[serde(rename = "CheckID")]
    pub check_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: CheckStatus,
    #[serde(rename = "Notes", default)]
    pub notes: String,
    #[serde(rename = "Output", default)]
    pub output: String,
    #[serde(rename = "ServiceID", default)]
    pub service_id: String,
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
}

/// Per-check/service alerting policy, looked up at notify time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationProfile {
    /// Reminder interval in minutes. 0 disables reminders.
    #[serde(default)]
    pub interval: i64,
    #[serde(default)]
    pub notif_list: Vec<String>,
    #[serde(default)]
    pub var_overrides: HashMap<String, String>,
}

/// The unit handed to the notification engine, and the shape persisted as
/// a reminder record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Node")]
    pub node: String,
    #[serde(rename = "ServiceId")]
    pub service_id: String,
    #[serde(rename = "Service")]
    pub service: String,
    #[serde(rename = "ServiceTags", default)]
    pub service_tags: Vec<String>,
    #[serde(rename = "CheckId")]
    pub check_id: String,
    #[serde(rename = "Check")]
    pub check: String,
    #[serde(rename = "Status")]
    pub status: CheckStatus,
    #[serde(rename = "Output", default)]
    pub output: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
    /// Reminder interval in minutes; 0 = fire-and-forget.
    #[serde(rename = "Interval")]
    pub interval: i64,
    /// When the reminder for this alert last fired. Advances only when the
    /// reminder is actually re-fired.
    #[serde(rename = "RmdCheck")]
    pub rmd_check: DateTime<Utc>,
    #[serde(rename = "NotifList", default)]
    pub notif_list: Vec<String>,
    #[serde(rename = "VarOverrides", default)]
    pub var_overrides: HashMap<String, String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a message from a check plus its resolved profile and tags.
    /// Creation time and last-reminder time are both `now`.
    pub fn compose(
        check: &Check,
        profile: &NotificationProfile,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            node: check.node.clone(),
            service_id: check.service_id.clone(),
            service: check.service_name.clone(),
            service_tags: tags,
            check_id: check.check_id.clone(),
            check: check.name.clone(),
            status: check.status,
            output: check.output.clone(),
            notes: check.notes.clone(),
            interval: profile.interval,
            rmd_check: now,
            notif_list: profile.notif_list.clone(),
            var_overrides: profile.var_overrides.clone(),
            timestamp: now,
        }
    }

    /// Reconstruct the check this message was composed from. Used by the
    /// reminder loop for blacklist lookups (tags are not round-tripped).
    pub fn to_check(&self) -> Check {
        Check {
            node: self.node.clone(),
            check_id: self.check_id.clone(),
            name: self.check.clone(),
            status: self.status,
            notes: self.notes.clone(),
            output: self.output.clone(),
            service_id: self.service_id.clone(),
            service_name: self.service.clone(),
        }
    }
}
