// SPDX-License-Identifier: MIT
//! Consul-backed [`ClusterStateClient`].
//!
//! Layout under the configured KV prefix:
//!   config/settings                      — JSON `AlertSettings`
//!   profiles/<node>/<service>/<check>    — JSON `NotificationProfile`
//!   profiles/<service>                   — service-level fallback profile
//!   profiles/default                     — cluster-wide fallback profile
//!   blacklist/nodes/<node>
//!   blacklist/services/<service>
//!   blacklist/checks/<check>
//!   blacklist/single/<node>/<service>/<check>
//!   reminders/<node>/<check>             — JSON `Message`
//!
//! The check snapshot comes from `/v1/health/state/any`; `new_alerts`
//! diffs it against the statuses last handed out.

use crate::config::ConsulConfig;
use crate::model::{Check, CheckStatus, Message, NotificationProfile};
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::ClusterStateClient;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("consul returned {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: String },
    #[error("malformed kv value at {key}: {reason}")]
    MalformedValue { key: String, reason: String },
}

/// Cluster-wide alerting knobs stored under `config/settings` in KV.
/// When the document is absent, the daemon's TOML fallbacks apply.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertSettings {
    pub checks_enabled: bool,
    pub change_threshold_secs: u64,
}

/// (node, check_id) — the identity of one check observation.
type CheckKey = (String, String);

#[derive(Default)]
struct CheckState {
    /// Latest merged snapshot.
    current: HashMap<CheckKey, Check>,
    /// Status each check had when it was last handed out via `new_alerts`.
    notified: HashMap<CheckKey, CheckStatus>,
}

/// One entry of a `?recurse` KV response.
#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
}

pub struct ConsulClient {
    http: reqwest::Client,
    base: String,
    kv_prefix: String,
    token: Option<String>,
    datacenter: Option<String>,
    settings: RwLock<AlertSettings>,
    state: RwLock<CheckState>,
}

impl ConsulClient {
    pub fn new(cfg: &ConsulConfig, fallback: AlertSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: cfg.address.trim_end_matches('/').to_string(),
            kv_prefix: cfg.kv_prefix.trim_matches('/').to_string(),
            token: cfg.token.clone(),
            datacenter: cfg.datacenter.clone(),
            settings: RwLock::new(fallback),
            state: RwLock::new(CheckState::default()),
        })
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.request(self.http.get(url))
    }

    fn request(&self, mut builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            builder = builder.header("X-Consul-Token", token);
        }
        if let Some(dc) = &self.datacenter {
            builder = builder.query(&[("dc", dc.as_str())]);
        }
        builder
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}/{}", self.base, self.kv_prefix, key)
    }

    /// Raw KV read. `Ok(None)` when the key is absent.
    async fn kv_get_raw(&self, key: &str) -> Result<Option<String>, ClusterError> {
        let url = self.kv_url(key);
        let resp = self.get(&url).query(&[("raw", "true")]).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(Some(resp.text().await?)),
            s => Err(ClusterError::UnexpectedStatus { status: s, url }),
        }
    }

    async fn kv_get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, ClusterError> {
        match self.kv_get_raw(key).await? {
            None => Ok(None),
            Some(body) => {
                serde_json::from_str(&body)
                    .map(Some)
                    .map_err(|e| ClusterError::MalformedValue {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }

    async fn kv_put_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), ClusterError> {
        let url = self.kv_url(key);
        let body = serde_json::to_string(value).map_err(|e| ClusterError::MalformedValue {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let resp = self.request(self.http.put(&url)).body(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClusterError::UnexpectedStatus { status, url });
        }
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<(), ClusterError> {
        let url = self.kv_url(key);
        let resp = self.request(self.http.delete(&url)).send().await?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            return Err(ClusterError::UnexpectedStatus { status, url });
        }
        Ok(())
    }

    async fn kv_exists(&self, key: &str) -> bool {
        match self.kv_get_raw(key).await {
            Ok(found) => found.is_some(),
            Err(e) => {
                warn!(key = %key, err = %e, "blacklist lookup failed, treating as not blacklisted");
                false
            }
        }
    }

    /// Recursive KV read under `prefix`. Absent prefix decodes to empty.
    async fn kv_recurse(&self, prefix: &str) -> Result<Vec<KvEntry>, ClusterError> {
        let url = self.kv_url(prefix);
        let resp = self.get(&url).query(&[("recurse", "true")]).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => Ok(resp.json().await?),
            s => Err(ClusterError::UnexpectedStatus { status: s, url }),
        }
    }

    /// Current cluster leader address from `/v1/status/leader`, `None` when
    /// the cluster has no leader. Used by the leadership poll task in main.
    pub async fn leader_address(&self) -> Result<Option<String>, ClusterError> {
        let url = format!("{}/v1/status/leader", self.base);
        let resp = self.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClusterError::UnexpectedStatus { status, url });
        }
        let addr: String = resp.json().await?;
        Ok(if addr.is_empty() { None } else { Some(addr) })
    }

    fn reminder_key(node: &str, check_id: &str) -> String {
        format!("reminders/{node}/{check_id}")
    }
}

#[async_trait]
impl ClusterStateClient for ConsulClient {
    async fn load_config(&self) -> Result<()> {
        if let Some(fresh) = self.kv_get_json::<AlertSettings>("config/settings").await? {
            *self.settings.write().await = fresh;
        }
        Ok(())
    }

    async fn checks_enabled(&self) -> bool {
        self.settings.read().await.checks_enabled
    }

    async fn check_change_threshold(&self) -> u64 {
        self.settings.read().await.change_threshold_secs
    }

    async fn update_check_data(&self) -> Result<()> {
        let url = format!("{}/v1/health/state/any", self.base);
        let resp = self.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ClusterError::UnexpectedStatus { status, url }.into());
        }
        let checks: Vec<Check> = resp.json().await?;
        let mut state = self.state.write().await;
        state.current = checks
            .into_iter()
            .map(|c| ((c.node.clone(), c.check_id.clone()), c))
            .collect();
        Ok(())
    }

    async fn new_alerts(&self) -> Result<Vec<Check>> {
        let mut state = self.state.write().await;
        let CheckState { current, notified } = &mut *state;

        let mut changed = Vec::new();
        for (key, check) in current.iter() {
            match notified.get(key) {
                // First sighting: baseline it, alert only if already unhealthy.
                None => {
                    notified.insert(key.clone(), check.status);
                    if check.status.is_alerting() {
                        changed.push(check.clone());
                    }
                }
                Some(prev) if *prev != check.status => {
                    notified.insert(key.clone(), check.status);
                    changed.push(check.clone());
                }
                Some(_) => {}
            }
        }
        // Forget checks that vanished from the snapshot so a later
        // re-registration is treated as a first sighting again.
        notified.retain(|key, _| current.contains_key(key));
        Ok(changed)
    }

    async fn get_profile_info(
        &self,
        node: &str,
        service_id: &str,
        check_id: &str,
        status: CheckStatus,
    ) -> NotificationProfile {
        let keys = [
            format!("profiles/{node}/{service_id}/{check_id}"),
            format!("profiles/{service_id}"),
            "profiles/default".to_string(),
        ];
        for key in &keys {
            match self.kv_get_json::<NotificationProfile>(key).await {
                Ok(Some(profile)) => {
                    debug!(key = %key, status = %status, "resolved notification profile");
                    return profile;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(key = %key, err = %e, "profile lookup failed, trying next fallback");
                }
            }
        }
        NotificationProfile::default()
    }

    async fn is_blacklisted(&self, check: &Check) -> bool {
        let keys = [
            format!("blacklist/nodes/{}", check.node),
            format!("blacklist/services/{}", check.service_id),
            format!("blacklist/checks/{}", check.check_id),
            format!(
                "blacklist/single/{}/{}/{}",
                check.node, check.service_id, check.check_id
            ),
        ];
        for key in &keys {
            if self.kv_exists(key).await {
                return true;
            }
        }
        false
    }

    async fn set_reminder(&self, message: &Message) -> Result<()> {
        let key = Self::reminder_key(&message.node, &message.check_id);
        self.kv_put_json(&key, message).await?;
        Ok(())
    }

    async fn delete_reminder(&self, node: &str, check_id: &str) -> Result<()> {
        self.kv_delete(&Self::reminder_key(node, check_id)).await?;
        Ok(())
    }

    async fn get_reminders(&self) -> Result<Vec<Message>> {
        let entries = self.kv_recurse("reminders/").await?;
        let mut reminders = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(encoded) = entry.value else { continue };
            let decoded = match BASE64.decode(&encoded) {
                Ok(d) => d,
                Err(e) => {
                    warn!(key = %entry.key, err = %e, "skipping undecodable reminder record");
                    continue;
                }
            };
            match serde_json::from_slice::<Message>(&decoded) {
                Ok(message) => reminders.push(message),
                Err(e) => {
                    warn!(key = %entry.key, err = %e, "skipping malformed reminder record");
                }
            }
        }
        Ok(reminders)
    }
}
