//! Integration tests for the alert pipeline: trigger handling, the check
//! processor and the reminder scheduler, driven with fake collaborators.

use async_trait::async_trait;
use axum::extract::{Json, State};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use flockd::cluster::{ClusterStateClient, LeaderHandle};
use flockd::config::DaemonConfig;
use flockd::model::{Check, CheckStatus, Message, NotificationProfile};
use flockd::notify::NotificationEngine;
use flockd::pipeline::processor::CheckProcessor;
use flockd::pipeline::reminders::ReminderScheduler;
use flockd::pipeline::Mailbox;
use flockd::registry::ServiceRegistry;
use flockd::rest::routes::trigger::trigger;
use flockd::AppContext;

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeCluster {
    enabled: AtomicBool,
    threshold: AtomicU64,
    /// Drained by the next `new_alerts` call.
    alerts: Mutex<Vec<Check>>,
    /// Keyed by check id.
    profiles: Mutex<HashMap<String, NotificationProfile>>,
    /// "node/check_id" entries.
    blacklist: Mutex<HashSet<String>>,
    /// Keyed by (node, check_id).
    reminders: Mutex<HashMap<(String, String), Message>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeCluster {
    fn new() -> Self {
        let fake = Self::default();
        fake.enabled.store(true, Ordering::SeqCst);
        fake
    }

    fn push_alert(&self, check: Check) {
        self.alerts.lock().unwrap().push(check);
    }

    fn set_profile(&self, check_id: &str, interval: i64) {
        self.profiles.lock().unwrap().insert(
            check_id.to_string(),
            NotificationProfile {
                interval,
                notif_list: vec!["ops".into()],
                var_overrides: HashMap::new(),
            },
        );
    }

    fn seed_reminder(&self, message: Message) {
        self.reminders
            .lock()
            .unwrap()
            .insert((message.node.clone(), message.check_id.clone()), message);
    }

    fn reminder(&self, node: &str, check_id: &str) -> Option<Message> {
        self.reminders
            .lock()
            .unwrap()
            .get(&(node.to_string(), check_id.to_string()))
            .cloned()
    }

    fn blacklist(&self, node: &str, check_id: &str) {
        self.blacklist
            .lock()
            .unwrap()
            .insert(format!("{node}/{check_id}"));
    }

    fn count_calls(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|&&c| c == name)
            .count()
    }
}

#[async_trait]
impl ClusterStateClient for FakeCluster {
    async fn load_config(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("load_config");
        Ok(())
    }

    async fn checks_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn check_change_threshold(&self) -> u64 {
        self.threshold.load(Ordering::SeqCst)
    }

    async fn update_check_data(&self) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push("update_check_data");
        Ok(())
    }

    async fn new_alerts(&self) -> anyhow::Result<Vec<Check>> {
        self.calls.lock().unwrap().push("new_alerts");
        Ok(std::mem::take(&mut *self.alerts.lock().unwrap()))
    }

    async fn get_profile_info(
        &self,
        _node: &str,
        _service_id: &str,
        check_id: &str,
        _status: CheckStatus,
    ) -> NotificationProfile {
        self.profiles
            .lock()
            .unwrap()
            .get(check_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn is_blacklisted(&self, check: &Check) -> bool {
        self.blacklist
            .lock()
            .unwrap()
            .contains(&format!("{}/{}", check.node, check.check_id))
    }

    async fn set_reminder(&self, message: &Message) -> anyhow::Result<()> {
        self.seed_reminder(message.clone());
        Ok(())
    }

    async fn delete_reminder(&self, node: &str, check_id: &str) -> anyhow::Result<()> {
        self.reminders
            .lock()
            .unwrap()
            .remove(&(node.to_string(), check_id.to_string()));
        Ok(())
    }

    async fn get_reminders(&self) -> anyhow::Result<Vec<Message>> {
        self.calls.lock().unwrap().push("get_reminders");
        Ok(self.reminders.lock().unwrap().values().cloned().collect())
    }
}

#[derive(Default)]
struct FakeNotifier {
    batches: Mutex<Vec<Vec<Message>>>,
}

impl FakeNotifier {
    fn batches(&self) -> Vec<Vec<Message>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationEngine for FakeNotifier {
    async fn queue_messages(&self, messages: Vec<Message>) {
        self.batches.lock().unwrap().push(messages);
    }
}

struct FakeRegistry {
    tags: Vec<String>,
}

#[async_trait]
impl ServiceRegistry for FakeRegistry {
    async fn service_tags(&self, _service_id: &str) -> Vec<String> {
        self.tags.clone()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn check(node: &str, check_id: &str, service_id: &str, status: CheckStatus) -> Check {
    Check {
        node: node.into(),
        check_id: check_id.into(),
        name: format!("{check_id} check"),
        status,
        notes: "".into(),
        output: "output".into(),
        service_id: service_id.into(),
        service_name: service_id.into(),
    }
}

fn reminder_message(node: &str, check_id: &str, interval: i64, age_secs: i64) -> Message {
    let fired = Utc::now() - ChronoDuration::seconds(age_secs);
    Message {
        node: node.into(),
        service_id: "svc".into(),
        service: "svc".into(),
        service_tags: vec![],
        check_id: check_id.into(),
        check: format!("{check_id} check"),
        status: CheckStatus::Critical,
        output: "output".into(),
        notes: "".into(),
        interval,
        rmd_check: fired,
        notif_list: vec!["ops".into()],
        var_overrides: HashMap::new(),
        timestamp: fired,
    }
}

struct Harness {
    cluster: Arc<FakeCluster>,
    notifier: Arc<FakeNotifier>,
    leader: Arc<LeaderHandle>,
    mailbox: Arc<Mailbox<Vec<Check>>>,
    _shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Harness {
    fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            cluster: Arc::new(FakeCluster::new()),
            notifier: Arc::new(FakeNotifier::default()),
            leader: Arc::new(LeaderHandle::new()),
            mailbox: Arc::new(Mailbox::new()),
            _shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    fn processor(&self) -> CheckProcessor {
        CheckProcessor::new(
            self.cluster.clone(),
            self.notifier.clone(),
            Arc::new(FakeRegistry {
                tags: vec!["prod".into()],
            }),
            self.leader.clone(),
            self.mailbox.clone(),
            self.shutdown_rx.clone(),
        )
    }

    fn scheduler(&self) -> ReminderScheduler {
        ReminderScheduler::new(
            self.cluster.clone(),
            self.notifier.clone(),
            self.leader.clone(),
            self.shutdown_rx.clone(),
            Duration::from_secs(300),
        )
    }

    fn app_context(&self) -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(DaemonConfig::default()),
            self.cluster.clone(),
            self.leader.clone(),
            self.mailbox.clone(),
        ))
    }
}

// ── Trigger endpoint ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_trigger_only_arms() {
    let h = Harness::new();
    let ctx = h.app_context();

    let batch = vec![check("n1", "c1", "svc", CheckStatus::Critical)];
    trigger(State(ctx.clone()), Json(batch.clone())).await;
    assert!(
        h.mailbox.take().is_none(),
        "warm-up trigger must not enqueue"
    );
    assert!(ctx.armed.load(Ordering::SeqCst));

    trigger(State(ctx), Json(batch)).await;
    assert!(h.mailbox.take().is_some(), "second trigger must enqueue");
}

#[tokio::test]
async fn test_disabled_checks_are_dropped() {
    let h = Harness::new();
    h.cluster.enabled.store(false, Ordering::SeqCst);
    let ctx = h.app_context();
    ctx.armed.store(true, Ordering::SeqCst);

    trigger(
        State(ctx),
        Json(vec![check("n1", "c1", "svc", CheckStatus::Critical)]),
    )
    .await;
    assert!(h.mailbox.take().is_none());
}

#[tokio::test]
async fn test_trigger_coalesces_to_newest_batch() {
    let h = Harness::new();
    let ctx = h.app_context();
    ctx.armed.store(true, Ordering::SeqCst);

    trigger(
        State(ctx.clone()),
        Json(vec![check("n1", "old", "svc", CheckStatus::Warning)]),
    )
    .await;
    trigger(
        State(ctx),
        Json(vec![check("n1", "new", "svc", CheckStatus::Critical)]),
    )
    .await;

    let pending = h.mailbox.take().expect("a batch must be pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].check_id, "new");
    assert!(h.mailbox.take().is_none(), "only one slot exists");
}

// ── Check processor ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_leader_processes_nothing() {
    let h = Harness::new();
    h.leader.set_has_leader(true); // cluster has a leader, just not us

    let mut processor = h.processor();
    let resumed = processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Critical)])
        .await;
    assert!(resumed);
    assert_eq!(h.cluster.count_calls("new_alerts"), 0);
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_no_leader_within_bound_skips_batch() {
    let h = Harness::new();
    // has_leader stays false: six 5 s polls, then give up.
    let start = tokio::time::Instant::now();
    let mut processor = h.processor();
    let resumed = processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Critical)])
        .await;
    assert!(resumed, "an exhausted leadership wait is a skip, not a stop");
    assert_eq!(start.elapsed(), Duration::from_secs(30));
    assert_eq!(h.cluster.count_calls("update_check_data"), 0);
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_settle_wait_refresh_count() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.threshold.store(25, Ordering::SeqCst);

    let mut processor = h.processor();
    processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Warning)])
        .await;
    // Threshold 25 s: refreshes after the 10 s and 20 s sleeps, plus the
    // final one after the loop.
    assert_eq!(h.cluster.count_calls("update_check_data"), 3);
}

#[tokio::test]
async fn test_empty_diff_is_a_noop() {
    let h = Harness::new();
    h.leader.set_leader(true);

    let mut processor = h.processor();
    processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Warning)])
        .await;
    assert_eq!(h.cluster.count_calls("new_alerts"), 1);
    assert!(h.notifier.batches().is_empty());
    assert!(h.cluster.reminder("n1", "c1").is_none());
}

#[tokio::test]
async fn test_end_to_end_critical_alert() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.set_profile("c1", 15);
    h.cluster
        .push_alert(check("n1", "c1", "svc", CheckStatus::Critical));

    let mut processor = h.processor();
    processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Critical)])
        .await;

    let batches = h.notifier.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    let message = &batches[0][0];
    assert_eq!(message.status, CheckStatus::Critical);
    assert_eq!(message.interval, 15);
    assert_eq!(message.service_tags, vec!["prod".to_string()]);
    assert_eq!(message.rmd_check, message.timestamp);

    let reminder = h.cluster.reminder("n1", "c1").expect("reminder created");
    assert_eq!(reminder.interval, 15);
}

#[tokio::test]
async fn test_zero_interval_creates_no_reminder() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.set_profile("c1", 0);
    h.cluster
        .push_alert(check("n1", "c1", "svc", CheckStatus::Critical));

    let mut processor = h.processor();
    processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Critical)])
        .await;

    // The message still goes out, fire-and-forget.
    assert_eq!(h.notifier.batches().len(), 1);
    assert!(h.cluster.reminder("n1", "c1").is_none());
}

#[tokio::test]
async fn test_recovery_deletes_reminder() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.set_profile("c1", 15);
    h.cluster.seed_reminder(reminder_message("n1", "c1", 15, 60));
    h.cluster
        .push_alert(check("n1", "c1", "svc", CheckStatus::Passing));

    let mut processor = h.processor();
    processor
        .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Passing)])
        .await;

    assert!(h.cluster.reminder("n1", "c1").is_none());
    // Recovery is still notified.
    assert_eq!(h.notifier.batches().len(), 1);
    assert_eq!(h.notifier.batches()[0][0].status, CheckStatus::Passing);
}

// ── Reminder scheduler ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_reminders_ignored_when_not_leader() {
    let h = Harness::new();
    h.cluster.seed_reminder(reminder_message("n1", "c1", 10, 3600));

    h.scheduler().run_once().await;
    assert_eq!(h.cluster.count_calls("get_reminders"), 0);
    assert!(h.notifier.batches().is_empty());
}

#[tokio::test]
async fn test_reminder_does_not_fire_early() {
    let h = Harness::new();
    h.leader.set_leader(true);
    // 9m59s old with a 10-minute interval: not due.
    h.cluster.seed_reminder(reminder_message("n1", "c1", 10, 599));

    h.scheduler().run_once().await;
    assert!(h.notifier.batches().is_empty());
    // Untouched: the timestamp only advances on an actual re-fire.
    let stored = h.cluster.reminder("n1", "c1").unwrap();
    assert!(Utc::now() - stored.rmd_check >= ChronoDuration::seconds(599));
}

#[tokio::test]
async fn test_reminder_fires_at_interval() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.seed_reminder(reminder_message("n1", "c1", 10, 600));

    h.scheduler().run_once().await;

    let batches = h.notifier.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].check_id, "c1");

    // Persisted record advanced to the new firing time.
    let stored = h.cluster.reminder("n1", "c1").unwrap();
    assert!(Utc::now() - stored.rmd_check < ChronoDuration::seconds(5));
}

#[tokio::test]
async fn test_blacklist_wins_over_cadence() {
    let h = Harness::new();
    h.leader.set_leader(true);
    // Long overdue, but blacklisted.
    h.cluster.seed_reminder(reminder_message("n1", "c1", 10, 3600));
    h.cluster.blacklist("n1", "c1");

    h.scheduler().run_once().await;

    assert!(h.notifier.batches().is_empty());
    assert!(
        h.cluster.reminder("n1", "c1").is_none(),
        "blacklisted reminder must be deleted"
    );
}

#[tokio::test]
async fn test_mixed_reminders_fire_as_one_batch() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.seed_reminder(reminder_message("n1", "due1", 5, 600));
    h.cluster.seed_reminder(reminder_message("n2", "due2", 5, 900));
    h.cluster.seed_reminder(reminder_message("n3", "young", 60, 60));

    h.scheduler().run_once().await;

    let batches = h.notifier.batches();
    assert_eq!(batches.len(), 1, "due reminders go out as a single batch");
    let mut ids: Vec<_> = batches[0].iter().map(|m| m.check_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["due1".to_string(), "due2".to_string()]);
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_settle_wait() {
    let h = Harness::new();
    h.leader.set_leader(true);
    h.cluster.threshold.store(3600, Ordering::SeqCst);

    let mut processor = h.processor();
    let tx = h._shutdown_tx.clone();
    let task = tokio::spawn(async move {
        processor
            .handle_checks(vec![check("n1", "c1", "svc", CheckStatus::Warning)])
            .await
    });

    // Let the task reach its settle sleep, then signal shutdown.
    tokio::time::sleep(Duration::from_secs(1)).await;
    tx.send(true).unwrap();

    let resumed = task.await.unwrap();
    assert!(!resumed, "shutdown during a wait must stop the processor");
    assert!(h.notifier.batches().is_empty());
}
