pub mod cluster;
pub mod config;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod rest;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cluster::{ClusterStateClient, LeaderHandle};
use config::DaemonConfig;
use model::Check;
use pipeline::Mailbox;

/// Shared application state passed to every HTTP handler and background task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<DaemonConfig>,
    pub cluster: Arc<dyn ClusterStateClient>,
    pub leader: Arc<LeaderHandle>,
    /// Single-slot ingestion buffer between the trigger endpoint and the
    /// check processor.
    pub mailbox: Arc<Mailbox<Vec<Check>>>,
    /// False until the first trigger arrives. The first trigger is a
    /// warm-up signal from the upstream watch, not a batch to process.
    pub armed: Arc<AtomicBool>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(
        config: Arc<DaemonConfig>,
        cluster: Arc<dyn ClusterStateClient>,
        leader: Arc<LeaderHandle>,
        mailbox: Arc<Mailbox<Vec<Check>>>,
    ) -> Self {
        Self {
            config,
            cluster,
            leader,
            mailbox,
            armed: Arc::new(AtomicBool::new(false)),
            started_at: std::time::Instant::now(),
        }
    }
}
