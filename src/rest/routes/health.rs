// rest/routes/health.rs — liveness + pipeline state.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppContext;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": ctx.started_at.elapsed().as_secs(),
        "armed": ctx.armed.load(Ordering::SeqCst),
        "leader": ctx.leader.is_leader(),
        "has_leader": ctx.leader.has_leader(),
    }))
}
