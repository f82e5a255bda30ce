// rest/routes/trigger.rs — check-change trigger.
//
// The upstream watch POSTs the full current check set here on every change.
// The response is always 200 once the body decodes; processing is
// asynchronous and its outcome is never reflected in the response. A body
// that does not decode as a check batch is rejected by the Json
// extractor — a malformed batch must not silently become an empty one.

use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::Check;
use crate::AppContext;

pub async fn trigger(
    State(ctx): State<Arc<AppContext>>,
    Json(checks): Json<Vec<Check>>,
) -> Json<Value> {
    if let Err(e) = ctx.cluster.load_config().await {
        warn!(err = %e, "config refresh failed, continuing with last known config");
    }

    // The very first trigger after start only arms the pipeline.
    if !ctx.armed.swap(true, Ordering::SeqCst) {
        info!("now watching for health changes");
        return Json(json!({ "status": "ok" }));
    }

    if !ctx.cluster.checks_enabled().await {
        info!("check handling disabled, ignoring checks");
        return Json(json!({ "status": "ok" }));
    }

    if ctx.mailbox.deposit(checks) {
        debug!("replaced an unconsumed check batch with a newer one");
    }
    Json(json!({ "status": "ok" }))
}
