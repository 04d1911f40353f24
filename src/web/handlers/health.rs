use salvo::prelude::*;
use serde_json::json;

use crate::web::web_state;

#[handler]
pub async fn health_check(res: &mut Response) {
    res.render(Json(json!({ "status": "ok" })));
}

#[handler]
pub async fn get_status(res: &mut Response) {
    let state = web_state();
    let uptime_seconds = state.started_at.elapsed().as_secs();

    let mapping_count = match state.db_manager.mapping_store().count().await {
        Ok(count) => count,
        Err(err) => {
            res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
            res.render(Json(json!({ "error": format!("database error: {}", err) })));
            return;
        }
    };

    res.render(Json(json!({
        "relay": {
            "status": "running",
            "uptime_seconds": uptime_seconds,
            "version": env!("CARGO_PKG_VERSION"),
            "tracked_mappings": mapping_count,
        }
    })));
}
