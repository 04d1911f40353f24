use std::sync::atomic::{AtomicU64, Ordering};

use salvo::prelude::*;

use crate::web::web_state;

static MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_SKIPPED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_FANNED_OUT: AtomicU64 = AtomicU64::new(0);
static MESSAGES_FAILED: AtomicU64 = AtomicU64::new(0);
static VERBATIM_RELAYED: AtomicU64 = AtomicU64::new(0);
static TRANSLATIONS_OK: AtomicU64 = AtomicU64::new(0);
static TRANSLATIONS_FAILED: AtomicU64 = AtomicU64::new(0);
static DELIVERIES_FAILED: AtomicU64 = AtomicU64::new(0);
static EDITS_REPLAYED: AtomicU64 = AtomicU64::new(0);
static DELETES_REPLAYED: AtomicU64 = AtomicU64::new(0);

pub struct Metrics;

impl Metrics {
    pub fn message_received() {
        MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_skipped() {
        MESSAGES_SKIPPED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_fanned_out() {
        MESSAGES_FANNED_OUT.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_failed() {
        MESSAGES_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn verbatim_relayed() {
        VERBATIM_RELAYED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn translation_succeeded() {
        TRANSLATIONS_OK.fetch_add(1, Ordering::Relaxed);
    }

    pub fn translation_failed() {
        TRANSLATIONS_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_failed() {
        DELIVERIES_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn edit_replayed() {
        EDITS_REPLAYED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delete_replayed() {
        DELETES_REPLAYED.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn format_prometheus(uptime_seconds: u64) -> String {
    format!(
        r#"# HELP relay_uptime_seconds Number of seconds the relay has been running
# TYPE relay_uptime_seconds gauge
relay_uptime_seconds {}

# HELP relay_messages_received Total number of guild messages observed
# TYPE relay_messages_received counter
relay_messages_received {}

# HELP relay_messages_skipped Messages that produced no relay work
# TYPE relay_messages_skipped counter
relay_messages_skipped {}

# HELP relay_messages_fanned_out Messages translated and delivered to at least one channel
# TYPE relay_messages_fanned_out counter
relay_messages_fanned_out {}

# HELP relay_messages_failed Messages where no target channel could be served
# TYPE relay_messages_failed counter
relay_messages_failed {}

# HELP relay_verbatim_relayed Emoji, sticker and attachment relays
# TYPE relay_verbatim_relayed counter
relay_verbatim_relayed {}

# HELP relay_translations_ok Successful model translations
# TYPE relay_translations_ok counter
relay_translations_ok {}

# HELP relay_translations_failed Failed model translations
# TYPE relay_translations_failed counter
relay_translations_failed {}

# HELP relay_deliveries_failed Failed sends, edits or deletes against target channels
# TYPE relay_deliveries_failed counter
relay_deliveries_failed {}

# HELP relay_edits_replayed Edits replayed against mapped counterparts
# TYPE relay_edits_replayed counter
relay_edits_replayed {}

# HELP relay_deletes_replayed Deletes replayed against mapped counterparts
# TYPE relay_deletes_replayed counter
relay_deletes_replayed {}
"#,
        uptime_seconds,
        MESSAGES_RECEIVED.load(Ordering::Relaxed),
        MESSAGES_SKIPPED.load(Ordering::Relaxed),
        MESSAGES_FANNED_OUT.load(Ordering::Relaxed),
        MESSAGES_FAILED.load(Ordering::Relaxed),
        VERBATIM_RELAYED.load(Ordering::Relaxed),
        TRANSLATIONS_OK.load(Ordering::Relaxed),
        TRANSLATIONS_FAILED.load(Ordering::Relaxed),
        DELIVERIES_FAILED.load(Ordering::Relaxed),
        EDITS_REPLAYED.load(Ordering::Relaxed),
        DELETES_REPLAYED.load(Ordering::Relaxed),
    )
}

#[handler]
pub async fn metrics_endpoint(res: &mut Response) {
    let uptime = web_state().started_at.elapsed().as_secs();
    if let Ok(content_type) = "text/plain; charset=utf-8".parse() {
        res.headers_mut().insert("Content-Type", content_type);
    }
    res.body(format_prometheus(uptime));
}
