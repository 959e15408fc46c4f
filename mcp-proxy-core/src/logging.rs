use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::config::{ConfigProvider, Settings};
use crate::events::EventEmitter;

/// A single dispatched request/notification, the unit the ambient RPC
/// event log stores. Request/response bodies are carried as JSON so the
/// log stays decoupled from any one upstream's concrete tool schema.
#[derive(Debug, Clone)]
pub struct Event {
    pub id: Uuid,
    pub ts_ms: i64,
    /// Human-readable RFC 3339 timestamp, for display/log lines where
    /// `ts_ms` alone isn't legible — the same `chrono::Utc::now().to_rfc3339()`
    /// helper the teacher's `runtime.rs` uses for its status snapshots.
    pub created_at: String,
    pub session_id: String,
    pub method: String,
    pub provider: Option<String>,
    pub duration_ms: Option<i64>,
    pub ok: bool,
    pub error: Option<String>,
    pub request_json: Option<JsonValue>,
    pub response_json: Option<JsonValue>,
}

impl Event {
    pub fn new(method: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts_ms: now_millis(),
            created_at: chrono::Utc::now().to_rfc3339(),
            session_id: session_id.into(),
            method: method.into(),
            provider: None,
            duration_ms: None,
            ok: true,
            error: None,
            request_json: None,
            response_json: None,
        }
    }
}

static LAST_MS: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing millisecond clock: two events in the same process
/// never carry the same timestamp, even if the wall clock doesn't advance
/// between them.
pub fn now_millis() -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    loop {
        let prev = LAST_MS.load(Ordering::Relaxed);
        let next = if now > prev { now } else { prev + 1 };
        if LAST_MS
            .compare_exchange(prev, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return next;
        }
    }
}

/// Abstraction over RPC event logging, so the in-memory ring buffer used
/// in this crate's tests and the sibling `mcp-proxy-logging` crate's
/// long-lived publisher can share the same call sites.
pub trait RpcEventPublisher: Clone + Send + Sync + 'static {
    fn init_with(&self, cp: &dyn ConfigProvider, settings: &Settings);
    fn log(&self, event: Event);
    fn log_and_emit<E: EventEmitter>(&self, emitter: &E, event: Event);
}

/// A no-op publisher, useful as a default type parameter in tests that
/// don't care about the event log.
#[derive(Clone, Default)]
pub struct NullPublisher;

impl RpcEventPublisher for NullPublisher {
    fn init_with(&self, _cp: &dyn ConfigProvider, _settings: &Settings) {}
    fn log(&self, _event: Event) {}
    fn log_and_emit<E: EventEmitter>(&self, _emitter: &E, _event: Event) {}
}
