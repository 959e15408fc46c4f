use serde_json::json;

pub const EVENT_PROVIDERS_UPDATED: &str = "providers_updated";
pub const EVENT_PROVIDER_STATE_CHANGED: &str = "provider_state_changed";
pub const EVENT_RPC_EVENT: &str = "rpc_event";

/// Out-of-band notifications about proxy-internal state, decoupled from
/// any one UI toolkit the way the teacher's `EventEmitter` decouples from
/// Tauri specifically.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &str, payload: &serde_json::Value);
}

pub fn providers_updated<E: EventEmitter>(emitter: &E, reason: &str) {
    emitter.emit(EVENT_PROVIDERS_UPDATED, &json!({ "reason": reason }));
}

pub fn provider_state_changed<E: EventEmitter>(emitter: &E, provider: &str, state: &str) {
    emitter.emit(
        EVENT_PROVIDER_STATE_CHANGED,
        &json!({ "provider": provider, "state": state }),
    );
}

/// Test/diagnostic emitter buffering everything sent to it, grounded on
/// the teacher's `MockEventEmitter`.
#[derive(Default)]
pub struct BufferingEventEmitter(pub std::sync::Mutex<Vec<(String, serde_json::Value)>>);

impl EventEmitter for BufferingEventEmitter {
    fn emit(&self, event: &str, payload: &serde_json::Value) {
        self.0.lock().unwrap().push((event.to_string(), payload.clone()));
    }
}

/// The default emitter outside a GUI host: there is no `AppHandle` to push
/// events to, so out-of-band notifications just become a structured
/// `tracing` event at debug level.
#[derive(Clone, Default)]
pub struct TracingEventEmitter;

impl EventEmitter for TracingEventEmitter {
    fn emit(&self, event: &str, payload: &serde_json::Value) {
        tracing::debug!(target: "events", event, %payload, "emitted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_emit_expected_payload_shapes() {
        let mock = BufferingEventEmitter::default();
        providers_updated(&mock, "reconcile");
        provider_state_changed(&mock, "mcp:https://x", "ready");
        let events = mock.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, EVENT_PROVIDERS_UPDATED);
        assert_eq!(events[1].1["state"], "ready");
    }
}
