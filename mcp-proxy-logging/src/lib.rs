use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mcp_proxy_core::config::{ConfigProvider, Settings};
use mcp_proxy_core::events::{EventEmitter, EVENT_RPC_EVENT};
use mcp_proxy_core::logging::{Event, RpcEventPublisher};

const DEFAULT_CAPACITY: usize = 4096;

/// An in-process, ring-buffered RPC event log. Replaces the teacher's
/// `duckdb`-backed publisher: this proxy has no GUI log viewer to feed, so
/// there is no reason to carry a bundled SQL engine as a dependency. Tests
/// and an optional status endpoint read the buffer directly.
#[derive(Clone)]
pub struct RingBufferPublisher {
    inner: Arc<Mutex<VecDeque<Event>>>,
    capacity: usize,
}

impl RingBufferPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let buf = self.inner.lock().unwrap();
        buf.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RingBufferPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RpcEventPublisher for RingBufferPublisher {
    fn init_with(&self, _cp: &dyn ConfigProvider, _settings: &Settings) {}

    fn log(&self, event: Event) {
        let mut buf = self.inner.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
    }

    fn log_and_emit<E: EventEmitter>(&self, emitter: &E, event: Event) {
        let payload = serde_json::json!({
            "id": event.id.to_string(),
            "ts_ms": event.ts_ms,
            "created_at": event.created_at,
            "session_id": event.session_id,
            "method": event.method,
            "provider": event.provider,
            "ok": event.ok,
            "error": event.error,
        });
        self.log(event);
        emitter.emit(EVENT_RPC_EVENT, &payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_proxy_core::events::BufferingEventEmitter;

    #[test]
    fn evicts_oldest_once_capacity_is_reached() {
        let publisher = RingBufferPublisher::new(2);
        publisher.log(Event::new("tools/list", "s1"));
        publisher.log(Event::new("tools/call", "s1"));
        publisher.log(Event::new("resources/list", "s1"));
        assert_eq!(publisher.len(), 2);
        let recent = publisher.recent(10);
        assert_eq!(recent[0].method, "resources/list");
    }

    #[test]
    fn log_and_emit_notifies_and_persists() {
        let publisher = RingBufferPublisher::default();
        let emitter = BufferingEventEmitter::default();
        publisher.log_and_emit(&emitter, Event::new("tools/list", "s1"));
        assert_eq!(publisher.len(), 1);
        let events = emitter.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EVENT_RPC_EVENT);
    }
}
