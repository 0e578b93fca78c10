//! Progress bus: fuses an in-process queue (manual, in-process runs) with
//! the durable event log (container/worker runs), and serves a single
//! consumer stream per session with a resumable cursor on the durable side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::EngineError;
use crate::persistence::Store;

const IDLE_CAP: Duration = Duration::from_secs(3600);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: Option<i64>,
    pub event: String,
    pub data: serde_json::Value,
    pub ts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InMemoryEvent {
    pub event: String,
    pub data: serde_json::Value,
    pub ts: i64,
}

/// Per-session in-memory append-only queue, shared between the thread
/// driving a manual run and the stream consumer reading it back.
#[derive(Default)]
pub struct ProgressBus {
    queues: Mutex<HashMap<String, Vec<InMemoryEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit(&self, session_id: &str, event: &str, data: serde_json::Value) {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(session_id.to_string())
            .or_default()
            .push(InMemoryEvent {
                event: event.to_string(),
                data,
                ts: now_epoch(),
            });
    }

    fn snapshot(&self, session_id: &str) -> Vec<InMemoryEvent> {
        self.queues
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Consume the fused stream for `session_id`, calling `on_event` for
    /// each envelope in order. Stops on a `done` event from either source,
    /// a 3600s idle cap, or when `on_event` returns `false`.
    pub fn consume(
        &self,
        store: &dyn Store,
        session_id: &str,
        last_seen_id: i64,
        mut on_event: impl FnMut(Envelope) -> bool,
    ) -> Result<(), EngineError> {
        let mut mem_sent = 0usize;
        let mut db_last_id = last_seen_id;
        let start = Instant::now();
        let mut last_ping = Instant::now();

        loop {
            if start.elapsed() >= IDLE_CAP {
                return Ok(());
            }

            let mut done = false;

            let events = self.snapshot(session_id);
            while mem_sent < events.len() {
                let e = &events[mem_sent];
                mem_sent += 1;
                let is_done = e.event == "done";
                if !on_event(Envelope {
                    id: None,
                    event: e.event.clone(),
                    data: e.data.clone(),
                    ts: e.ts,
                }) {
                    return Ok(());
                }
                if is_done {
                    done = true;
                    break;
                }
            }

            if !done {
                let rows = store.scan_events_since(session_id, db_last_id)?;
                for row in rows {
                    db_last_id = row.id;
                    let is_done = row.event == "done";
                    let data = serde_json::from_str(&row.data).unwrap_or(serde_json::Value::Null);
                    if !on_event(Envelope {
                        id: Some(row.id),
                        event: row.event,
                        data,
                        ts: now_epoch(),
                    }) {
                        return Ok(());
                    }
                    if is_done {
                        done = true;
                        break;
                    }
                }
            }

            if done {
                return Ok(());
            }

            if last_ping.elapsed() > KEEPALIVE_INTERVAL {
                on_event(Envelope {
                    id: None,
                    event: "keepalive".to_string(),
                    data: serde_json::Value::Null,
                    ts: now_epoch(),
                });
                last_ping = Instant::now();
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::sqlite::SqliteStore;

    #[test]
    fn in_memory_events_drain_then_stop_on_done() {
        let bus = ProgressBus::new();
        bus.emit("s1", "status", serde_json::json!({"msg": "starting"}));
        bus.emit("s1", "done", serde_json::json!({"total": 0}));

        let store = SqliteStore::open_in_memory().unwrap();
        let mut seen = Vec::new();
        bus.consume(&store, "s1", 0, |env| {
            seen.push(env.event);
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["status", "done"]);
    }

    #[test]
    fn durable_events_resume_from_cursor() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_event(None, None, "s2", "status", "{}")
            .unwrap();
        let second = store.append_event(None, None, "s2", "done", "{}").unwrap();

        let bus = ProgressBus::new();
        let mut seen = Vec::new();
        bus.consume(&store, "s2", second - 1, |env| {
            seen.push(env.event);
            true
        })
        .unwrap();
        assert_eq!(seen, vec!["done"]);
    }
}
