//! State shared by the request handlers (main execution context) and the event forwarder
//! (event thread).

use crate::dap::protocol;
use crate::debugger::info;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    /// Cell temporary file -> execution counter.
    filenames: HashMap<String, i64>,
    /// Backend threads currently paused.
    stopped_threads: BTreeSet<i64>,
    /// Every thread reported by the backend and not exited.
    known_threads: BTreeSet<i64>,
    /// Prefetched stack frames of stopped threads.
    frames: HashMap<i64, Value>,
    /// Source path -> breakpoints reported by the backend.
    breakpoints: BTreeMap<String, Value>,
}

#[derive(Default)]
pub struct SessionContext {
    state: Mutex<State>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_filename(&self, filename: impl Into<String>, execution_count: i64) {
        self.state().filenames.insert(filename.into(), execution_count);
    }

    /// Render a cell file path as `[N]`, other paths are returned unchanged.
    pub fn display_filename(&self, filename: &str) -> String {
        if filename.starts_with(&info::tmp_prefix()) {
            if let Some(count) = self.state().filenames.get(filename) {
                return format!("[{count}]");
            }
        }
        filename.to_string()
    }

    pub fn has_stopped_threads(&self) -> bool {
        !self.state().stopped_threads.is_empty()
    }

    pub fn stopped_threads(&self) -> Vec<i64> {
        self.state().stopped_threads.iter().copied().collect()
    }

    /// Update thread bookkeeping out of a backend event.
    pub fn track_event(&self, event: &Value) {
        let body = &event["body"];
        let thread_id = body["threadId"].as_i64();
        let mut state = self.state();

        match protocol::event(event) {
            Some("stopped") => {
                if body["allThreadsStopped"].as_bool().unwrap_or(false) {
                    let known = state.known_threads.clone();
                    state.stopped_threads.extend(known);
                }
                if let Some(id) = thread_id {
                    state.known_threads.insert(id);
                    state.stopped_threads.insert(id);
                }
            }
            Some("continued") => {
                if body["allThreadsContinued"].as_bool().unwrap_or(true) {
                    state.stopped_threads.clear();
                    state.frames.clear();
                } else if let Some(id) = thread_id {
                    state.stopped_threads.remove(&id);
                    state.frames.remove(&id);
                }
            }
            Some("thread") => {
                if let Some(id) = thread_id {
                    match body["reason"].as_str() {
                        Some("started") => {
                            state.known_threads.insert(id);
                        }
                        Some("exited") => {
                            state.known_threads.remove(&id);
                            state.stopped_threads.remove(&id);
                            state.frames.remove(&id);
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    pub fn cache_frames(&self, thread_id: i64, frames: Value) {
        let mut state = self.state();
        // the thread may have resumed while the frames were in flight
        if state.stopped_threads.contains(&thread_id) {
            state.frames.insert(thread_id, frames);
        }
    }

    pub fn frames(&self, thread_id: i64) -> Option<Value> {
        self.state().frames.get(&thread_id).cloned()
    }

    /// Remember breakpoints the backend accepted in reply to `setBreakpoints`.
    pub fn record_breakpoints(&self, request: &Value, response: &Value) {
        let Some(path) = request["arguments"]["source"]["path"].as_str() else {
            return;
        };
        let breakpoints = response["body"]["breakpoints"].clone();
        let mut state = self.state();
        match breakpoints.as_array() {
            Some(list) if !list.is_empty() => {
                state.breakpoints.insert(path.to_string(), breakpoints);
            }
            _ => {
                state.breakpoints.remove(path);
            }
        }
    }

    pub fn breakpoints(&self) -> Value {
        let state = self.state();
        Value::Array(
            state
                .breakpoints
                .iter()
                .map(|(source, breakpoints)| json!({"source": source, "breakpoints": breakpoints}))
                .collect(),
        )
    }

    /// Forget everything tied to a backend connection. The filename map outlives sessions.
    pub fn reset(&self) {
        let mut state = self.state();
        state.stopped_threads.clear();
        state.known_threads.clear();
        state.frames.clear();
        state.breakpoints.clear();
    }
}
