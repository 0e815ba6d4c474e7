use crate::dap::client::{DapClient, EventHandler};
use crate::dap::protocol;
use crate::debugger::context::SessionContext;
use crate::debugger::Error;
use crate::interpreter::Interpreter;
use crate::{bridge_debug, bridge_warn};
use serde_json::{json, Value};
use std::sync::Arc;

/// Republish backend events to the front end.
pub struct EventForwarder<I: Interpreter> {
    interpreter: Arc<I>,
    context: Arc<SessionContext>,
}

impl<I: Interpreter> EventForwarder<I> {
    pub fn new(interpreter: Arc<I>, context: Arc<SessionContext>) -> Self {
        Self {
            interpreter,
            context,
        }
    }
}

impl<I: Interpreter> EventHandler for EventForwarder<I> {
    fn handle_event(&self, _: &DapClient, event: Value) {
        bridge_debug!(target: "dap", "backend event: {}", protocol::event(&event).unwrap_or("?"));
        self.context.track_event(&event);
        self.interpreter.publish_event(event);
    }
}

/// Fetch and cache the stack of a thread as soon as it stops, then let the inner handler
/// forward the event.
pub struct StackPrefetch<H: EventHandler> {
    inner: H,
    context: Arc<SessionContext>,
}

impl<H: EventHandler> StackPrefetch<H> {
    pub fn new(inner: H, context: Arc<SessionContext>) -> Self {
        Self { inner, context }
    }
}

impl<H: EventHandler> EventHandler for StackPrefetch<H> {
    fn handle_event(&self, client: &DapClient, event: Value) {
        if protocol::event(&event) == Some("stopped") {
            if let Some(thread_id) = event["body"]["threadId"].as_i64() {
                self.context.track_event(&event);
                match stack_frames(client, thread_id) {
                    Ok(frames) => self.context.cache_frames(thread_id, frames),
                    Err(e) => {
                        bridge_warn!(target: "dap", "prefetch stack of thread {thread_id}: {e}")
                    }
                }
            }
        }
        self.inner.handle_event(client, event);
    }
}

/// Ask the backend for the stack frames of a stopped thread.
pub fn stack_frames(client: &DapClient, thread_id: i64) -> Result<Value, Error> {
    let reply = client.request(json!({
        "type": "request",
        "command": "stackTrace",
        "arguments": {"threadId": thread_id},
    }))?;
    if reply["success"].as_bool() != Some(true) {
        return Err(Error::HandlerFault(format!(
            "stackTrace failed: {}",
            reply["message"].as_str().unwrap_or("no message")
        )));
    }
    Ok(reply["body"]["stackFrames"].clone())
}
