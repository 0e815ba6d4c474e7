//! Debug session controller.
//!
//! A [`Session`] sits between the kernel front end and the debugpy backend. Requests of the base
//! protocol are passed through to the backend verbatim, a handful of extension verbs are served
//! by [`handlers`]. Backend events flow back to the front end through [`events`].

pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod handlers;
pub mod info;

pub use error::Error;

use crate::config::DebuggerConfig;
use crate::dap::client::{ClientOptions, DapClient, EventHandler};
use crate::dap::protocol;
use crate::dap::tracer::TrafficTracer;
use crate::debugger::bootstrap::BackendBootstrap;
use crate::debugger::context::SessionContext;
use crate::debugger::events::{EventForwarder, StackPrefetch};
use crate::debugger::handlers::{Command, Handler};
use crate::debugger::info::DebuggerInfo;
use crate::interpreter::{ExecuteReply, Interpreter};
use crate::{bridge_debug, bridge_error, bridge_info, bridge_warn, weak_error};
use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum_macros::Display;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum SessionState {
    Idle,
    Starting,
    Attached,
    Stopped,
}

pub struct Session<I: Interpreter> {
    interpreter: Arc<I>,
    config: DebuggerConfig,
    bootstrap: Arc<BackendBootstrap>,
    context: Arc<SessionContext>,
    handlers: HashMap<Command, Handler<I>>,
    tracer: Option<TrafficTracer>,
    state: Mutex<SessionState>,
    client: Mutex<Option<Arc<DapClient>>>,
    endpoint: Mutex<Option<SocketAddr>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<I: Interpreter> Session<I> {
    /// Create a session using the process-wide backend bootstrap.
    pub fn new(interpreter: Arc<I>, config: DebuggerConfig) -> Self {
        Self::with_bootstrap(interpreter, config, BackendBootstrap::global())
    }

    pub fn with_bootstrap(
        interpreter: Arc<I>,
        config: DebuggerConfig,
        bootstrap: Arc<BackendBootstrap>,
    ) -> Self {
        let tracer = config
            .trace_file
            .as_deref()
            .and_then(|path| weak_error!(TrafficTracer::new(path), "open DAP trace file:"));

        Self {
            interpreter,
            config,
            bootstrap,
            context: Arc::new(SessionContext::new()),
            handlers: handlers::dispatch_table(),
            tracer,
            state: Mutex::new(SessionState::Idle),
            client: Mutex::new(None),
            endpoint: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn is_attached(&self) -> bool {
        self.state() == SessionState::Attached
    }

    /// Endpoint of the backend this session talks to.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        *lock(&self.endpoint)
    }

    pub fn config(&self) -> &DebuggerConfig {
        &self.config
    }

    pub(crate) fn interpreter(&self) -> &I {
        &self.interpreter
    }

    pub(crate) fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Start the session. Return false (and log the reason) if the backend can't be reached,
    /// the kernel keeps working without debugging.
    pub fn start(&self) -> bool {
        match self.try_start() {
            Ok(()) => true,
            Err(e) => {
                bridge_error!(target: "debugger", "debugger start failed: {e}");
                false
            }
        }
    }

    /// Start the session, an attached session is left as is.
    pub fn try_start(&self) -> Result<(), Error> {
        {
            let mut state = lock(&self.state);
            match *state {
                SessionState::Attached => return Ok(()),
                SessionState::Starting => return Err(Error::AlreadyStarting),
                SessionState::Idle | SessionState::Stopped => *state = SessionState::Starting,
            }
        }

        match self.connect_backend() {
            Ok(client) => {
                *lock(&self.client) = Some(client);
                *lock(&self.state) = SessionState::Attached;
                bridge_info!(target: "debugger", "debug session attached");
                Ok(())
            }
            Err(e) => {
                *lock(&self.state) = SessionState::Idle;
                Err(e)
            }
        }
    }

    fn connect_backend(&self) -> Result<Arc<DapClient>, Error> {
        weak_error!(
            fs::create_dir_all(info::debug_logs_dir()),
            "create debug logs directory:"
        );
        if let Some(tracer) = &self.tracer {
            tracer.line("===== DEBUGGER CONFIG =====");
            tracer.line(&serde_json::to_string(&self.config)?);
        }

        let endpoint = self.bootstrap.ensure(|| self.start_backend())?;

        let forwarder = EventForwarder::new(self.interpreter.clone(), self.context.clone());
        let handler: Arc<dyn EventHandler> = if self.config.prefetch_stack_frames {
            Arc::new(StackPrefetch::new(forwarder, self.context.clone()))
        } else {
            Arc::new(forwarder)
        };
        let options = ClientOptions {
            request_timeout: self.config.request_timeout(),
            handshake_timeout: self.config.handshake_timeout(),
            tracer: self.tracer.clone(),
        };
        let client = DapClient::spawn(endpoint, options, handler).wait()?;

        weak_error!(
            fs::create_dir_all(info::tmp_prefix()),
            "create cell files directory:"
        );
        *lock(&self.endpoint) = Some(client.endpoint());
        Ok(client)
    }

    /// Make the interpreter load the backend library and listen for us.
    fn start_backend(&self) -> Result<SocketAddr, Error> {
        let host: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|e| Error::Config(format!("backend host `{}`: {e}", self.config.host)))?;
        let port = match self.config.port {
            Some(port) => port,
            None => bootstrap::find_free_port(
                host,
                self.config.port_min,
                self.config.port_max,
                self.config.port_attempts,
            )?,
        };
        let endpoint = SocketAddr::new(host, port);

        let code = bootstrap::listen_snippet(endpoint, self.config.python.as_deref());
        bridge_debug!(target: "debugger", "bootstrap backend: {code}");
        match self.interpreter.execute_on_main(&code) {
            ExecuteReply::Ok => Ok(endpoint),
            ExecuteReply::Error {
                ename,
                evalue,
                traceback,
            } => {
                bridge_error!(target: "debugger", "exception raised when trying to import debugpy");
                bridge_error!(target: "debugger", "{}", traceback.iter().join("\n"));
                bridge_error!(target: "debugger", "{ename} - {evalue}");
                Err(Error::BootstrapFailed(format!("{ename}: {evalue}")))
            }
        }
    }

    /// Stop an attached session. The network thread exits once its socket is closed.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Attached {
                return;
            }
            *state = SessionState::Stopped;
        }
        self.release_backend();
        bridge_info!(target: "debugger", "debug session stopped");
    }

    fn release_backend(&self) {
        if let Some(client) = lock(&self.client).take() {
            client.shutdown();
        }
        self.context.reset();
    }

    pub fn get_debugger_info(&self) -> DebuggerInfo {
        DebuggerInfo::current()
    }

    /// Temporary file holding the source of a cell.
    pub fn cell_temporary_file(&self, code: &str) -> String {
        info::cell_tmp_file(code)
    }

    pub fn register_filename_mapping(&self, filename: impl Into<String>, execution_count: i64) {
        self.context.register_filename(filename, execution_count);
    }

    /// Name of a source file as shown in tracebacks, `[N]` for cell files.
    pub fn display_filename(&self, filename: &str) -> String {
        self.context.display_filename(filename)
    }

    pub fn stopped_threads(&self) -> Vec<i64> {
        self.context.stopped_threads()
    }

    /// Prefetched stack frames of a stopped thread.
    pub fn stack_frames(&self, thread_id: i64) -> Option<Value> {
        self.context.frames(thread_id)
    }

    /// Serve a front end request: custom verbs locally, everything else by the backend.
    /// Failures are turned into `success: false` responses.
    pub fn handle_request(&self, message: &Value) -> Value {
        let Some(command) = protocol::command(message) else {
            let e = Error::ProtocolViolation(format!("request without command: {message}"));
            bridge_warn!(target: "debugger", "{e}");
            return protocol::error_reply(message, e);
        };

        let handler = command
            .parse::<Command>()
            .ok()
            .and_then(|cmd| self.handlers.get(&cmd));
        let result = match handler {
            Some(handler) => handler(self, message),
            None => self.forward_message(message.clone()),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                bridge_warn!(target: "debugger", "`{command}` request failed: {e}");
                protocol::error_reply(message, e)
            }
        }
    }

    /// Like [`Session::handle_request`] but drives the session lifecycle: `initialize` starts
    /// the session, `disconnect` stops it once the backend replied.
    pub fn process_request(&self, message: &Value) -> Value {
        match protocol::command(message) {
            Some("initialize") => {
                if let Err(e) = self.try_start() {
                    bridge_error!(target: "debugger", "debugger start failed: {e}");
                    return protocol::error_reply(message, e);
                }
                self.handle_request(message)
            }
            Some("disconnect") => {
                let reply = self.handle_request(message);
                self.stop();
                reply
            }
            _ => self.handle_request(message),
        }
    }

    /// Send a request to the backend and wait for its response.
    ///
    /// Must not be called with the interpreter lock held: the wait is unbounded from the point
    /// of view of the main execution context.
    pub(crate) fn forward_message(&self, message: Value) -> Result<Value, Error> {
        if self.interpreter.holding_lock() {
            return Err(Error::HandlerFault(
                "backend request issued while holding the interpreter lock".to_string(),
            ));
        }
        let client = lock(&self.client).clone().ok_or(Error::NotAttached)?;
        if !client.is_connected() {
            bridge_error!(target: "debugger", "backend connection lost");
            self.on_transport_failure();
            return Err(Error::ConnectionClosed);
        }

        client.request(message).inspect_err(|e| {
            if e.is_fatal() {
                bridge_error!(target: "debugger", "backend connection lost: {e}");
                self.on_transport_failure();
            }
        })
    }

    fn on_transport_failure(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Attached {
                return;
            }
            *state = SessionState::Stopped;
        }
        self.release_backend();
    }
}

impl<I: Interpreter> Drop for Session<I> {
    fn drop(&mut self) {
        if let Some(client) = lock(&self.client).take() {
            client.shutdown();
        }
    }
}
