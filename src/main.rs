//! dap-bridge - attach a DAP front end to an already running debugpy backend.
//!
//! The binary listens for front end connections over TCP. Each connection gets its own debug
//! session: requests are served by the bridge (extension verbs) or passed through to the backend,
//! backend events are written back to the front end as they arrive.

use anyhow::Context;
use clap::Parser;
use debugpy_bridge::config::DebuggerConfig;
use debugpy_bridge::dap::io::{FrameReader, FrameWriter};
use debugpy_bridge::dap::protocol;
use debugpy_bridge::debugger::{Error, Session};
use debugpy_bridge::interpreter::{ExecuteReply, GlobalScope, Interpreter, InterpreterError};
use debugpy_bridge::weak_error;
use log::{info, warn};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for front end connections.
    #[clap(long, default_value = "127.0.0.1:4711")]
    listen: String,

    /// Port the debugpy backend listens on (default: `port_min` of the configuration).
    #[clap(long, env = "DEBUGPY_BRIDGE_BACKEND_PORT")]
    backend_port: Option<u16>,

    /// Python executable the backend should use for spawned processes.
    #[clap(long)]
    python: Option<String>,

    /// Configuration file (default: ~/.config/debugpy-bridge/config.toml).
    #[clap(long)]
    config: Option<PathBuf>,

    /// Append DAP traffic with the backend to this file.
    #[clap(long)]
    trace_file: Option<PathBuf>,

    /// Fetch the stack of a thread as soon as it stops.
    #[clap(long)]
    prefetch_stack: bool,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Silence session and transport diagnostics, only the listener keeps logging.
    #[clap(long, short)]
    quiet: bool,
}

impl Args {
    fn debugger_config(&self) -> anyhow::Result<DebuggerConfig> {
        let mut config = DebuggerConfig::from_file(self.config.as_deref())
            .context("load debugger configuration")?;
        if self.backend_port.is_some() {
            config.port = self.backend_port;
        }
        if config.port.is_none() {
            config.port = Some(config.port_min);
        }
        if self.python.is_some() {
            config.python = self.python.clone();
        }
        if self.trace_file.is_some() {
            config.trace_file = self.trace_file.clone();
        }
        config.prefetch_stack_frames |= self.prefetch_stack;
        Ok(config)
    }
}

/// Front end connection standing in for the interpreter.
///
/// The backend runs in a process of its own here, so there is no namespace to work with:
/// handlers needing one fail and the front end gets an error response. Variables the backend
/// reports for a stopped thread are relayed as is.
struct FrontEnd {
    writer: Mutex<FrameWriter<TcpStream>>,
}

impl FrontEnd {
    fn send(&self, message: &Value) -> Result<(), Error> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .write_message(message)
    }
}

struct DetachedScope;

fn not_available() -> InterpreterError {
    InterpreterError::new(
        "NotImplementedError",
        "no interpreter namespace in attach-only mode",
    )
}

impl GlobalScope for DetachedScope {
    fn exec(&mut self, _: &str) -> Result<(), InterpreterError> {
        Err(not_available())
    }

    fn eval(&mut self, _: &str) -> Result<Value, InterpreterError> {
        Err(not_available())
    }

    fn remove_global(&mut self, _: &str) -> Result<(), InterpreterError> {
        Err(not_available())
    }

    fn inspect_variables(&mut self, _: &Value) -> Result<Value, InterpreterError> {
        Err(not_available())
    }

    fn variables(&mut self, _: &Value) -> Result<Value, InterpreterError> {
        Err(not_available())
    }

    fn build_variables_response(
        &mut self,
        request: &Value,
        variables: &Value,
    ) -> Result<Value, InterpreterError> {
        Ok(protocol::reply(request, true, json!({ "variables": variables })))
    }
}

impl Interpreter for FrontEnd {
    type Scope<'a> = DetachedScope where Self: 'a;

    fn acquire(&self) -> DetachedScope {
        DetachedScope
    }

    fn holding_lock(&self) -> bool {
        false
    }

    fn execute_on_main(&self, _: &str) -> ExecuteReply {
        // debugpy was started by whoever runs the debuggee
        ExecuteReply::Ok
    }

    fn publish_event(&self, event: Value) {
        weak_error!(self.send(&event), "forward backend event:");
    }
}

fn serve(stream: TcpStream, config: DebuggerConfig) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    let mut reader = FrameReader::new(stream.try_clone()?, None);
    let front_end = Arc::new(FrontEnd {
        writer: Mutex::new(FrameWriter::new(stream, None)),
    });

    let session = Session::new(front_end.clone(), config);
    loop {
        let request = match reader.read_message() {
            Ok(request) => request,
            Err(Error::ConnectionClosed) => break,
            Err(Error::Json(e)) => {
                warn!(target: "dap", "skip malformed front end message: {e}");
                continue;
            }
            Err(e) => {
                session.stop();
                return Err(e).context("read front end request");
            }
        };

        let reply = session.process_request(&request);
        front_end.send(&reply).context("write response")?;
    }
    session.stop();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    if args.quiet {
        debugpy_bridge::log::quiet();
    }
    let config = args.debugger_config()?;

    let addr: SocketAddr = args.listen.parse().context("Invalid listen address")?;
    let listener = TcpListener::bind(addr).with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "dap-bridge listening on {addr}");

    // One client == one debug session, clients are served one after another.
    loop {
        let (stream, peer) = match listener.accept() {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "front end connected: {peer}");

        if let Err(err) = serve(stream, config.clone()) {
            warn!(target: "dap", "session ended with error: {err:#}");
        } else {
            info!(target: "dap", "session with {peer} finished");
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}
