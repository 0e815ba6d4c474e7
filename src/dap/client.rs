//! Client side of the connection to the debug backend.
//!
//! The client owns a dedicated network thread reading frames off the backend socket. Responses
//! are handed to whoever waits for them through [`PendingRequests`], events go to a second thread
//! running the [`EventHandler`] hook, so a handler is free to issue nested requests of its own
//! while the network thread keeps servicing the socket.

use crate::dap::io::{FrameReader, FrameWriter};
use crate::dap::pending::{Dispatch, PendingRequests};
use crate::dap::protocol::{self, MessageKind};
use crate::dap::tracer::TrafficTracer;
use crate::debugger::Error;
use crate::{bridge_debug, bridge_info, bridge_warn};
use serde_json::Value;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Hook invoked on the event thread for every event sent by the backend.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, client: &DapClient, event: Value);
}

#[derive(Clone)]
pub struct ClientOptions {
    /// Bound for every blocking wait on a backend reply.
    pub request_timeout: Duration,
    /// Bound for connecting to the backend.
    pub handshake_timeout: Duration,
    pub tracer: Option<TrafficTracer>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            tracer: None,
        }
    }
}

pub struct DapClient {
    endpoint: SocketAddr,
    writer: Mutex<FrameWriter<TcpStream>>,
    pending: Arc<PendingRequests>,
    next_seq: AtomicI64,
    request_timeout: Duration,
}

/// Pending acknowledgement of the network thread.
///
/// Failing to reach the backend within the handshake timeout is reported as
/// [`Error::StartupTimeout`] whatever the socket error was.
pub struct Handshake {
    receiver: mpsc::Receiver<Result<Arc<DapClient>, Error>>,
    timeout: Duration,
}

impl Handshake {
    /// Block until the network thread is connected to the backend and ready.
    pub fn wait(self) -> Result<Arc<DapClient>, Error> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::StartupTimeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::ConnectionClosed),
        }
    }
}

impl DapClient {
    /// Spawn the network thread. It connects to `endpoint` and acknowledges through the returned
    /// [`Handshake`]; the thread is detached and exits when the backend socket closes.
    pub fn spawn(
        endpoint: SocketAddr,
        options: ClientOptions,
        handler: Arc<dyn EventHandler>,
    ) -> Handshake {
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        let timeout = options.handshake_timeout;

        let spawned = thread::Builder::new().name("dap-client".into()).spawn({
            let ack_tx = ack_tx.clone();
            move || network_thread(endpoint, options, handler, ack_tx)
        });
        if let Err(e) = spawned {
            let _ = ack_tx.send(Err(Error::Transport(e)));
        }

        Handshake {
            receiver: ack_rx,
            timeout,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        !self.pending.is_closed()
    }

    /// Send a message without waiting for a reply.
    ///
    /// A message without `seq` gets the next free one, an existing `seq` is kept as is.
    /// Return the `seq` of the sent message.
    pub fn send_request(&self, mut message: Value) -> Result<i64, Error> {
        let seq = self.prepare(&mut message)?;
        self.write(&message)?;
        Ok(seq)
    }

    /// Block until an incoming message satisfies `predicate` or the request timeout elapses.
    pub fn wait_for_message(
        &self,
        what: &str,
        predicate: impl Fn(&Value) -> bool + Send + 'static,
    ) -> Result<Value, Error> {
        self.wait_for_message_timeout(what, predicate, self.request_timeout)
    }

    pub fn wait_for_message_timeout(
        &self,
        what: &str,
        predicate: impl Fn(&Value) -> bool + Send + 'static,
        timeout: Duration,
    ) -> Result<Value, Error> {
        self.pending.register(Box::new(predicate))?.wait(what, timeout)
    }

    /// Send a request and block until the backend responds to it.
    pub fn request(&self, mut message: Value) -> Result<Value, Error> {
        let seq = self.prepare(&mut message)?;
        let command = protocol::command(&message).unwrap_or_default().to_string();
        let what = format!("`{command}` response to request {seq}");

        let registration = self
            .pending
            .register(Box::new({
                let command = command.clone();
                move |msg| protocol::is_response_to(msg, seq, &command)
            }))?
            .expecting(seq, &command);
        self.write(&message)?;
        registration.wait(&what, self.request_timeout)
    }

    /// Close the backend socket, the network thread exits on its own.
    pub fn shutdown(&self) {
        if let Ok(writer) = self.writer.lock() {
            if let Err(e) = writer.get_ref().shutdown(Shutdown::Both) {
                bridge_debug!(target: "dap", "shutdown backend socket: {e}");
            }
        }
        self.pending.close();
    }

    fn prepare(&self, message: &mut Value) -> Result<i64, Error> {
        if !message.is_object() {
            return Err(Error::ProtocolViolation(format!(
                "message is not an object: {message}"
            )));
        }

        let seq = match message.get("seq") {
            None | Some(Value::Null) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                message["seq"] = Value::from(seq);
                seq
            }
            Some(v) => v
                .as_i64()
                .ok_or_else(|| Error::ProtocolViolation(format!("invalid seq: {v}")))?,
        };
        self.next_seq.fetch_max(seq + 1, Ordering::SeqCst);

        if protocol::kind(message) == Some(MessageKind::Request) {
            let Some(command) = protocol::command(message) else {
                return Err(Error::ProtocolViolation(format!(
                    "request {seq} without command"
                )));
            };
            self.pending.expect_response(seq, command);
        }
        Ok(seq)
    }

    fn write(&self, message: &Value) -> Result<(), Error> {
        if self.pending.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let mut writer = self.writer.lock().map_err(|_| Error::ConnectionClosed)?;
        writer.write_message(message).inspect_err(|e| {
            if e.is_fatal() {
                self.pending.close();
            }
        })
    }
}

fn connect(endpoint: SocketAddr, timeout: Duration) -> Result<TcpStream, Error> {
    let start = Instant::now();
    loop {
        let remaining = timeout.saturating_sub(start.elapsed());
        match TcpStream::connect_timeout(&endpoint, remaining.max(CONNECT_RETRY_DELAY)) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                if start.elapsed() > timeout {
                    return Err(Error::Transport(err));
                }
                thread::sleep(CONNECT_RETRY_DELAY);
            }
        }
    }
}

fn network_thread(
    endpoint: SocketAddr,
    options: ClientOptions,
    handler: Arc<dyn EventHandler>,
    ack: mpsc::SyncSender<Result<Arc<DapClient>, Error>>,
) {
    let (client, reader) = match open(endpoint, &options) {
        Ok(v) => v,
        Err(e) => {
            // the backend never came up within the handshake window
            bridge_warn!(target: "dap", "connect to debug backend at {endpoint}: {e}");
            let _ = ack.send(Err(Error::StartupTimeout(options.handshake_timeout)));
            return;
        }
    };
    bridge_info!(target: "dap", "connected to debug backend at {endpoint}");

    let (event_tx, event_rx) = mpsc::channel::<Value>();
    let events = thread::Builder::new().name("dap-events".into()).spawn({
        let client = client.clone();
        move || {
            for event in event_rx {
                handler.handle_event(&client, event);
            }
        }
    });
    if let Err(e) = events {
        client.shutdown();
        let _ = ack.send(Err(Error::Transport(e)));
        return;
    }

    let pending = client.pending.clone();
    if ack.send(Ok(client.clone())).is_err() {
        bridge_warn!(target: "dap", "nobody waits for the backend connection, closing it");
        client.shutdown();
    }
    drop(client);

    receive_loop(reader, &pending, &event_tx);
    pending.close();
    bridge_info!(target: "dap", "backend connection {endpoint} closed");
}

fn open(
    endpoint: SocketAddr,
    options: &ClientOptions,
) -> Result<(Arc<DapClient>, FrameReader<TcpStream>), Error> {
    let stream = connect(endpoint, options.handshake_timeout)?;
    stream.set_nodelay(true)?;
    let reader = FrameReader::new(stream.try_clone()?, options.tracer.clone());

    let client = Arc::new(DapClient {
        endpoint,
        writer: Mutex::new(FrameWriter::new(stream, options.tracer.clone())),
        pending: Arc::new(PendingRequests::new()),
        next_seq: AtomicI64::new(1),
        request_timeout: options.request_timeout,
    });
    Ok((client, reader))
}

fn receive_loop(
    mut reader: FrameReader<TcpStream>,
    pending: &PendingRequests,
    events: &mpsc::Sender<Value>,
) {
    loop {
        let msg = match reader.read_message() {
            Ok(msg) => msg,
            Err(Error::Json(e)) => {
                bridge_warn!(target: "dap", "protocol violation, malformed frame dropped: {e}");
                continue;
            }
            Err(Error::ConnectionClosed) => return,
            Err(e) => {
                bridge_warn!(target: "dap", "backend connection failed: {e}");
                return;
            }
        };

        match pending.dispatch(msg) {
            Dispatch::Event(event) => {
                if events.send(event).is_err() {
                    bridge_warn!(target: "dap", "event thread is gone, backend event dropped");
                }
            }
            Dispatch::Claimed | Dispatch::Buffered | Dispatch::Dropped => {}
        }
    }
}
