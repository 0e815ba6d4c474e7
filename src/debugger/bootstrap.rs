//! One-time start of the debug backend inside the interpreter process.

use crate::debugger::Error;
use once_cell::sync::Lazy;
use rand::Rng;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum BootstrapState {
    Pending,
    Listening(SocketAddr),
    Failed(String),
}

/// Process-wide guard making the backend bootstrap happen at most once.
///
/// A failed bootstrap is memoized too: later sessions get the same failure instead of retrying.
#[derive(Debug)]
pub struct BackendBootstrap {
    state: Mutex<BootstrapState>,
}

static GLOBAL: Lazy<Arc<BackendBootstrap>> = Lazy::new(|| Arc::new(BackendBootstrap::new()));

impl Default for BackendBootstrap {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendBootstrap {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BootstrapState::Pending),
        }
    }

    /// Bootstrap guard shared by every session of this process.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Run `bootstrap` unless it already ran, return the endpoint the backend listens on.
    ///
    /// Concurrent callers block until the first bootstrap attempt is over.
    pub fn ensure(
        &self,
        bootstrap: impl FnOnce() -> Result<SocketAddr, Error>,
    ) -> Result<SocketAddr, Error> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*state {
            BootstrapState::Listening(endpoint) => return Ok(*endpoint),
            BootstrapState::Failed(reason) => return Err(Error::BootstrapFailed(reason.clone())),
            BootstrapState::Pending => {}
        }

        match bootstrap() {
            Ok(endpoint) => {
                *state = BootstrapState::Listening(endpoint);
                Ok(endpoint)
            }
            Err(e) => {
                let reason = match e {
                    Error::BootstrapFailed(reason) => reason,
                    other => other.to_string(),
                };
                *state = BootstrapState::Failed(reason.clone());
                Err(Error::BootstrapFailed(reason))
            }
        }
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        match &*self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
        {
            BootstrapState::Listening(endpoint) => Some(*endpoint),
            _ => None,
        }
    }

    /// Forget the previous bootstrap outcome.
    pub fn reset(&self) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = BootstrapState::Pending;
    }
}

/// Code making the interpreter import the backend library and listen on `endpoint`.
pub fn listen_snippet(endpoint: SocketAddr, python: Option<&str>) -> String {
    let mut code = String::from("import debugpy;");
    if let Some(python) = python {
        // a JSON string is a valid python string literal
        let python = serde_json::Value::String(python.to_string()).to_string();
        code += &format!("debugpy.configure({{'python': {python}}});");
    }
    code += &format!(
        "debugpy.listen(('{}',{}))",
        endpoint.ip(),
        endpoint.port()
    );
    code
}

/// Pick a random port in `min..=max` that is free to bind on `host`.
pub fn find_free_port(host: IpAddr, min: u16, max: u16, attempts: u32) -> Result<u16, Error> {
    if min > max {
        return Err(Error::NoFreePort(min, max));
    }
    let mut rng = rand::thread_rng();
    for _ in 0..attempts.max(1) {
        let port = rng.gen_range(min..=max);
        if TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(Error::NoFreePort(min, max))
}
