use crate::interpreter::InterpreterError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- transport errors ------------------------------------------
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("connection to the debug backend is closed")]
    ConnectionClosed,

    // --------------------------------- wait errors -----------------------------------------------
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
    #[error("debug backend did not acknowledge the handshake within {0:?}")]
    StartupTimeout(Duration),

    // --------------------------------- session errors --------------------------------------------
    #[error("backend bootstrap failed: {0}")]
    BootstrapFailed(String),
    #[error("debug session is not attached")]
    NotAttached,
    #[error("debug session is already starting")]
    AlreadyStarting,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("no free port for the debug backend in {0}..={1}")]
    NoFreePort(u16, u16),

    // --------------------------------- request handling errors -----------------------------------
    #[error("{0}")]
    HandlerFault(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Return a hint to the session controller - keep the session or tear it down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Timeout { .. } => false,
            Error::StartupTimeout(_) => false,
            Error::BootstrapFailed(_) => false,
            Error::NotAttached => false,
            Error::AlreadyStarting => false,
            Error::Config(_) => false,
            Error::NoFreePort(_, _) => false,
            Error::HandlerFault(_) => false,
            Error::ProtocolViolation(_) => false,
            Error::Interpreter(_) => false,
            Error::Json(_) => false,

            // backend socket is gone
            Error::Transport(_) => true,
            Error::ConnectionClosed => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
