//! Interface of the language runtime hosting the debugger.
//!
//! The session never touches interpreter state directly. Everything goes through a
//! [`GlobalScope`], which can only be obtained by acquiring the runtime lock with
//! [`Interpreter::acquire`]. Dropping the scope releases the lock, so a handler keeps the lock
//! exactly for the lifetime of the scope value.

use serde::Deserialize;
use serde_json::Value;

/// Exception raised by interpreter-side code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{ename}: {evalue}")]
pub struct InterpreterError {
    pub ename: String,
    pub evalue: String,
}

impl InterpreterError {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        Self {
            ename: ename.into(),
            evalue: evalue.into(),
        }
    }
}

/// Reply of an `execute_request` served by the main execution context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecuteReply {
    Ok,
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

/// Interpreter state reachable while the runtime lock is held.
pub trait GlobalScope {
    /// Execute `code` in the global namespace.
    fn exec(&mut self, code: &str) -> Result<(), InterpreterError>;

    /// Evaluate `expression` in the global namespace, converting the result into JSON.
    fn eval(&mut self, expression: &str) -> Result<Value, InterpreterError>;

    /// Remove a binding from the global namespace.
    fn remove_global(&mut self, name: &str) -> Result<(), InterpreterError>;

    /// Answer an `inspectVariables` request with the interpreter-side introspection object.
    fn inspect_variables(&mut self, request: &Value) -> Result<Value, InterpreterError>;

    /// Answer a `variables` request while no thread is stopped.
    fn variables(&mut self, request: &Value) -> Result<Value, InterpreterError>;

    /// Build a `variables` response out of the variables reported by a stopped backend.
    fn build_variables_response(
        &mut self,
        request: &Value,
        variables: &Value,
    ) -> Result<Value, InterpreterError>;
}

/// The runtime owning the debug session.
pub trait Interpreter: Send + Sync + 'static {
    type Scope<'a>: GlobalScope
    where
        Self: 'a;

    /// Acquire the runtime lock.
    fn acquire(&self) -> Self::Scope<'_>;

    /// Return true if the calling context currently holds the runtime lock.
    fn holding_lock(&self) -> bool;

    /// Run `code` as an execute request on the main execution context and wait for the reply.
    fn execute_on_main(&self, code: &str) -> ExecuteReply;

    /// Publish a debug event to the front end.
    fn publish_event(&self, event: Value);
}
