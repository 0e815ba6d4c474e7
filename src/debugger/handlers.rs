//! Requests answered by the bridge itself instead of being passed through to the backend.

use crate::dap::protocol::{self, DapRequest, DapResponse};
use crate::debugger::info;
use crate::debugger::{Error, Session};
use crate::interpreter::{GlobalScope, Interpreter};
use crate::weak_error;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, EnumString, Display, IntoStaticStr, EnumIter)]
pub enum Command {
    #[strum(serialize = "inspectVariables")]
    InspectVariables,
    #[strum(serialize = "richInspectVariables")]
    RichInspectVariables,
    #[strum(serialize = "attach")]
    Attach,
    #[strum(serialize = "configurationDone")]
    ConfigurationDone,
    #[strum(serialize = "copyToGlobals")]
    CopyToGlobals,
    #[strum(serialize = "variables")]
    Variables,
    #[strum(serialize = "setBreakpoints")]
    SetBreakpoints,
    #[strum(serialize = "dumpCell")]
    DumpCell,
    #[strum(serialize = "debugInfo")]
    DebugInfo,
}

pub type Handler<I> = fn(&Session<I>, &Value) -> Result<Value, Error>;

fn handler<I: Interpreter>(command: Command) -> Handler<I> {
    match command {
        Command::InspectVariables => Session::<I>::inspect_variables,
        Command::RichInspectVariables => Session::<I>::rich_inspect_variables,
        Command::Attach => Session::<I>::attach,
        Command::ConfigurationDone => Session::<I>::configuration_done,
        Command::CopyToGlobals => Session::<I>::copy_to_globals,
        Command::Variables => Session::<I>::variables,
        Command::SetBreakpoints => Session::<I>::set_breakpoints,
        Command::DumpCell => Session::<I>::dump_cell,
        Command::DebugInfo => Session::<I>::debug_info,
    }
}

/// Build the command dispatch table.
pub fn dispatch_table<I: Interpreter>() -> HashMap<Command, Handler<I>> {
    Command::iter().map(|cmd| (cmd, handler::<I>(cmd))).collect()
}

/// Pseudo variables grouping the variable tree, they have no value of their own.
const GROUPING_VARIABLES: [&str; 2] = ["special variables", "function variables"];

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RichInspectArguments {
    variable_name: String,
    #[serde(default)]
    frame_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CopyToGlobalsArguments {
    dst_variable_name: String,
    src_variable_name: String,
    src_frame_id: i64,
}

#[derive(Deserialize)]
struct DumpCellArguments {
    code: String,
}

/// Python `str.isidentifier` for the names the front end can send.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || unicode_ident::is_xid_start(first) => {
            chars.all(unicode_ident::is_xid_continue)
        }
        _ => false,
    }
}

fn arguments<T: for<'de> Deserialize<'de>>(message: &Value) -> Result<T, Error> {
    serde_json::from_value(message["arguments"].clone())
        .map_err(|e| Error::HandlerFault(format!("invalid arguments: {e}")))
}

/// Merge a display formatter output into `{data, metadata}` keyed by mime type.
fn mime_bundle(data: &Value, metadata: &Value) -> Result<Value, Error> {
    let Some(data) = data.as_object() else {
        return Err(Error::HandlerFault(format!(
            "display formatter returned no mime bundle: {data}"
        )));
    };

    let mut bundle_data = Map::new();
    let mut bundle_metadata = Map::new();
    for (mime, value) in data {
        bundle_data.insert(mime.clone(), value.clone());
        if let Some(meta) = metadata.get(mime) {
            bundle_metadata.insert(mime.clone(), meta.clone());
        }
    }
    Ok(json!({"data": bundle_data, "metadata": bundle_metadata}))
}

impl<I: Interpreter> Session<I> {
    pub fn inspect_variables(&self, message: &Value) -> Result<Value, Error> {
        let mut scope = self.interpreter().acquire();
        Ok(scope.inspect_variables(message)?)
    }

    /// Return the rich (mime bundle) representation of a variable.
    pub fn rich_inspect_variables(&self, message: &Value) -> Result<Value, Error> {
        let args: RichInspectArguments = arguments(message)?;
        let name = args.variable_name;

        if !is_identifier(&name) {
            let success = GROUPING_VARIABLES.contains(&name.as_str());
            return Ok(protocol::reply(
                message,
                success,
                json!({"data": {}, "metadata": {}}),
            ));
        }

        let data_name = format!("{name}_repr_data");
        let metadata_name = format!("{name}_repr_metadata");

        if !self.context().has_stopped_threads() {
            let code = format!(
                "from IPython import get_ipython;{data_name},{metadata_name} = get_ipython().display_formatter.format({name})"
            );
            self.interpreter().acquire().exec(&code)?;
        } else {
            // frame locals are reachable through the backend only
            let frame_id = args.frame_id.ok_or_else(|| {
                Error::HandlerFault(format!("no frame to inspect `{name}` in"))
            })?;
            let seq = protocol::seq(message).unwrap_or_default();
            let request = DapRequest::new(
                seq + 1,
                "evaluate",
                json!({
                    "expression": format!("get_ipython().display_formatter.format({name})"),
                    "frameId": frame_id,
                    "context": "clipboard",
                }),
            );
            let reply = self.forward_message(request.into_value())?;
            let Some(result) = reply["body"]["result"].as_str() else {
                return Err(Error::HandlerFault(format!(
                    "evaluate `{name}` in frame {frame_id}: {}",
                    reply["message"].as_str().unwrap_or("no result")
                )));
            };

            // backend output is parsed as a literal and never executed
            let literal = Value::String(result.to_string());
            let code = format!(
                "{data_name},{metadata_name} = __import__('ast').literal_eval({literal})"
            );
            self.interpreter().acquire().exec(&code)?;
        }

        let mut scope = self.interpreter().acquire();
        let data = scope.eval(&data_name);
        let metadata = scope.eval(&metadata_name);
        weak_error!(scope.remove_global(&data_name));
        weak_error!(scope.remove_global(&metadata_name));
        drop(scope);

        let body = mime_bundle(&data?, &metadata?)?;
        Ok(protocol::reply(message, true, body))
    }

    /// Point the backend to the endpoint it listens on and forward the request.
    pub fn attach(&self, message: &Value) -> Result<Value, Error> {
        let endpoint = self.endpoint().ok_or(Error::NotAttached)?;
        if !message.is_object() {
            return Err(Error::ProtocolViolation(format!(
                "request is not an object: {message}"
            )));
        }

        let mut request = message.clone();
        if !request["arguments"].is_object() {
            request["arguments"] = json!({});
        }
        request["arguments"]["connect"] = json!({
            "host": endpoint.ip().to_string(),
            "port": endpoint.port(),
        });
        request["arguments"]["logToFile"] = Value::Bool(true);
        self.forward_message(request)
    }

    pub fn configuration_done(&self, message: &Value) -> Result<Value, Error> {
        let request: DapRequest = serde_json::from_value(message.clone())?;
        let response = DapResponse {
            seq: request.seq,
            r#type: "response".to_string(),
            request_seq: request.seq,
            success: true,
            command: request.command,
            message: None,
            body: None,
        };
        Ok(serde_json::to_value(response)?)
    }

    /// Copy a frame variable into the global namespace with a `setExpression` request.
    pub fn copy_to_globals(&self, message: &Value) -> Result<Value, Error> {
        let args: CopyToGlobalsArguments = arguments(message)?;
        if !is_identifier(&args.dst_variable_name) {
            return Err(Error::HandlerFault(format!(
                "`{}` is not a valid variable name",
                args.dst_variable_name
            )));
        }
        let seq = protocol::seq(message)
            .ok_or_else(|| Error::ProtocolViolation("copyToGlobals without seq".into()))?;

        let request = DapRequest::new(
            seq + 1,
            "setExpression",
            json!({
                "expression": format!("globals()['{}']", args.dst_variable_name),
                "value": args.src_variable_name,
                "frameId": args.src_frame_id,
            }),
        );
        self.forward_message(request.into_value())
    }

    pub fn variables(&self, message: &Value) -> Result<Value, Error> {
        if !self.context().has_stopped_threads() {
            let mut scope = self.interpreter().acquire();
            return Ok(scope.variables(message)?);
        }

        let reply = self.forward_message(message.clone())?;
        let mut scope = self.interpreter().acquire();
        Ok(scope.build_variables_response(message, &reply["body"]["variables"])?)
    }

    pub fn set_breakpoints(&self, message: &Value) -> Result<Value, Error> {
        let reply = self.forward_message(message.clone())?;
        if reply["success"].as_bool() == Some(true) {
            self.context().record_breakpoints(message, &reply);
        }
        Ok(reply)
    }

    /// Write the source of a cell into its temporary file.
    pub fn dump_cell(&self, message: &Value) -> Result<Value, Error> {
        let args: DumpCellArguments = arguments(message)?;
        let path = self.cell_temporary_file(&args.code);

        fs::create_dir_all(info::tmp_prefix())
            .and_then(|_| fs::write(&path, &args.code))
            .map_err(|e| Error::HandlerFault(format!("dump cell into {path}: {e}")))?;
        Ok(protocol::reply(message, true, json!({"sourcePath": path})))
    }

    pub fn debug_info(&self, message: &Value) -> Result<Value, Error> {
        let mut body = serde_json::to_value(self.get_debugger_info())?;
        body["isStarted"] = Value::Bool(self.is_attached());
        body["breakpoints"] = self.context().breakpoints();
        body["stoppedThreads"] = json!(self.context().stopped_threads());
        Ok(protocol::reply(message, true, body))
    }
}
