use crate::common::{attached_session, response, wait_until, FakeBackend};
use debugpy_bridge::interpreter::Interpreter;
use serde_json::{json, Value};
use serial_test::serial;
use std::fs;

#[test]
#[serial]
fn test_unknown_commands_are_passed_through() {
    let backend = FakeBackend::with_script(|request| {
        vec![json!({
            "type": "response",
            "request_seq": request["seq"],
            "success": true,
            "command": request["command"],
            "body": {"threads": [{"id": 1, "name": "MainThread"}]},
        })]
    });
    let (_, session) = attached_session(&backend);

    let request = json!({
        "type": "request",
        "seq": 12,
        "command": "threads",
        "arguments": {"custom": [1, 2, 3]},
    });
    let reply = session.handle_request(&request);

    assert_eq!(backend.requests_of("threads"), vec![request]);
    assert_eq!(reply["request_seq"], 12);
    assert_eq!(reply["success"], true);
    assert_eq!(reply["body"]["threads"][0]["name"], "MainThread");
}

#[test]
#[serial]
fn test_backend_failure_reply_is_relayed() {
    let backend = FakeBackend::with_script(|request| {
        vec![json!({
            "type": "response",
            "request_seq": request["seq"],
            "success": false,
            "command": request["command"],
            "message": "Unable to find thread",
        })]
    });
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 4,
        "command": "stepIn",
        "arguments": {"threadId": 42},
    }));
    assert_eq!(reply["success"], false);
    assert_eq!(reply["message"], "Unable to find thread");
}

#[test]
#[serial]
fn test_rich_inspect_grouping_variables() {
    let backend = FakeBackend::start();
    let (interpreter, session) = attached_session(&backend);

    for name in ["special variables", "function variables"] {
        let reply = session.handle_request(&json!({
            "command": "richInspectVariables",
            "arguments": {"variableName": name},
        }));
        assert_eq!(reply["success"], true);
        assert_eq!(reply["body"], json!({"data": {}, "metadata": {}}));
    }

    let reply = session.rich_inspect_variables(&json!({
        "arguments": {"variableName": "special variables"},
    }));
    assert_eq!(reply.unwrap()["body"], json!({"data": {}, "metadata": {}}));

    assert!(interpreter.executed().is_empty());
    assert!(backend.requests_of("evaluate").is_empty());
}

#[test]
#[serial]
fn test_rich_inspect_invalid_name() {
    let backend = FakeBackend::start();
    let (interpreter, session) = attached_session(&backend);

    let reply = session
        .rich_inspect_variables(&json!({"arguments": {"variableName": "my var"}}))
        .unwrap();
    assert_eq!(reply["success"], false);
    assert_eq!(reply["body"], json!({"data": {}, "metadata": {}}));
    assert!(interpreter.executed().is_empty());
}

#[test]
#[serial]
fn test_rich_inspect_running() {
    let backend = FakeBackend::start();
    let (interpreter, session) = attached_session(&backend);
    interpreter.set_global("df", json!(42));

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 7,
        "command": "richInspectVariables",
        "arguments": {"variableName": "df"},
    }));

    assert_eq!(reply["success"], true);
    assert_eq!(reply["request_seq"], 7);
    assert_eq!(
        reply["body"],
        json!({"data": {"text/plain": "42"}, "metadata": {}})
    );
    // sentinel bindings don't leak into the user namespace
    assert_eq!(interpreter.globals().len(), 1);
    assert!(!interpreter.holding_lock());
    assert!(backend.requests_of("evaluate").is_empty());
}

#[test]
#[serial]
fn test_rich_inspect_unknown_variable() {
    let backend = FakeBackend::start();
    let (interpreter, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 8,
        "command": "richInspectVariables",
        "arguments": {"variableName": "missing"},
    }));
    assert_eq!(reply["success"], false);
    assert!(reply["message"]
        .as_str()
        .unwrap()
        .contains("name 'missing' is not defined"));
    assert!(!interpreter.holding_lock());
}

#[test]
#[serial]
fn test_rich_inspect_stopped() {
    let backend = FakeBackend::with_script(|request| match request["command"].as_str() {
        Some("evaluate") => vec![response(
            request,
            json!({"result": r#"[{"text/plain": "[1, 2]", "text/html": "<b>[1, 2]</b>"}, {"text/html": {"isolated": true}}]"#}),
        )],
        _ => vec![response(request, json!({}))],
    });
    let (interpreter, session) = attached_session(&backend);

    backend.send_event("stopped", json!({"reason": "breakpoint", "threadId": 3}));
    wait_until("stopped thread", || session.stopped_threads() == vec![3]);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 10,
        "command": "richInspectVariables",
        "arguments": {"variableName": "lst", "frameId": 5},
    }));
    assert_eq!(reply["success"], true, "{reply}");
    assert_eq!(
        reply["body"],
        json!({
            "data": {"text/plain": "[1, 2]", "text/html": "<b>[1, 2]</b>"},
            "metadata": {"text/html": {"isolated": true}},
        })
    );

    let evaluate = &backend.requests_of("evaluate")[0];
    assert_eq!(evaluate["seq"], 11);
    assert_eq!(
        evaluate["arguments"],
        json!({
            "expression": "get_ipython().display_formatter.format(lst)",
            "frameId": 5,
            "context": "clipboard",
        })
    );
    let executed = interpreter.executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("lst_repr_data,lst_repr_metadata = __import__('ast').literal_eval("));
    assert!(interpreter.globals().is_empty());
}

#[test]
#[serial]
fn test_copy_to_globals() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 5,
        "command": "copyToGlobals",
        "arguments": {"dstVariableName": "x", "srcVariableName": "y", "srcFrameId": 2},
    }));
    assert_eq!(reply["success"], true);
    assert_eq!(reply["request_seq"], 6);

    let requests = backend.requests_of("setExpression");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["seq"], 6);
    assert_eq!(requests[0]["type"], "request");
    assert_eq!(requests[0]["arguments"]["expression"], "globals()['x']");
    assert_eq!(requests[0]["arguments"]["value"], "y");
    assert_eq!(requests[0]["arguments"]["frameId"], 2);
}

#[test]
#[serial]
fn test_copy_to_globals_rejects_expressions() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 5,
        "command": "copyToGlobals",
        "arguments": {"dstVariableName": "x'] = 1; y['", "srcVariableName": "y", "srcFrameId": 2},
    }));
    assert_eq!(reply["success"], false);
    assert!(backend.requests_of("setExpression").is_empty());
}

#[test]
#[serial]
fn test_attach_injects_backend_endpoint() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 2,
        "command": "attach",
        "arguments": {
            "connect": {"host": "10.0.0.1", "port": 1},
            "justMyCode": false,
        },
    }));
    assert_eq!(reply["success"], true);

    let attach = &backend.requests_of("attach")[0];
    assert_eq!(attach["arguments"]["connect"]["host"], "127.0.0.1");
    assert_eq!(attach["arguments"]["connect"]["port"], backend.endpoint().port());
    assert_eq!(attach["arguments"]["logToFile"], true);
    assert_eq!(attach["arguments"]["justMyCode"], false);
}

#[test]
#[serial]
fn test_configuration_done_is_local() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 9,
        "command": "configurationDone",
    }));
    assert_eq!(reply["type"], "response");
    assert_eq!(reply["request_seq"], 9);
    assert_eq!(reply["success"], true);
    assert_eq!(reply["command"], "configurationDone");
    assert!(backend.requests_of("configurationDone").is_empty());
}

#[test]
#[serial]
fn test_inspect_variables() {
    let backend = FakeBackend::start();
    let (interpreter, session) = attached_session(&backend);
    interpreter.set_global("a", json!(1));
    interpreter.set_global("b", json!("two"));

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 3,
        "command": "inspectVariables",
    }));
    assert_eq!(reply["success"], true);
    assert_eq!(
        reply["body"]["variables"],
        json!([{"name": "a"}, {"name": "b"}])
    );
    assert!(backend.requests().is_empty());
}

#[test]
#[serial]
fn test_variables_source_depends_on_stopped_threads() {
    let backend = FakeBackend::with_script(|request| match request["command"].as_str() {
        Some("variables") => vec![response(
            request,
            json!({"variables": [{"name": "i", "value": "3", "variablesReference": 0}]}),
        )],
        _ => vec![response(request, json!({}))],
    });
    let (_, session) = attached_session(&backend);
    let request = json!({
        "type": "request",
        "seq": 20,
        "command": "variables",
        "arguments": {"variablesReference": 1},
    });

    let reply = session.handle_request(&request);
    assert_eq!(reply["body"]["source"], "globals");
    assert!(backend.requests_of("variables").is_empty());

    backend.send_event("stopped", json!({"reason": "step", "threadId": 1}));
    wait_until("stopped thread", || !session.stopped_threads().is_empty());

    let reply = session.handle_request(&request);
    assert_eq!(reply["body"]["source"], "backend");
    assert_eq!(reply["body"]["variables"][0]["name"], "i");
    assert_eq!(backend.requests_of("variables").len(), 1);
}

#[test]
#[serial]
fn test_set_breakpoints_are_reported_by_debug_info() {
    let backend = FakeBackend::with_script(|request| match request["command"].as_str() {
        Some("setBreakpoints") => vec![response(
            request,
            json!({"breakpoints": [{"verified": true, "line": 3}]}),
        )],
        _ => vec![response(request, json!({}))],
    });
    let (_, session) = attached_session(&backend);

    let source = session.cell_temporary_file("x = 1\ny = 2\nz = 3\n");
    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 2,
        "command": "setBreakpoints",
        "arguments": {"source": {"path": source}, "breakpoints": [{"line": 3}]},
    }));
    assert_eq!(reply["success"], true);

    let info = session.handle_request(&json!({
        "type": "request",
        "seq": 3,
        "command": "debugInfo",
    }));
    let body = &info["body"];
    assert_eq!(body["isStarted"], true);
    assert_eq!(body["tmpFileSuffix"], ".py");
    assert_eq!(body["stoppedThreads"], json!([]));
    assert_eq!(
        body["breakpoints"],
        json!([{"source": source, "breakpoints": [{"verified": true, "line": 3}]}])
    );
}

#[test]
#[serial]
fn test_dump_cell() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);
    let code = "def f():\n    return 1\n";

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 4,
        "command": "dumpCell",
        "arguments": {"code": code},
    }));
    assert_eq!(reply["success"], true);

    let path = reply["body"]["sourcePath"].as_str().unwrap().to_string();
    assert_eq!(path, session.cell_temporary_file(code));
    assert_eq!(fs::read_to_string(&path).unwrap(), code);
    fs::remove_file(path).unwrap();

    session.register_filename_mapping(session.cell_temporary_file(code), 4);
    assert_eq!(session.display_filename(&session.cell_temporary_file(code)), "[4]");
}

#[test]
#[serial]
fn test_malformed_requests_get_error_responses() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let reply = session.handle_request(&json!({"seq": 1}));
    assert_eq!(reply["success"], false);
    assert_eq!(reply["request_seq"], 1);
    assert_eq!(reply["command"], Value::Null);

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 2,
        "command": "dumpCell",
        "arguments": {},
    }));
    assert_eq!(reply["success"], false);
    assert!(reply["message"].as_str().unwrap().contains("invalid arguments"));
}
