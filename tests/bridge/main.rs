
mod requests;
mod transport;

use crate::common::{attached_session, FakeBackend};
use serde_json::json;
use serial_test::serial;

#[test]
#[serial]
fn test_bridge_smoke() {
    let backend = FakeBackend::start();
    let (_, session) = attached_session(&backend);

    let info = session.handle_request(&json!({
        "type": "request",
        "seq": 1,
        "command": "debugInfo",
    }));
    assert_eq!(info["success"], true);
    assert_eq!(info["body"]["isStarted"], true);
    assert_eq!(info["body"]["hashMethod"], "Murmur2");

    let reply = session.handle_request(&json!({
        "type": "request",
        "seq": 2,
        "command": "threads",
    }));
    assert_eq!(reply["success"], true);
    assert_eq!(backend.requests_of("threads").len(), 1);

    session.stop();
}
