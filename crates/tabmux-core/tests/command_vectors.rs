//! Broker command vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use tabmux_core::protocol::command::BrokerCommand;

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

fn error_reason(err: &tabmux_core::TabmuxError) -> &'static str {
    match err {
        tabmux_core::TabmuxError::InvalidCommand(reason) => reason,
        other => panic!("unexpected error kind: {other:?}"),
    }
}

#[test]
fn command_vectors() {
    let files = [
        "cmd_hello.json",
        "cmd_hello_empty_name.json",
        "cmd_goodbye.json",
        "cmd_send.json",
        "cmd_send_truncated.json",
        "cmd_goodbye_short.json",
        "cmd_unknown_opcode.json",
    ];

    for f in files {
        let v = load(f);
        let raw = v.frame.decode();
        let res = BrokerCommand::decode(&raw);

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            assert_eq!(error_reason(&e), err.reason, "vector={}", v.description);
            continue;
        }

        let cmd = res.expect("expected ok command");
        let ex = v.expect.expect("missing expect block");
        let (op, id, body) = match &cmd {
            BrokerCommand::Hello { id, name } => ("hello", *id, Some(name.clone())),
            BrokerCommand::Goodbye { id } => ("goodbye", *id, None),
            BrokerCommand::Send { id, command } => ("send", *id, Some(command.clone())),
        };

        assert_eq!(op, ex["op"].as_str().unwrap(), "vector={}", v.description);
        assert_eq!(i64::from(id), ex["id"].as_i64().unwrap(), "vector={}", v.description);
        if let Some(body) = body {
            let expected = hex::decode(ex["body_hex"].as_str().unwrap()).unwrap();
            assert_eq!(body, expected, "vector={}", v.description);
        }

        // Every decodable vector re-encodes to the original bytes.
        assert_eq!(cmd.encode(), raw, "vector={}", v.description);
    }
}
