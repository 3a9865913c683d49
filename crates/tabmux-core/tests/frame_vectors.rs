//! WebSocket frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::fs;

use tabmux_core::buffer::BufferPool;
use tabmux_core::protocol::ws::{FrameParser, OpCode};

mod vector_loader;
use vector_loader::TestVector;

fn load(name: &str) -> TestVector {
    let s = fs::read_to_string(format!("tests/vectors/{name}")).unwrap();
    serde_json::from_str(&s).unwrap()
}

fn op_name(op: OpCode) -> &'static str {
    match op {
        OpCode::Continuation => "continuation",
        OpCode::Text => "text",
        OpCode::Binary => "binary",
        OpCode::Close => "close",
        OpCode::Ping => "ping",
        OpCode::Pong => "pong",
    }
}

#[test]
fn frame_vectors() {
    let files = [
        "ws_masked_text.json",
        "ws_ping.json",
        "ws_extended16.json",
        "ws_unmasked.json",
        "ws_reserved_flags.json",
        "ws_fragmented_close.json",
        "ws_unknown_opcode.json",
    ];

    for f in files {
        let v = load(f);
        let mut raw = v.frame.decode();

        let mut parser = FrameParser::new(BufferPool::new());
        let mut messages: Vec<(OpCode, Vec<u8>)> = Vec::new();
        let res = parser.feed(&mut raw, |msg| {
            messages.push((msg.op_code, msg.payload.to_vec()));
            Ok(())
        });

        if let Some(err) = v.expect_error {
            let e = res.expect_err("expected error");
            let reason = match e {
                tabmux_core::TabmuxError::Protocol(reason) => reason,
                other => panic!("unexpected error kind: {other:?}"),
            };
            assert_eq!(reason, err.reason, "vector={}", v.description);
            continue;
        }

        res.expect("expected clean parse");
        let ex = v.expect.expect("missing expect block");
        assert_eq!(messages.len(), 1, "vector={}", v.description);
        assert_eq!(
            op_name(messages[0].0),
            ex["op"].as_str().unwrap(),
            "vector={}",
            v.description
        );
        let expected = hex::decode(ex["payload_hex"].as_str().unwrap()).unwrap();
        assert_eq!(messages[0].1, expected, "vector={}", v.description);
    }
}
