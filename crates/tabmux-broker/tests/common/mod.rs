//! Shared plumbing for the socket-level integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use tabmux_broker::{Broker, BrokerConfig, BrokerHandle};

pub const UPGRADE_REQUEST: &str = "GET / HTTP/1.1\r\nHost: x\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: AAAAAAAAAAAAAAAAAAAAAA==\r\nSec-WebSocket-Version: 13\r\n\r\n";
pub const UPGRADE_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: ICX+Yqv66kxgM0FcWaLWlFLwTAI=\r\n\r\n";

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_TEXT: u8 = 0x1;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn start_broker() -> BrokerHandle {
    Broker::bind(BrokerConfig::ephemeral())
        .await
        .expect("broker must bind on ephemeral ports")
}

/// Connect to the upstream port and complete the WebSocket handshake. A
/// ping/pong round-trip afterwards proves the WebSocket handler is live (and
/// the dispatcher's connected-transition enqueued) before clients connect.
pub async fn connect_upstream(handle: &BrokerHandle) -> TcpStream {
    let mut stream = TcpStream::connect(handle.upstream_addr).await.unwrap();
    stream.write_all(UPGRADE_REQUEST.as_bytes()).await.unwrap();
    let mut reply = vec![0u8; UPGRADE_RESPONSE.len()];
    read_exactly(&mut stream, &mut reply).await;
    assert_eq!(reply, UPGRADE_RESPONSE.as_bytes());

    stream
        .write_all(&masked_frame(OP_PING, [9, 9, 9, 9], b"sync"))
        .await
        .unwrap();
    let (op, payload) = read_frame(&mut stream).await;
    assert_eq!((op, payload.as_slice()), (OP_PONG, &b"sync"[..]));
    sleep(Duration::from_millis(50)).await;
    stream
}

/// Connect a tabserver client and run the HELLO exchange.
pub async fn connect_client(handle: &BrokerHandle, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(handle.client_addr).await.unwrap();
    stream
        .write_all(format!("HELLO\n{name}\n").as_bytes())
        .await
        .unwrap();
    stream
}

/// Read one unmasked server frame: (opcode, payload).
pub async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut hdr = [0u8; 2];
    read_exactly(stream, &mut hdr).await;
    assert_eq!(hdr[0] & 0x80, 0x80, "expected FIN frame");
    assert_eq!(hdr[0] & 0x70, 0, "reserved bits must be clear");
    assert_eq!(hdr[1] & 0x80, 0, "server frames are unmasked");
    let op = hdr[0] & 0x0F;
    let len = match hdr[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            read_exactly(stream, &mut ext).await;
            u16::from_be_bytes(ext) as usize
        }
        127 => {
            let mut ext = [0u8; 8];
            read_exactly(stream, &mut ext).await;
            u64::from_be_bytes(ext) as usize
        }
        n => n as usize,
    };
    let mut payload = vec![0u8; len];
    read_exactly(stream, &mut payload).await;
    (op, payload)
}

/// Build a masked client-side frame.
pub fn masked_frame(op: u8, mask: [u8; 4], payload: &[u8]) -> Vec<u8> {
    masked_fragment(op, true, mask, payload)
}

/// Build a masked client-side frame with an explicit FIN bit.
pub fn masked_fragment(op: u8, fin: bool, mask: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let fin_bit = if fin { 0x80 } else { 0 };
    let mut frame = vec![fin_bit | op];
    match payload.len() {
        n if n <= 125 => frame.push(0x80 | n as u8),
        n if n <= 65535 => {
            frame.push(0x80 | 126);
            frame.extend((n as u16).to_be_bytes());
        }
        n => {
            frame.push(0x80 | 127);
            frame.extend((n as u64).to_be_bytes());
        }
    }
    frame.extend(mask);
    frame.extend(
        payload
            .iter()
            .enumerate()
            .map(|(idx, byte)| byte ^ mask[idx % 4]),
    );
    frame
}

/// Wire encoding of `Hello{id, name}`.
pub fn encode_hello(id: i32, name: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x00];
    bytes.extend(id.to_le_bytes());
    bytes.extend((name.len() as u16).to_le_bytes());
    bytes.extend(name);
    bytes
}

/// Wire encoding of `Goodbye{id}`.
pub fn encode_goodbye(id: i32) -> Vec<u8> {
    let mut bytes = vec![0x01];
    bytes.extend(id.to_le_bytes());
    bytes
}

/// Wire encoding of `Send{id, command}`.
pub fn encode_send(id: i32, command: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0x02];
    bytes.extend(id.to_le_bytes());
    bytes.extend((command.len() as u16).to_le_bytes());
    bytes.extend(command);
    bytes
}

pub async fn read_exactly(stream: &mut TcpStream, buf: &mut [u8]) {
    timeout(IO_TIMEOUT, stream.read_exact(buf))
        .await
        .expect("read timed out")
        .expect("read failed");
}

/// The peer should close the connection without sending anything further.
pub async fn expect_eof(stream: &mut TcpStream) {
    let mut byte = [0u8; 1];
    let n = timeout(IO_TIMEOUT, stream.read(&mut byte))
        .await
        .expect("expected EOF, read timed out")
        .expect("expected EOF, got error");
    assert_eq!(n, 0, "expected EOF, got data: {byte:?}");
}
