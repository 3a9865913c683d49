//! Broker command codec (panic-free).
//!
//! Commands travel inside WebSocket Binary frames. All integers are
//! little-endian; bodies carry a 16-bit length prefix.
//!
//! | opcode | layout |
//! |---|---|
//! | Hello (0x00)   | `0x00  id:i32 LE  len:u16 LE  name[len]` |
//! | Goodbye (0x01) | `0x01  id:i32 LE` |
//! | Send (0x02)    | `0x02  id:i32 LE  len:u16 LE  command[len]` |
//!
//! Parsing rules:
//! - Never index (`buf[0]`) — always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use bytes::{Buf, BufMut};

use crate::error::{Result, TabmuxError};

pub const OP_HELLO: u8 = 0x00;
pub const OP_GOODBYE: u8 = 0x01;
pub const OP_SEND: u8 = 0x02;

/// Largest body the 16-bit length prefix can describe.
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Bytes taken by opcode + id + length prefix.
pub const BODY_HEADER_LEN: usize = 7;
/// Encoded size of a Goodbye (opcode + id).
pub const GOODBYE_LEN: usize = 5;

/// A decoded broker command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCommand {
    /// A client finished its HELLO exchange and was assigned `id`.
    Hello { id: i32, name: Vec<u8> },
    /// The client with `id` went away.
    Goodbye { id: i32 },
    /// Payload bytes for (or from) the client with `id`.
    Send { id: i32, command: Vec<u8> },
}

impl BrokerCommand {
    /// Exact encoded size of this command.
    pub fn encoded_len(&self) -> usize {
        match self {
            BrokerCommand::Hello { name, .. } => BODY_HEADER_LEN + name.len(),
            BrokerCommand::Goodbye { .. } => GOODBYE_LEN,
            BrokerCommand::Send { command, .. } => BODY_HEADER_LEN + command.len(),
        }
    }

    pub fn encode_into(&self, dst: &mut Vec<u8>) {
        match self {
            BrokerCommand::Hello { id, name } => encode_hello_into(*id, name, dst),
            BrokerCommand::Goodbye { id } => encode_goodbye_into(*id, dst),
            BrokerCommand::Send { id, command } => encode_send_into(*id, command, dst),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut dst);
        dst
    }

    /// Decode one command from an exact frame payload.
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 1 {
            return Err(TabmuxError::InvalidCommand("empty payload"));
        }
        match buf.get_u8() {
            OP_HELLO => {
                let (id, body) = decode_body(buf)?;
                Ok(BrokerCommand::Hello { id, name: body })
            }
            OP_GOODBYE => {
                if buf.remaining() < GOODBYE_LEN - 1 {
                    return Err(TabmuxError::InvalidCommand("goodbye too short"));
                }
                Ok(BrokerCommand::Goodbye { id: buf.get_i32_le() })
            }
            OP_SEND => {
                let (id, body) = decode_body(buf)?;
                Ok(BrokerCommand::Send { id, command: body })
            }
            _ => Err(TabmuxError::InvalidCommand("unknown opcode")),
        }
    }
}

pub fn encode_hello_into(id: i32, name: &[u8], dst: &mut Vec<u8>) {
    debug_assert!(name.len() <= MAX_BODY_LEN);
    dst.put_u8(OP_HELLO);
    dst.put_i32_le(id);
    dst.put_u16_le(name.len() as u16);
    dst.put_slice(name);
}

pub fn encode_goodbye_into(id: i32, dst: &mut Vec<u8>) {
    dst.put_u8(OP_GOODBYE);
    dst.put_i32_le(id);
}

pub fn encode_send_into(id: i32, command: &[u8], dst: &mut Vec<u8>) {
    debug_assert!(command.len() <= MAX_BODY_LEN);
    dst.put_u8(OP_SEND);
    dst.put_i32_le(id);
    dst.put_u16_le(command.len() as u16);
    dst.put_slice(command);
}

fn decode_body(mut buf: &[u8]) -> Result<(i32, Vec<u8>)> {
    if buf.remaining() < BODY_HEADER_LEN - 1 {
        return Err(TabmuxError::InvalidCommand("truncated header"));
    }
    let id = buf.get_i32_le();
    let len = buf.get_u16_le() as usize;
    let body = buf
        .get(..len)
        .ok_or(TabmuxError::InvalidCommand("declared length exceeds payload"))?;
    Ok((id, body.to_vec()))
}
