//! Frame opcodes.

/// Defines how to interpret the payload data.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpCode {
    /// Continuation of a previous frame. Wire-level only: the parser
    /// reassembles fragments and never delivers this.
    Continuation = 0x0,
    /// UTF-8 text.
    Text = 0x1,
    /// Opaque bytes.
    Binary = 0x2,
    /// Connection is closed.
    Close = 0x8,
    /// Test reachability.
    Ping = 0x9,
    /// Response to a ping frame.
    Pong = 0xA,
}

impl OpCode {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}
