//! HTTP/1.1 upgrade validation for the upstream listener.
//!
//! The request is validated line by line as the peer produces it: the request
//! line must be exactly `GET / HTTP/1.1`, and the five recognized headers
//! (`Host`, `Upgrade`, `Connection`, `Sec-WebSocket-Key`,
//! `Sec-WebSocket-Version`) must all be present by the time the blank
//! terminator line arrives. Unrecognized headers are skipped; duplicates of
//! recognized headers are silently ignored.

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// RFC 6455 §1.3 key-derivation suffix.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A refused upgrade. `status`/`reason` become the HTTP response line;
/// `detail` names the actual cause for the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReject {
    pub status: u16,
    pub reason: &'static str,
    pub detail: &'static str,
}

impl HandshakeReject {
    fn bad_request(detail: &'static str) -> Self {
        Self {
            status: 400,
            reason: "Bad Request",
            detail,
        }
    }

    /// A line filled the receive buffer without terminating.
    pub fn line_too_long() -> Self {
        Self::bad_request("line too long")
    }

    /// The response to write before closing. No body, no trailing blank line.
    pub fn response(&self) -> String {
        format!("HTTP/1.1 {} {}\r\n", self.status, self.reason)
    }
}

/// Outcome of offering one complete line.
#[derive(Debug)]
pub enum Progress {
    /// More lines are needed.
    Pending,
    /// The request is valid; reply with [`switching_protocols`].
    Complete { accept: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
}

/// Progressive validator for the upgrade request.
pub struct HandshakeParser {
    state: State,
    key: Option<Vec<u8>>,
    seen_host: bool,
    seen_upgrade: bool,
    seen_connection: bool,
    seen_version: bool,
}

impl Default for HandshakeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeParser {
    pub fn new() -> Self {
        Self {
            state: State::RequestLine,
            key: None,
            seen_host: false,
            seen_upgrade: false,
            seen_connection: false,
            seen_version: false,
        }
    }

    /// Offer one line, without its CRLF terminator.
    pub fn offer_line(&mut self, line: &[u8]) -> Result<Progress, HandshakeReject> {
        match self.state {
            State::RequestLine => {
                self.check_request_line(line)?;
                self.state = State::Headers;
                Ok(Progress::Pending)
            }
            State::Headers if line.is_empty() => self.finish(),
            State::Headers => {
                self.check_header_line(line)?;
                Ok(Progress::Pending)
            }
        }
    }

    fn check_request_line(&self, line: &[u8]) -> Result<(), HandshakeReject> {
        let mut parts = line.split(|byte| *byte == b' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next())
        {
            (Some(method), Some(path), Some(version), None) => (method, path, version),
            _ => return Err(HandshakeReject::bad_request("malformed request line")),
        };
        if method != b"GET" {
            return Err(HandshakeReject {
                status: 405,
                reason: "Method Not Allowed",
                detail: "method",
            });
        }
        if path != b"/" {
            return Err(HandshakeReject {
                status: 404,
                reason: "Not Found",
                detail: "path",
            });
        }
        if version != b"HTTP/1.1" {
            return Err(HandshakeReject::bad_request("http version"));
        }
        Ok(())
    }

    fn check_header_line(&mut self, line: &[u8]) -> Result<(), HandshakeReject> {
        if matches!(line.first(), Some(b' ') | Some(b'\t')) {
            return Err(HandshakeReject {
                status: 501,
                reason: "Not Implemented",
                detail: "header folding unsupported",
            });
        }
        let colon = line
            .iter()
            .position(|byte| *byte == b':')
            .ok_or_else(|| HandshakeReject::bad_request("header missing colon"))?;
        let name = &line[..colon];
        let value = trim_ascii(&line[colon + 1..]);

        if name.eq_ignore_ascii_case(b"host") {
            self.seen_host = true;
        } else if name.eq_ignore_ascii_case(b"upgrade") {
            if self.seen_upgrade {
                return Ok(());
            }
            if !list_contains_token(value, b"websocket") {
                return Err(HandshakeReject::bad_request("upgrade header lacks websocket"));
            }
            self.seen_upgrade = true;
        } else if name.eq_ignore_ascii_case(b"connection") {
            if self.seen_connection {
                return Ok(());
            }
            if !list_contains_token(value, b"upgrade") {
                return Err(HandshakeReject::bad_request("connection header lacks upgrade"));
            }
            self.seen_connection = true;
        } else if name.eq_ignore_ascii_case(b"sec-websocket-key") {
            // Stored verbatim; length/contents are not validated.
            if self.key.is_none() {
                self.key = Some(value.to_vec());
            }
        } else if name.eq_ignore_ascii_case(b"sec-websocket-version") {
            if self.seen_version {
                return Ok(());
            }
            if value != b"13" {
                return Err(HandshakeReject::bad_request("unsupported websocket version"));
            }
            self.seen_version = true;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<Progress, HandshakeReject> {
        let all_present = self.seen_host
            && self.seen_upgrade
            && self.seen_connection
            && self.seen_version
            && self.key.is_some();
        if !all_present {
            return Err(HandshakeReject::bad_request("missing required header"));
        }
        let key = self.key.take().unwrap_or_default();
        Ok(Progress::Complete {
            accept: accept_key(&key),
        })
    }
}

/// `b64(SHA-1(key || GUID))`.
pub fn accept_key(key: &[u8]) -> String {
    let mut sha = Sha1::new();
    sha.update(key);
    sha.update(WS_GUID.as_bytes());
    BASE64_STANDARD.encode(sha.finalize())
}

/// The full 101 response for a computed accept value.
pub fn switching_protocols(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\
         \r\n"
    )
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|byte| !byte.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}

/// Comma-separated token list membership: surrounding whitespace is ignored,
/// tokens containing interior whitespace never match, comparison is
/// case-insensitive.
fn list_contains_token(value: &[u8], token: &[u8]) -> bool {
    value.split(|byte| *byte == b',').any(|item| {
        let item = trim_ascii(item);
        !item.is_empty()
            && !item.iter().any(|byte| byte.is_ascii_whitespace())
            && item.eq_ignore_ascii_case(token)
    })
}
