//! JSON test vector loader shared by the command/frame vector tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TestVector {
    pub description: String,
    pub frame: FrameData,
    #[serde(default)]
    pub expect: Option<serde_json::Value>,
    #[serde(default)]
    pub expect_error: Option<ExpectError>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectError {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FrameData {
    pub encoding: String,
    pub data: String,
}

impl FrameData {
    pub fn decode(&self) -> Vec<u8> {
        match self.encoding.as_str() {
            "hex" => hex::decode(&self.data).expect("invalid hex in test vector"),
            other => panic!("unsupported encoding: {other}"),
        }
    }
}
