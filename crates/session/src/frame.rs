//! Length-prefixed JSON framing used on the stimulus socket.
//!
//! Layout of one frame:
//! 1. a 2-byte big-endian length of the JSON header,
//! 2. the JSON header (`byteorder`, `content-type`, `content-encoding`, `content-length`),
//! 3. `content-length` bytes of message body.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROTOHEADER_LEN: usize = 2;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame header is not valid json: {0}")]
    Header(#[from] serde_json::Error),
    #[error("frame header of {0} bytes does not fit the 2-byte length prefix")]
    HeaderTooLarge(usize),
    #[error("unsupported content encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("frame body is not valid utf-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FrameHeader {
    byteorder: String,
    #[serde(rename = "content-type")]
    content_type: String,
    #[serde(rename = "content-encoding")]
    content_encoding: String,
    #[serde(rename = "content-length")]
    content_length: usize,
}

pub fn encode_frame(body: &str) -> Result<Vec<u8>, FrameError> {
    let header = FrameHeader {
        byteorder: "little".into(),
        content_type: "text/json".into(),
        content_encoding: "utf-8".into(),
        content_length: body.len(),
    };
    let header = serde_json::to_vec(&header)?;
    let header_len =
        u16::try_from(header.len()).map_err(|_| FrameError::HeaderTooLarge(header.len()))?;

    let mut frame = Vec::with_capacity(PROTOHEADER_LEN + header.len() + body.len());
    frame.extend_from_slice(&header_len.to_be_bytes());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(body.as_bytes());
    Ok(frame)
}

/// Incremental decoder; bytes may be pushed in arbitrary chunks and several
/// frames may arrive merged in a single read.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    header_len: Option<usize>,
    header: Option<FrameHeader>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete body, or `None` if more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        if self.header_len.is_none() {
            if self.buffer.len() < PROTOHEADER_LEN {
                return Ok(None);
            }
            let len = u16::from_be_bytes([self.buffer[0], self.buffer[1]]) as usize;
            self.buffer.drain(..PROTOHEADER_LEN);
            self.header_len = Some(len);
        }

        if self.header.is_none() {
            let Some(len) = self.header_len else {
                return Ok(None);
            };
            if self.buffer.len() < len {
                return Ok(None);
            }
            let header: FrameHeader = serde_json::from_slice(&self.buffer[..len])?;
            self.buffer.drain(..len);
            self.header = Some(header);
        }

        let Some(header) = self.header.as_ref() else {
            return Ok(None);
        };
        if self.buffer.len() < header.content_length {
            return Ok(None);
        }

        let body: Vec<u8> = self.buffer.drain(..header.content_length).collect();
        let encoding = header.content_encoding.to_ascii_lowercase();
        self.header_len = None;
        self.header = None;

        match encoding.as_str() {
            "utf-8" | "utf8" | "ascii" => String::from_utf8(body)
                .map(Some)
                .map_err(|_| FrameError::InvalidUtf8),
            other => Err(FrameError::UnsupportedEncoding(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
