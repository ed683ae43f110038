//! Fixed 512-byte memo frame codec.
//!
//! # Wire format
//! ```text
//! offset 0     version      (1 byte)
//! offset 1     message type (1 byte: 1=text, 2=continuation, 3=receipt)
//! offset 2-3   sequence     (u16 big-endian)
//! offset 4-7   timestamp    (u32 big-endian, unix seconds)
//! offset 8-511 payload      (504 bytes, zero-padded)
//! ```
//!
//! Text content ends at the first zero byte of the payload. Binary payloads
//! (encrypted envelopes) carry their own length prefix instead and must be
//! read from [`DecodedMemo::payload`] directly.

use crate::constants::{MAX_MESSAGE_SIZE, MEMO_HEADER_SIZE, MEMO_SIZE, MEMO_VERSION};
use crate::error::ZmailError;
use crate::types::MessageType;

/// One encoded memo frame.
pub type MemoBytes = [u8; MEMO_SIZE];

/// Logical fields of a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMemo {
    pub version: u8,
    pub message_type: MessageType,
    pub sequence: u16,
    /// Unix seconds at encode time.
    pub timestamp: u32,
    /// Full 504-byte payload including zero padding.
    pub payload: Vec<u8>,
}

impl DecodedMemo {
    /// Text content of the payload (see [`extract_content`]).
    pub fn content(&self) -> Result<String, ZmailError> {
        extract_content(&self.payload)
    }
}

/// Encode `content` into a frame stamped with the current time.
pub fn encode(
    content: &[u8],
    message_type: MessageType,
    sequence: u16,
) -> Result<MemoBytes, ZmailError> {
    encode_at(content, message_type, sequence, unix_now())
}

/// Encode `content` into a frame with an explicit timestamp.
///
/// Fails with [`ZmailError::MessageTooLong`] when `content` exceeds the
/// 504-byte payload.
pub fn encode_at(
    content: &[u8],
    message_type: MessageType,
    sequence: u16,
    timestamp: u32,
) -> Result<MemoBytes, ZmailError> {
    if content.len() > MAX_MESSAGE_SIZE {
        return Err(ZmailError::MessageTooLong {
            size: content.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut frame = [0u8; MEMO_SIZE];
    frame[0] = MEMO_VERSION;
    frame[1] = message_type.code();
    frame[2..4].copy_from_slice(&sequence.to_be_bytes());
    frame[4..8].copy_from_slice(&timestamp.to_be_bytes());
    frame[MEMO_HEADER_SIZE..MEMO_HEADER_SIZE + content.len()].copy_from_slice(content);
    Ok(frame)
}

/// Decode a frame into its logical fields.
pub fn decode(frame: &[u8]) -> Result<DecodedMemo, ZmailError> {
    if frame.len() != MEMO_SIZE {
        return Err(ZmailError::InvalidMessage(format!(
            "memo must be {MEMO_SIZE} bytes, got {}",
            frame.len()
        )));
    }
    if frame[0] != MEMO_VERSION {
        return Err(ZmailError::InvalidMessage(format!(
            "unsupported memo version {}",
            frame[0]
        )));
    }
    let message_type = MessageType::from_code(frame[1]).ok_or_else(|| {
        ZmailError::InvalidMessage(format!("unknown message type {}", frame[1]))
    })?;

    Ok(DecodedMemo {
        version: frame[0],
        message_type,
        sequence: u16::from_be_bytes([frame[2], frame[3]]),
        timestamp: u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]),
        payload: frame[MEMO_HEADER_SIZE..].to_vec(),
    })
}

/// Text content of a payload: everything before the first zero byte (or the
/// whole payload if there is none), decoded as UTF-8.
pub fn extract_content(payload: &[u8]) -> Result<String, ZmailError> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    String::from_utf8(payload[..end].to_vec())
        .map_err(|e| ZmailError::InvalidMessage(format!("payload is not UTF-8: {e}")))
}

/// Cheap structural check used to filter memos while scanning.
pub fn validate(frame: &[u8]) -> bool {
    frame.len() == MEMO_SIZE
        && frame[0] == MEMO_VERSION
        && MessageType::from_code(frame[1]).is_some()
}

pub(crate) fn unix_now() -> u32 {
    u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(u32::MAX)
}
