//! Splitting content that does not fit one memo, and putting it back together.

use crate::constants::{MAX_MESSAGE_SIZE, MEMO_SIZE};
use crate::error::ZmailError;
use crate::memo::{self, DecodedMemo};
use crate::types::MessageType;

/// Smallest chunk size that can always hold one UTF-8 scalar.
const MIN_CAPACITY: usize = 4;

/// Cuts content into chunks of at most `capacity` bytes on `char` boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSplitter {
    capacity: usize,
}

impl Default for MessageSplitter {
    fn default() -> Self {
        Self {
            capacity: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageSplitter {
    /// Splitter with a custom chunk size. Values below 4 bytes are raised to 4
    /// so every chunk can hold at least one character.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_CAPACITY),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether `content` needs more than one chunk.
    pub fn needs_split(&self, content: &str) -> bool {
        content.len() > self.capacity
    }

    /// Ordered chunks of `content`, each at most `capacity` bytes.
    ///
    /// Empty content yields no chunks.
    pub fn split_message<'a>(&self, content: &'a str) -> Vec<&'a str> {
        let mut parts = Vec::with_capacity(content.len().div_ceil(self.capacity));
        let mut rest = content;
        while !rest.is_empty() {
            let mut cut = self.capacity.min(rest.len());
            while !rest.is_char_boundary(cut) {
                cut -= 1;
            }
            let (head, tail) = rest.split_at(cut);
            parts.push(head);
            rest = tail;
        }
        parts
    }

    /// Number of chunks [`split_message`](Self::split_message) produces.
    pub fn parts_count(&self, content: &str) -> usize {
        if content.is_ascii() {
            content.len().div_ceil(self.capacity)
        } else {
            self.split_message(content).len()
        }
    }

    /// Split `content` and encode every chunk into a plaintext frame.
    ///
    /// Part 0 is tagged `Text`, the rest `Continuation`; the sequence number is
    /// the part index. All frames carry the same timestamp.
    pub fn encode_parts(&self, content: &str) -> Result<Vec<[u8; MEMO_SIZE]>, ZmailError> {
        let timestamp = memo::unix_now();
        self.split_message(content)
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let sequence = part_sequence(index)?;
                let message_type = MessageType::for_part(index);
                memo::encode_at(chunk.as_bytes(), message_type, sequence, timestamp)
            })
            .collect()
    }
}

/// Sequence number for part `index`, failing once the two-byte field overflows.
pub fn part_sequence(index: usize) -> Result<u16, ZmailError> {
    u16::try_from(index)
        .map_err(|_| ZmailError::InvalidMessage(format!("part index {index} exceeds u16")))
}

/// Reassemble decoded frames into the original text.
///
/// Frames may arrive in any order. Sequences must form the contiguous run
/// `0..n`; gaps and duplicates are rejected.
pub fn combine_parts(frames: &[DecodedMemo]) -> Result<String, ZmailError> {
    let parts = frames
        .iter()
        .map(|frame| Ok((frame.sequence, frame.content()?)))
        .collect::<Result<Vec<_>, ZmailError>>()?;
    combine_sequenced(parts)
}

/// Join `(sequence, chunk)` pairs after checking they form `0..n`.
pub fn combine_sequenced(mut parts: Vec<(u16, String)>) -> Result<String, ZmailError> {
    if parts.is_empty() {
        return Err(ZmailError::InvalidMessage("no parts to combine".into()));
    }
    parts.sort_by_key(|(sequence, _)| *sequence);

    for (expected, (sequence, _)) in parts.iter().enumerate() {
        if usize::from(*sequence) != expected {
            return Err(ZmailError::InvalidMessage(format!(
                "expected part {expected}, found part {sequence}"
            )));
        }
    }

    Ok(parts.into_iter().map(|(_, chunk)| chunk).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decoded(frames: &[[u8; MEMO_SIZE]]) -> Vec<DecodedMemo> {
        frames.iter().map(|f| memo::decode(f).unwrap()).collect()
    }

    #[test]
    fn thousand_bytes_split_into_two() {
        let splitter = MessageSplitter::default();
        let content = "a".repeat(1000);
        assert!(splitter.needs_split(&content));
        assert_eq!(splitter.parts_count(&content), 2);

        let frames = splitter.encode_parts(&content).unwrap();
        assert_eq!(frames.len(), 2);
        let parts = decoded(&frames);
        assert_eq!(parts[0].message_type, MessageType::Text);
        assert_eq!(parts[0].sequence, 0);
        assert_eq!(parts[0].content().unwrap().len(), 504);
        assert_eq!(parts[1].message_type, MessageType::Continuation);
        assert_eq!(parts[1].sequence, 1);
        assert_eq!(parts[1].content().unwrap().len(), 496);
        assert_eq!(parts[0].timestamp, parts[1].timestamp);
    }

    #[test]
    fn combine_accepts_reverse_order() {
        let content = "b".repeat(1200);
        let frames = MessageSplitter::default().encode_parts(&content).unwrap();
        let mut parts = decoded(&frames);
        parts.reverse();
        assert_eq!(combine_parts(&parts).unwrap(), content);
    }

    #[test]
    fn short_content_is_single_part() {
        let splitter = MessageSplitter::default();
        assert!(!splitter.needs_split("hello"));
        assert_eq!(splitter.split_message("hello"), vec!["hello"]);
        assert_eq!(splitter.parts_count("hello"), 1);
    }

    #[test]
    fn empty_content_has_no_parts() {
        let splitter = MessageSplitter::default();
        assert!(splitter.split_message("").is_empty());
        assert_eq!(splitter.parts_count(""), 0);
    }

    #[test]
    fn multibyte_chars_never_cut() {
        // "é" is two bytes: a 5-byte capacity must cut after four bytes.
        let splitter = MessageSplitter::with_capacity(5);
        let parts = splitter.split_message("ééé");
        assert_eq!(parts, vec!["éé", "é"]);
    }

    #[test]
    fn tiny_capacity_is_raised() {
        let splitter = MessageSplitter::with_capacity(1);
        assert_eq!(splitter.capacity(), 4);
        assert_eq!(splitter.split_message("🦀🦀"), vec!["🦀", "🦀"]);
    }

    #[test]
    fn combine_rejects_gap() {
        let parts = vec![(0, "a".to_string()), (2, "c".to_string())];
        assert!(matches!(combine_sequenced(parts), Err(ZmailError::InvalidMessage(_))));
    }

    #[test]
    fn combine_rejects_duplicate() {
        let parts = vec![(0, "a".to_string()), (0, "a".to_string()), (1, "b".to_string())];
        assert!(matches!(combine_sequenced(parts), Err(ZmailError::InvalidMessage(_))));
    }

    #[test]
    fn combine_rejects_missing_first_part() {
        let parts = vec![(1, "b".to_string())];
        assert!(matches!(combine_sequenced(parts), Err(ZmailError::InvalidMessage(_))));
    }

    #[test]
    fn combine_rejects_empty() {
        assert!(combine_parts(&[]).is_err());
    }

    #[test]
    fn sequence_overflow_detected() {
        assert_eq!(part_sequence(65_535).unwrap(), u16::MAX);
        assert!(part_sequence(65_536).is_err());
    }

    proptest! {
        #[test]
        fn split_then_join_is_identity(content in "\\PC{0,600}", capacity in 4usize..600) {
            let splitter = MessageSplitter::with_capacity(capacity);
            let parts = splitter.split_message(&content);
            prop_assert!(parts.iter().all(|p| p.len() <= capacity && !p.is_empty()));
            prop_assert_eq!(parts.len(), splitter.parts_count(&content));
            prop_assert_eq!(parts.concat(), content);
        }

        #[test]
        fn frames_combine_to_original(content in "[a-z ]{1,2000}") {
            let frames = MessageSplitter::default().encode_parts(&content).unwrap();
            prop_assert_eq!(combine_parts(&decoded(&frames)).unwrap(), content);
        }
    }
}
