//! Protocol constants. All monetary values in zatoshis (1 ZEC = 10^8 zatoshis).

/// Smallest units per whole coin.
pub const COIN: u64 = 100_000_000;

/// Total size of a shielded output memo field in bytes.
pub const MEMO_SIZE: usize = 512;

/// Size of the frame header: version, type, sequence, timestamp.
pub const MEMO_HEADER_SIZE: usize = 8;

/// Payload capacity of one memo frame.
pub const MAX_MESSAGE_SIZE: usize = MEMO_SIZE - MEMO_HEADER_SIZE;

/// Current memo frame version.
pub const MEMO_VERSION: u8 = 1;

/// Envelope marker: "ZM".
pub const ENVELOPE_MAGIC: [u8; 2] = [0x5A, 0x4D];

/// Current envelope layout version.
pub const ENVELOPE_VERSION: u8 = 0x01;

/// XChaCha20-Poly1305 nonce length.
pub const NONCE_LEN: usize = 24;

/// X25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Envelope MAC length (BLAKE3 keyed hash).
pub const MAC_LEN: usize = 32;

/// Poly1305 tag appended to every ciphertext.
pub const AEAD_TAG_LEN: usize = 16;

/// Bytes preceding the ciphertext in an encoded envelope:
/// magic (2) + version (1) + nonce (24) + ephemeral key (32) + MAC (32) + length (2).
pub const ENVELOPE_HEADER_LEN: usize = 2 + 1 + NONCE_LEN + PUBLIC_KEY_LEN + MAC_LEN + 2;

/// Largest ciphertext that still fits a single frame payload.
pub const MAX_CIPHERTEXT_LEN: usize = MAX_MESSAGE_SIZE - ENVELOPE_HEADER_LEN;

/// Largest plaintext chunk whose ciphertext fits a single frame payload.
pub const MAX_ENCRYPTED_PLAINTEXT_LEN: usize = MAX_CIPHERTEXT_LEN - AEAD_TAG_LEN;

/// Sequence numbers are two bytes, which bounds the number of parts.
pub const MAX_MESSAGE_PARTS: usize = u16::MAX as usize + 1;

/// Default transaction fee (ZIP-317 minimum for a two-action shielded send).
pub const DEFAULT_FEE: u64 = 10_000;

/// Default value carried by each message transaction.
pub const DEFAULT_MESSAGE_AMOUNT: u64 = 10_000;

/// Default JSON-RPC port of a local full node.
pub const DEFAULT_RPC_PORT: u16 = 8232;

/// Interval between async operation status polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Upper bound on waiting for an async send operation.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300;

/// Interval between confirmation count polls.
pub const DEFAULT_CONFIRMATION_INTERVAL_SECS: u64 = 10;

/// Upper bound on waiting for confirmations.
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 30 * 60;

/// Pause between dispatching consecutive parts of a multi-part message.
pub const DEFAULT_INTER_PART_DELAY_MS: u64 = 1_500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_sizes() {
        assert_eq!(MAX_MESSAGE_SIZE, 504);
        assert_eq!(MEMO_HEADER_SIZE + MAX_MESSAGE_SIZE, MEMO_SIZE);
    }

    #[test]
    fn envelope_layout_sizes() {
        assert_eq!(ENVELOPE_HEADER_LEN, 93);
        assert_eq!(MAX_CIPHERTEXT_LEN, 411);
        assert_eq!(MAX_ENCRYPTED_PLAINTEXT_LEN, 395);
    }

    #[test]
    fn magic_spells_zm() {
        assert_eq!(&ENVELOPE_MAGIC, b"ZM");
    }
}
