//! # zmail-core
//! Memo framing, message crypto, and collaborator traits for zMail.
//!
//! # Modules
//!
//! - [`constants`]: wire sizes, magic bytes, and protocol defaults
//! - [`error`]: `ZmailError` taxonomy and `RpcError`
//! - [`types`]: data model shared across crates
//! - [`traits`]: external collaborator interfaces (RPC, wallet node, store)
//! - [`cancel`]: cancellation token for long-running polling loops
//! - [`memo`]: fixed 512-byte memo frame codec
//! - [`split`]: splitting oversized content into frames and recombining it
//! - [`crypto`]: X25519 + XChaCha20-Poly1305 message envelopes

pub mod cancel;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod memo;
pub mod split;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use crypto::{EncryptedEnvelope, EncryptionKeypair, PublicKey, SecretKey};
pub use error::{RpcError, TxFailureKind, ZmailError};
pub use memo::{DecodedMemo, MemoBytes};
pub use split::MessageSplitter;
pub use types::{MessageType, ProviderType, RpcCapabilities, SpendingKey};
