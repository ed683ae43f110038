//! Data model shared across the zMail crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Frame type carried in byte 1 of every memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// First (or only) part of a message.
    Text = 1,
    /// Any part after the first.
    Continuation = 2,
    /// Delivery acknowledgement.
    Receipt = 3,
}

impl MessageType {
    /// Wire code for this type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire code. Returns `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Text),
            2 => Some(Self::Continuation),
            3 => Some(Self::Receipt),
            _ => None,
        }
    }

    /// Type assigned to part `index` of a split message.
    pub fn for_part(index: usize) -> Self {
        if index == 0 { Self::Text } else { Self::Continuation }
    }
}

/// Soft classification of an RPC provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Loopback node under the user's control.
    Local,
    /// Known public provider.
    Public,
    /// Anything else.
    #[default]
    Unknown,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Public => f.write_str("public"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

/// What an RPC endpoint can do for us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RpcCapabilities {
    pub supports_wallet_methods: bool,
    pub supports_z_send_many: bool,
    pub supports_z_import_key: bool,
    pub supports_send_raw_transaction: bool,
    pub is_local_node: bool,
    pub provider_type: ProviderType,
}

impl RpcCapabilities {
    /// Both methods the wallet-RPC send path needs.
    pub fn supports_wallet_send(&self) -> bool {
        self.supports_z_send_many && self.supports_z_import_key
    }

    /// Names of the capabilities that are absent, for error messages.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.supports_z_send_many {
            missing.push("z_sendmany");
        }
        if !self.supports_z_import_key {
            missing.push("z_importkey");
        }
        if !self.supports_send_raw_transaction {
            missing.push("sendrawtransaction");
        }
        missing
    }
}

/// Encoded shielded spending key.
///
/// The key string is zeroized on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SpendingKey(String);

impl SpendingKey {
    /// Wrap an encoded spending key.
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// The encoded key. Handle with care.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the key string is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SpendingKey").field(&"[REDACTED]").finish()
    }
}

/// A spendable shielded note owned by the wallet node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldedNote {
    /// Value in zatoshis.
    pub value: u64,
    pub nullifier: [u8; 32],
    pub rho: [u8; 32],
    /// Recipient note commitment.
    pub recipient: [u8; 32],
}

/// Merkle-path material proving a note's membership in the commitment tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalWitness {
    pub position: u64,
    /// Sibling hashes from leaf to root.
    pub path: Vec<[u8; 32]>,
    /// Partially filled subtree to the right of the note, if any.
    pub cursor: Option<Vec<[u8; 32]>>,
}

/// A shielded output received by an address, as listed by the wallet node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedOutput {
    pub txid: String,
    /// Mined height, `None` while in the mempool.
    pub height: Option<u64>,
    /// Output index within the transaction.
    pub output_index: u32,
    /// Value in zatoshis.
    pub amount: u64,
    /// Raw memo bytes (normally 512).
    pub memo: Vec<u8>,
}

/// Async send operation state as reported by the wallet node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Queued,
    Executing,
    Success { txid: String },
    Failed { message: String },
    /// The node does not know the operation (yet).
    Missing,
}

impl OperationStatus {
    /// Whether polling can stop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failed { .. })
    }
}

/// Confirmation status of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub txid: String,
    pub confirmations: u64,
    pub height: Option<u64>,
}

/// One shielded payment request handed to the wallet node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldedSend {
    pub from: String,
    pub to: String,
    /// Value in zatoshis.
    pub amount: u64,
    pub memo: [u8; crate::constants::MEMO_SIZE],
    /// Fee in zatoshis.
    pub fee: u64,
}

/// Result of dispatching a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub txid: String,
    /// Wallet operation id when the async wallet path was used.
    pub operation_id: Option<String>,
}
