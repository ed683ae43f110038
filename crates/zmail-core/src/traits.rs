//! Trait interfaces for zMail's external collaborators.
//!
//! These traits define the contracts between crates and the outside world:
//! - [`RpcTransport`]: positional JSON-RPC `call(method, params)`, implemented over HTTP
//!   in zmail-rpc
//! - [`WalletNode`]: shielded send, broadcast, and lookup surface of a node
//! - [`NoteSource`]: notes and witnesses for client-side transaction building
//! - [`KeyValueStore`]: record persistence by id

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{RpcError, ZmailError};
use crate::types::{
    IncrementalWitness, OperationStatus, ReceivedOutput, ShieldedNote, ShieldedSend, SpendingKey,
    TransactionInfo,
};

/// A JSON-RPC style transport bound to one endpoint.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Endpoint URL this transport talks to. Used as the capability cache key.
    fn endpoint(&self) -> &str;

    /// Invoke `method` with positional `params`.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// Wallet-node surface used for dispatch, scanning, and confirmation tracking.
///
/// Implemented by `zmail-rpc` on top of an [`RpcTransport`].
#[async_trait]
pub trait WalletNode: Send + Sync {
    /// Import a spending key into the node wallet. Importing a key the node
    /// already holds may return an error the caller is expected to tolerate.
    async fn import_key(&self, spending_key: &SpendingKey) -> Result<(), RpcError>;

    /// Submit an async shielded send. Returns the operation id.
    async fn send_shielded(&self, request: &ShieldedSend) -> Result<String, RpcError>;

    /// Status of a previously submitted operation.
    async fn operation_status(&self, operation_id: &str) -> Result<OperationStatus, RpcError>;

    /// Broadcast a hex-encoded raw transaction. Returns the txid.
    async fn broadcast_raw(&self, raw_hex: &str) -> Result<String, RpcError>;

    /// All shielded outputs received by `address`.
    async fn list_received(&self, address: &str) -> Result<Vec<ReceivedOutput>, RpcError>;

    /// Look up a transaction by id.
    async fn get_transaction(&self, txid: &str) -> Result<TransactionInfo, RpcError>;

    /// Confirmed shielded balance of `address` in zatoshis.
    async fn balance(&self, address: &str) -> Result<u64, RpcError>;
}

/// Pull interface over notes and witnesses owned by the wallet node.
#[async_trait]
pub trait NoteSource: Send + Sync {
    /// Unspent notes for `address`.
    async fn get_utxos(&self, address: &str) -> Result<Vec<ShieldedNote>, RpcError>;

    /// Witness for `note` at the current anchor.
    async fn get_witness(&self, note: &ShieldedNote) -> Result<IncrementalWitness, RpcError>;

    /// Height of the commitment tree anchor witnesses are computed against.
    async fn get_anchor_height(&self) -> Result<u64, RpcError>;
}

/// Record persistence by id. The storage engine is an external concern.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `id`.
    fn get(&self, id: &str) -> Result<Option<Vec<u8>>, ZmailError>;

    /// Store `value` under `id`, replacing any previous value.
    fn put(&self, id: &str, value: &[u8]) -> Result<(), ZmailError>;

    /// Remove `id`. Removing a missing id is not an error.
    fn delete(&self, id: &str) -> Result<(), ZmailError>;
}
