//! Proof construction collaborators.
//!
//! Producing real zero-knowledge proofs needs the chain's proving parameters
//! and circuit code, which live outside this workspace. A
//! [`TransactionProver`] turns a validated [`TransactionPlan`] into raw
//! transaction bytes.

use async_trait::async_trait;

use crate::builder::TransactionPlan;
use crate::error::WalletError;

/// A fully built transaction ready to broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenTransaction {
    /// Serialized transaction.
    pub raw: Vec<u8>,
    /// Transaction id, when the prover computed one.
    pub txid: Option<String>,
}

impl ProvenTransaction {
    /// Hex encoding expected by `sendrawtransaction`.
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// Turns a [`TransactionPlan`] into a raw transaction.
#[async_trait]
pub trait TransactionProver: Send + Sync {
    async fn prove(&self, plan: &TransactionPlan) -> Result<ProvenTransaction, WalletError>;
}

/// Prover used when no proving backend is configured. Always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableProver;

#[async_trait]
impl TransactionProver for UnavailableProver {
    async fn prove(&self, _plan: &TransactionPlan) -> Result<ProvenTransaction, WalletError> {
        Err(WalletError::ProverUnavailable(
            "shielded transaction building is not implemented without proving parameters".into(),
        ))
    }
}
