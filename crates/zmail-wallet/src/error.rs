//! Wallet error types.

use std::path::PathBuf;

use thiserror::Error;
use zmail_core::error::{RpcError, TxFailureKind, ZmailError};

/// Errors that can occur while planning or proving a transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Selected notes cannot cover the amount plus fee.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Total value of the available notes in zatoshis.
        have: u64,
        /// Amount plus fee in zatoshis.
        need: u64,
    },

    /// Invalid monetary amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// No spending key was supplied.
    #[error("spending key is missing")]
    MissingSpendingKey,

    /// The transaction plan breaks a structural rule.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// The note source failed.
    #[error("note source: {0}")]
    Source(#[from] RpcError),

    /// No prover can produce proofs in this environment.
    #[error("prover unavailable: {0}")]
    ProverUnavailable(String),

    /// The proving parameter files were not found.
    #[error("proving parameters not found (checked {} locations)", checked.len())]
    ParamsNotFound {
        /// Every directory that was searched, in order.
        checked: Vec<PathBuf>,
    },

    /// The proof service could not be reached or answered unreadably.
    #[error("proof service: {0}")]
    ProofService(String),

    /// The proof service answered and declined to build the transaction.
    #[error("proof service refused (HTTP {status}): {message}")]
    ProofServiceRefused {
        /// HTTP status code of the answer.
        status: u16,
        /// The service's `error` field.
        message: String,
    },
}

impl From<WalletError> for ZmailError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::InsufficientFunds { have, need } => Self::InsufficientFunds { have, need },
            WalletError::InvalidAmount(msg) => Self::InvalidMessage(msg),
            WalletError::MissingSpendingKey => Self::InvalidKey("spending key is missing".into()),
            WalletError::InvalidPlan(msg) => Self::tx_failed(TxFailureKind::Malformed, msg),
            WalletError::Source(rpc) => rpc.into(),
            e @ (WalletError::ProverUnavailable(_) | WalletError::ParamsNotFound { .. }) => {
                Self::tx_failed(TxFailureKind::CapabilityMismatch, e.to_string())
            }
            WalletError::ProofService(msg) => Self::Network(format!("proof service: {msg}")),
            e @ WalletError::ProofServiceRefused { status: 501, .. } => {
                Self::tx_failed(TxFailureKind::CapabilityMismatch, e.to_string())
            }
            e @ WalletError::ProofServiceRefused { .. } => {
                Self::tx_failed(TxFailureKind::OperationFailed, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_insufficient_funds() {
        let e = WalletError::InsufficientFunds {
            have: 100,
            need: 200,
        };
        assert_eq!(e.to_string(), "insufficient funds: have 100, need 200");
    }

    #[test]
    fn display_params_not_found_counts_locations() {
        let e = WalletError::ParamsNotFound {
            checked: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        assert_eq!(e.to_string(), "proving parameters not found (checked 2 locations)");
    }

    #[test]
    fn from_rpc_error() {
        let wallet: WalletError = RpcError::Transport("refused".into()).into();
        assert_eq!(wallet, WalletError::Source(RpcError::Transport("refused".into())));
    }

    #[test]
    fn converts_into_zmail_error() {
        let e: ZmailError = WalletError::InsufficientFunds { have: 1, need: 2 }.into();
        assert_eq!(e, ZmailError::InsufficientFunds { have: 1, need: 2 });

        let e: ZmailError = WalletError::ProverUnavailable("no params".into()).into();
        assert!(matches!(
            e,
            ZmailError::TransactionFailed {
                kind: TxFailureKind::CapabilityMismatch,
                ..
            }
        ));
        assert!(!e.is_retryable());

    }

    #[test]
    fn proof_service_refusal_is_final() {
        let e: ZmailError = WalletError::ProofServiceRefused {
            status: 501,
            message: "Transaction building is being implemented".into(),
        }
        .into();
        assert!(matches!(
            e,
            ZmailError::TransactionFailed {
                kind: TxFailureKind::CapabilityMismatch,
                ..
            }
        ));
        assert!(!e.is_retryable());

        let e: ZmailError = WalletError::ProofServiceRefused {
            status: 400,
            message: "bad memo".into(),
        }
        .into();
        assert!(matches!(
            e,
            ZmailError::TransactionFailed {
                kind: TxFailureKind::OperationFailed,
                ..
            }
        ));
        assert!(!e.is_retryable());
    }

    #[test]
    fn proof_service_transport_failure_is_retryable() {
        let e: ZmailError = WalletError::ProofService("connection refused".into()).into();
        assert!(matches!(e, ZmailError::Network(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn note_source_errors_follow_rpc_mapping() {
        let e: ZmailError = WalletError::Source(RpcError::Transport("reset".into())).into();
        assert!(matches!(e, ZmailError::Network(_)));
        assert!(e.is_retryable());

        let remote = RpcError::Remote {
            code: -8,
            message: "bad address".into(),
        };
        let e: ZmailError = WalletError::Source(remote.clone()).into();
        assert_eq!(e, ZmailError::from(remote));
    }
}
