//! Error types for zMail.
use std::fmt;

use thiserror::Error;

/// Why a transaction dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxFailureKind {
    /// The endpoint lacks every send path this client knows.
    CapabilityMismatch,
    /// The transaction (or a conflicting one) is already mined.
    AlreadyInChain,
    /// Inputs do not cover outputs plus fee.
    InsufficientFunds,
    /// Lock time or sequence not yet final.
    NonFinal,
    /// The provider could not parse the transaction.
    Malformed,
    /// An async wallet operation reached the `failed` state.
    OperationFailed,
    /// An async wallet operation did not finish in time.
    Timeout,
    /// Any other rejection.
    Rejected,
}

impl fmt::Display for TxFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CapabilityMismatch => "capability mismatch",
            Self::AlreadyInChain => "already in chain",
            Self::InsufficientFunds => "insufficient funds",
            Self::NonFinal => "non-final",
            Self::Malformed => "malformed",
            Self::OperationFailed => "operation failed",
            Self::Timeout => "timeout",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Failure talking to a JSON-RPC endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport: {0}")] Transport(String),
    #[error("rpc error {code}: {message}")] Remote { code: i64, message: String },
    #[error("invalid response: {0}")] InvalidResponse(String),
}

impl RpcError {
    /// Remote error message, if the node answered with one.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Self::Remote { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Top-level error taxonomy shared by every zMail crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZmailError {
    #[error("invalid message: {0}")] InvalidMessage(String),
    #[error("message too long: {size} > {max}")] MessageTooLong { size: usize, max: usize },
    #[error("encryption failed: {0}")] EncryptionFailed(String),
    #[error("decryption failed")] DecryptionFailed,
    #[error("invalid key: {0}")] InvalidKey(String),
    #[error("invalid address: {0}")] InvalidAddress(String),
    #[error("insufficient funds: have {have}, need {need}")] InsufficientFunds { have: u64, need: u64 },
    #[error("network error: {0}")] Network(String),
    #[error("transaction failed ({kind}): {message}")] TransactionFailed { kind: TxFailureKind, message: String },
    #[error("sync error: {0}")] Sync(String),
    #[error("operation cancelled")] Cancelled,
    #[error("storage: {0}")] Storage(String),
    #[error("configuration: {0}")] Config(String),
}

impl ZmailError {
    /// Shorthand for a [`ZmailError::TransactionFailed`].
    pub fn tx_failed(kind: TxFailureKind, message: impl Into<String>) -> Self {
        Self::TransactionFailed {
            kind,
            message: message.into(),
        }
    }

    /// Whether a caller may retry the same request later with backoff.
    ///
    /// Local validation and crypto failures are never retryable. Capability
    /// mismatches are not retryable against the same endpoint.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Sync(_) => true,
            Self::TransactionFailed { kind, .. } => matches!(
                kind,
                TxFailureKind::Timeout | TxFailureKind::Rejected | TxFailureKind::NonFinal
            ),
            _ => false,
        }
    }
}

impl From<RpcError> for ZmailError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::Transport(msg) => Self::Network(msg),
            RpcError::InvalidResponse(msg) => Self::Network(format!("invalid response: {msg}")),
            RpcError::Remote { code, message } => {
                Self::tx_failed(TxFailureKind::Rejected, format!("rpc error {code}: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_message_too_long() {
        let e = ZmailError::MessageTooLong { size: 600, max: 504 };
        assert_eq!(e.to_string(), "message too long: 600 > 504");
    }

    #[test]
    fn display_transaction_failed_names_kind() {
        let e = ZmailError::tx_failed(TxFailureKind::CapabilityMismatch, "no send path");
        assert_eq!(e.to_string(), "transaction failed (capability mismatch): no send path");
    }

    #[test]
    fn decryption_failure_is_not_retryable() {
        assert!(!ZmailError::DecryptionFailed.is_retryable());
        assert!(!ZmailError::InvalidKey("empty".into()).is_retryable());
    }

    #[test]
    fn network_and_timeout_are_retryable() {
        assert!(ZmailError::Network("refused".into()).is_retryable());
        assert!(ZmailError::tx_failed(TxFailureKind::Timeout, "5m").is_retryable());
        assert!(!ZmailError::tx_failed(TxFailureKind::CapabilityMismatch, "x").is_retryable());
    }

    #[test]
    fn transport_error_maps_to_network() {
        let e: ZmailError = RpcError::Transport("connection refused".into()).into();
        assert_eq!(e, ZmailError::Network("connection refused".into()));
    }

    #[test]
    fn remote_error_maps_to_rejected_transaction() {
        let e: ZmailError = RpcError::Remote {
            code: -26,
            message: "bad-txns".into(),
        }
        .into();
        assert!(matches!(
            e,
            ZmailError::TransactionFailed {
                kind: TxFailureKind::Rejected,
                ..
            }
        ));
    }

    #[test]
    fn remote_message_accessor() {
        let e = RpcError::Remote {
            code: -32601,
            message: "Method not found".into(),
        };
        assert_eq!(e.remote_message(), Some("Method not found"));
        assert_eq!(RpcError::Transport("x".into()).remote_message(), None);
    }
}
