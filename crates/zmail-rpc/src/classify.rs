//! Mapping opaque node errors onto a local taxonomy.
//!
//! Nodes rarely return structured error codes for policy decisions, so the
//! classification lives behind a trait. [`SubstringClassifier`] is the default
//! and matches message text; a backend with precise codes can supply its own.

use zmail_core::error::{RpcError, TxFailureKind};

/// JSON-RPC "method not found".
pub const METHOD_NOT_FOUND: i64 = -32601;

/// What a probe error says about the probed method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The endpoint does not offer the method.
    MethodUnavailable,
    /// The method exists but refused this call (bad params and the like).
    Rejected,
    /// The request never got an answer.
    Transport,
}

/// Classifies probe errors.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, err: &RpcError) -> ErrorClass;
}

/// Default phrases meaning "this method is not offered here".
pub const DEFAULT_UNAVAILABLE_PATTERNS: &[&str] = &[
    "method not found",
    "disallowed",
    "not allowed",
    "not supported",
    "unknown method",
    "disabled",
];

/// Classifier matching the method-not-found code and message substrings.
#[derive(Debug, Clone)]
pub struct SubstringClassifier {
    patterns: Vec<String>,
}

impl SubstringClassifier {
    /// Patterns are matched case-insensitively.
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl Default for SubstringClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_UNAVAILABLE_PATTERNS.iter().copied())
    }
}

impl ErrorClassifier for SubstringClassifier {
    fn classify(&self, err: &RpcError) -> ErrorClass {
        match err {
            RpcError::Transport(_) => ErrorClass::Transport,
            // Some proxies answer unknown methods with HTML or empty bodies.
            RpcError::InvalidResponse(_) => ErrorClass::MethodUnavailable,
            RpcError::Remote { code, message } => {
                let message = message.to_ascii_lowercase();
                if *code == METHOD_NOT_FOUND || self.patterns.iter().any(|p| message.contains(p)) {
                    ErrorClass::MethodUnavailable
                } else {
                    ErrorClass::Rejected
                }
            }
        }
    }
}

/// Map a `sendrawtransaction` rejection message onto a failure kind.
pub fn classify_broadcast_rejection(message: &str) -> TxFailureKind {
    let message = message.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if has(&[
        "already in block chain",
        "already in chain",
        "txn-already-known",
        "already have transaction",
    ]) {
        TxFailureKind::AlreadyInChain
    } else if has(&["insufficient", "below output", "bad-txns-in-belowout", "dust"]) {
        TxFailureKind::InsufficientFunds
    } else if has(&["non-final", "non-bip68-final", "bad-txns-nonfinal"]) {
        TxFailureKind::NonFinal
    } else if has(&["decode failed", "tx decode", "malformed", "invalid hex", "parse error"]) {
        TxFailureKind::Malformed
    } else {
        TxFailureKind::Rejected
    }
}

/// Whether a `z_importkey` error only says the key is already there.
pub fn is_already_imported(err: &RpcError) -> bool {
    err.remote_message()
        .is_some_and(|m| m.to_ascii_lowercase().contains("already"))
}
