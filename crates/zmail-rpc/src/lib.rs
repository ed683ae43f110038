//! JSON-RPC plumbing for zMail.
//!
//! - [`transport`]: HTTP JSON-RPC client over `jsonrpsee`
//! - [`classify`]: node error taxonomy, pluggable via [`ErrorClassifier`]
//! - [`capabilities`]: per-endpoint capability detection and its cache
//! - [`node`]: wallet node and note source adapters over a transport
//! - [`router`]: send strategy selection and dispatch
//! - [`config`]: endpoint and dispatch settings

pub mod capabilities;
pub mod classify;
pub mod config;
pub mod node;
pub mod router;
pub mod transport;

pub use capabilities::{
    CachedCapabilities, CapabilityCache, CapabilityDetector, DetectionState, classify_endpoint,
};
pub use classify::{ErrorClass, ErrorClassifier, SubstringClassifier};
pub use config::{RouterConfig, RpcConfig};
pub use node::{RpcNoteSource, RpcWalletNode};
pub use router::{
    RawTxSend, SendStrategy, StrategyKind, TransactionRequest, TransactionRouter, WalletRpcSend,
};
pub use transport::JsonRpcTransport;
