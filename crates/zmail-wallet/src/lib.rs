//! # zmail-wallet: client-side transaction building for zMail.
//!
//! Used when an endpoint can broadcast raw transactions but offers no wallet
//! RPC. Notes and witnesses come from a [`NoteSource`](zmail_core::traits::NoteSource);
//! proofs come from a [`TransactionProver`].
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`selection`]: Largest-first note selection
//! - [`builder`]: Transaction plan construction and validation
//! - [`prover`]: `TransactionProver` trait and the unavailable prover
//! - [`params`]: Proving parameter discovery
//! - [`proof_service`]: HTTP proof-service prover

pub mod builder;
pub mod error;
pub mod params;
pub mod proof_service;
pub mod prover;
pub mod selection;

pub use builder::{PlannedInput, PlannedOutput, TransactionBuilder, TransactionPlan};
pub use error::WalletError;
pub use params::ProvingParameters;
pub use proof_service::ProofServiceProver;
pub use prover::{ProvenTransaction, TransactionProver, UnavailableProver};
pub use selection::{NoteSelection, NoteSelector};
