//! End-to-end tests for zMail.
//!
//! The tests drive the real transport-facing stack (capability detection,
//! routing, the wallet-node adapter, the message service) against
//! [`helpers::SimChain`], an in-process node that answers the JSON-RPC
//! methods zMail uses.

pub mod helpers;
