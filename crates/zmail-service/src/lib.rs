//! # zmail-service
//! Message sending, scanning, and confirmation tracking.
//!
//! # Modules
//!
//! - [`service`]: `MessageService`, the send/scan/wait surface
//! - [`scan`]: pull-based scanner over received outputs
//! - [`assemble`]: regrouping scanned parts into messages
//! - [`store`]: sent and received message records
//! - [`config`]: layered configuration

pub mod assemble;
pub mod config;
pub mod scan;
pub mod service;
pub mod store;

pub use assemble::{AssembledMessage, Assembly, ScannedPart, assemble};
pub use config::{ProverConfig, ServiceConfig, ZmailConfig};
pub use scan::{ScanProgress, ScanRequest, Scanner};
pub use service::{MessageService, message_id};
pub use store::{FileStore, MemoryStore, MessageStore, ReceivedMessageRecord, SentMessageRecord};
pub use zmail_core::split::combine_parts;
