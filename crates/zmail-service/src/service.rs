//! The zMail message service.
//!
//! Sending: content is cut into chunks small enough that each encrypted
//! chunk fits one frame, every chunk is sealed to the recipient's address
//! key, framed, and dispatched as its own shielded transaction. Parts go out
//! strictly in order with a pause between them, and sends from one address
//! never interleave. Every part of one message carries the same frame
//! timestamp, and no two messages from one service share a timestamp.
//!
//! Receiving: a [`Scanner`] pass over the address's received outputs followed
//! by [`assemble`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zmail_core::cancel::CancelToken;
use zmail_core::constants::{MAX_ENCRYPTED_PLAINTEXT_LEN, MAX_MESSAGE_PARTS};
use zmail_core::crypto::{
    PublicKey, derive_public_key_from_address, encode_to_memo, encrypt_message,
};
use zmail_core::error::{RpcError, TxFailureKind, ZmailError};
use zmail_core::memo;
use zmail_core::split::{MessageSplitter, part_sequence};
use zmail_core::traits::WalletNode;
use zmail_core::types::{MessageType, SpendingKey};
use zmail_rpc::{
    CapabilityCache, CapabilityDetector, JsonRpcTransport, RpcNoteSource, RpcWalletNode,
    SubstringClassifier, TransactionRequest, TransactionRouter,
};

use crate::assemble::{Assembly, assemble};
use crate::config::{ServiceConfig, ZmailConfig};
use crate::scan::{ScanProgress, ScanRequest, Scanner};
use crate::store::{FileStore, MessageStore, ReceivedMessageRecord, SentMessageRecord};

/// Hex BLAKE3 over sender, recipient, big-endian unix seconds, and content.
pub fn message_id(from: &str, to: &str, timestamp: i64, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(from.as_bytes());
    hasher.update(to.as_bytes());
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Sends, scans for, and tracks zMail messages.
pub struct MessageService {
    router: Arc<TransactionRouter>,
    node: Arc<dyn WalletNode>,
    store: MessageStore,
    config: ServiceConfig,
    splitter: MessageSplitter,
    sender_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Last frame timestamp handed out.
    last_timestamp: parking_lot::Mutex<u32>,
}

impl MessageService {
    pub fn new(
        router: Arc<TransactionRouter>,
        node: Arc<dyn WalletNode>,
        store: MessageStore,
        config: ServiceConfig,
    ) -> Self {
        Self {
            router,
            node,
            store,
            config,
            splitter: MessageSplitter::with_capacity(MAX_ENCRYPTED_PLAINTEXT_LEN),
            sender_locks: DashMap::new(),
            last_timestamp: parking_lot::Mutex::new(0),
        }
    }

    /// Wire up a service against the configured JSON-RPC endpoint, keeping
    /// records under the configured data directory.
    pub fn connect(config: &ZmailConfig) -> Result<Self, ZmailError> {
        let transport =
            Arc::new(JsonRpcTransport::new(&config.rpc.endpoint, config.rpc.timeout())?);
        let detector = CapabilityDetector::new(transport.clone(), Arc::new(CapabilityCache::new()))
            .with_public_providers(config.rpc.public_providers.clone())
            .with_classifier(Arc::new(SubstringClassifier::new(
                config.rpc.unavailable_patterns.iter().cloned(),
            )));
        let node: Arc<dyn WalletNode> = Arc::new(RpcWalletNode::new(transport.clone()));
        let router = TransactionRouter::new(
            detector,
            node.clone(),
            Arc::new(RpcNoteSource::new(transport)),
            config.router.clone(),
        )
        .with_prover(config.prover.build_prover()?);
        let store = MessageStore::new(Arc::new(FileStore::open(config.messages_dir())?));

        Ok(Self::new(Arc::new(router), node, store, config.service.clone()))
    }

    pub fn router(&self) -> &TransactionRouter {
        &self.router
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Encrypt, split, and dispatch `content` from `from` to `to`.
    ///
    /// Returns the stored record; its id is the message id and its first
    /// txid identifies part 0.
    pub async fn send_message(
        &self,
        from: &str,
        to: &str,
        spending_key: &SpendingKey,
        content: &str,
        amount: Option<u64>,
        cancel: &CancelToken,
    ) -> Result<SentMessageRecord, ZmailError> {
        if content.is_empty() {
            return Err(ZmailError::InvalidMessage("message is empty".into()));
        }
        let chunks = self.splitter.split_message(content);
        if chunks.len() > MAX_MESSAGE_PARTS {
            return Err(ZmailError::MessageTooLong {
                size: content.len(),
                max: MAX_MESSAGE_PARTS * self.splitter.capacity(),
            });
        }
        let (timestamp, sent_at) = self.next_timestamp();
        let id = message_id(from, to, sent_at.timestamp(), content);

        let txids = self
            .dispatch(
                from,
                to,
                spending_key,
                &chunks,
                MessageType::for_part,
                amount,
                timestamp,
                cancel,
            )
            .await?;
        info!(message_id = %id, parts = txids.len(), "message sent");
        self.record_sent(id, from, to, MessageType::Text, txids, sent_at)
    }

    /// Acknowledge `acknowledged_txid` to `to` with a single receipt frame.
    pub async fn send_receipt(
        &self,
        from: &str,
        to: &str,
        spending_key: &SpendingKey,
        acknowledged_txid: &str,
        cancel: &CancelToken,
    ) -> Result<SentMessageRecord, ZmailError> {
        if acknowledged_txid.trim().is_empty() {
            return Err(ZmailError::InvalidMessage("receipt needs a txid".into()));
        }
        let (timestamp, sent_at) = self.next_timestamp();
        let id = message_id(from, to, sent_at.timestamp(), acknowledged_txid);

        let txids = self
            .dispatch(
                from,
                to,
                spending_key,
                &[acknowledged_txid],
                |_| MessageType::Receipt,
                None,
                timestamp,
                cancel,
            )
            .await?;
        info!(message_id = %id, acknowledged = acknowledged_txid, "receipt sent");
        self.record_sent(id, from, to, MessageType::Receipt, txids, sent_at)
    }

    /// Frame timestamp for a new message: the current unix second, bumped
    /// past the previous message when they would collide.
    fn next_timestamp(&self) -> (u32, DateTime<Utc>) {
        let now = Utc::now();
        let second = u32::try_from(now.timestamp()).unwrap_or(u32::MAX);
        let mut last = self.last_timestamp.lock();
        let timestamp = second.max(last.saturating_add(1));
        *last = timestamp;
        let sent_at = if timestamp == second {
            now
        } else {
            DateTime::<Utc>::from_timestamp(i64::from(timestamp), 0).unwrap_or(now)
        };
        (timestamp, sent_at)
    }

    fn record_sent(
        &self,
        id: String,
        from: &str,
        to: &str,
        message_type: MessageType,
        txids: Vec<String>,
        sent_at: DateTime<Utc>,
    ) -> Result<SentMessageRecord, ZmailError> {
        let record = SentMessageRecord {
            id,
            from: from.to_string(),
            to: to.to_string(),
            message_type,
            txids,
            sent_at,
        };
        self.store.save_sent(&record)?;
        Ok(record)
    }

    /// Send `chunks` as consecutive parts stamped with `timestamp`. Holds the
    /// sender's lock for the whole message.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch(
        &self,
        from: &str,
        to: &str,
        spending_key: &SpendingKey,
        chunks: &[&str],
        part_type: fn(usize) -> MessageType,
        amount: Option<u64>,
        timestamp: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<String>, ZmailError> {
        if from.trim().is_empty() {
            return Err(ZmailError::InvalidAddress("sender address is empty".into()));
        }
        let recipient = derive_public_key_from_address(to)?;
        let amount = amount.unwrap_or(self.config.message_amount);

        let _turn = SenderTurn::take(&self.sender_locks, from).await;

        let mut txids = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                cancel.sleep(self.config.inter_part_delay()).await?;
            }
            let frame =
                seal_part(chunk, &recipient, part_type(index), part_sequence(index)?, timestamp)?;
            let request = TransactionRequest {
                from: from.to_string(),
                to: to.to_string(),
                amount,
                memo: frame,
                fee: None,
            };

            match self.router.send_transaction(&request, spending_key, cancel).await {
                Ok(outcome) => {
                    debug!(part = index, txid = %outcome.txid, "part dispatched");
                    txids.push(outcome.txid);
                }
                Err(e) => {
                    if !txids.is_empty() {
                        warn!(
                            sent = txids.len(),
                            total = chunks.len(),
                            error = %e,
                            "message partially sent"
                        );
                    }
                    return Err(e);
                }
            }
        }
        Ok(txids)
    }

    /// Scan `request.address`, assemble what was found, and store complete
    /// messages.
    pub async fn scan_for_messages(
        &self,
        request: &ScanRequest,
        cancel: &CancelToken,
        on_progress: impl FnMut(ScanProgress),
    ) -> Result<Assembly, ZmailError> {
        let mut scanner = Scanner::start(self.node.as_ref(), request).await?;
        let parts = scanner.scan_all(cancel, on_progress)?;
        let assembly = assemble(parts);

        let received_at = Utc::now();
        for message in &assembly.messages {
            self.store.save_received(&ReceivedMessageRecord {
                id: message.id().to_string(),
                to: request.address.clone(),
                message_type: message.message_type,
                content: message.content.clone(),
                txids: message.txids.clone(),
                height: message.height,
                sent_timestamp: message.timestamp,
                received_at,
            })?;
        }
        info!(
            address = %request.address,
            messages = assembly.messages.len(),
            incomplete = assembly.incomplete.len(),
            "scan finished"
        );
        Ok(assembly)
    }

    /// Poll until `txid` has `target` confirmations.
    ///
    /// Gives up with a timeout failure after the configured limit. A txid the
    /// node does not know yet counts as zero confirmations.
    pub async fn wait_for_confirmations(
        &self,
        txid: &str,
        target: u64,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(u64),
    ) -> Result<u64, ZmailError> {
        let timeout = self.config.confirmation_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            cancel.check()?;
            match self.node.get_transaction(txid).await {
                Ok(info) => {
                    on_progress(info.confirmations);
                    if info.confirmations >= target {
                        info!(txid, confirmations = info.confirmations, "transaction confirmed");
                        return Ok(info.confirmations);
                    }
                }
                Err(e) if is_not_yet_visible(&e) => {
                    debug!(txid, error = %e, "transaction not visible yet");
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(ZmailError::tx_failed(
                    TxFailureKind::Timeout,
                    format!("{txid} not confirmed {target} times within {}s", timeout.as_secs()),
                ));
            }
            cancel.sleep(self.config.confirmation_interval()).await?;
        }
    }
}

/// A sender's exclusive dispatch slot. Dropping it releases the lock and
/// prunes the sender's entry when nobody else holds or awaits it.
struct SenderTurn<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    from: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<'a> SenderTurn<'a> {
    async fn take(locks: &'a DashMap<String, Arc<Mutex<()>>>, from: &'a str) -> Self {
        let lock = locks.entry(from.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        Self {
            locks,
            from,
            guard: Some(guard),
        }
    }
}

impl Drop for SenderTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.remove_if(self.from, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn seal_part(
    chunk: &str,
    recipient: &PublicKey,
    message_type: MessageType,
    sequence: u16,
    timestamp: u32,
) -> Result<memo::MemoBytes, ZmailError> {
    let envelope = encrypt_message(chunk.as_bytes(), recipient)?;
    let payload = encode_to_memo(&envelope)?;
    memo::encode_at(&payload, message_type, sequence, timestamp)
}

fn is_not_yet_visible(err: &RpcError) -> bool {
    match err {
        RpcError::Transport(_) => true,
        RpcError::Remote { message, .. } => {
            let message = message.to_ascii_lowercase();
            message.contains("no such") || message.contains("not found")
        }
        RpcError::InvalidResponse(_) => false,
    }
}
