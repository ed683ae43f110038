//! Transaction routing.
//!
//! The router asks the [`CapabilityDetector`] what the endpoint offers and
//! picks one of two send paths:
//!
//! | z_sendmany + z_importkey | sendrawtransaction | strategy          |
//! |--------------------------|--------------------|-------------------|
//! | yes                      | any                | [`WalletRpcSend`] |
//! | no                       | yes                | [`RawTxSend`]     |
//! | no                       | no                 | capability error  |
//!
//! The choice is made on first use and kept until [`TransactionRouter::refresh`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zmail_core::cancel::CancelToken;
use zmail_core::constants::MEMO_SIZE;
use zmail_core::error::{RpcError, TxFailureKind, ZmailError};
use zmail_core::traits::{NoteSource, WalletNode};
use zmail_core::types::{OperationStatus, RpcCapabilities, SendOutcome, ShieldedSend, SpendingKey};
use zmail_wallet::{TransactionBuilder, TransactionProver, UnavailableProver, WalletError};

use crate::capabilities::CapabilityDetector;
use crate::classify::{classify_broadcast_rejection, is_already_imported};
use crate::config::RouterConfig;

/// One way of getting a shielded send onto the chain.
#[async_trait]
pub trait SendStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn send(
        &self,
        request: &ShieldedSend,
        spending_key: &SpendingKey,
        cancel: &CancelToken,
    ) -> Result<SendOutcome, ZmailError>;
}

/// Send through the node wallet: import the key, `z_sendmany`, then poll the
/// async operation until it settles.
pub struct WalletRpcSend {
    node: Arc<dyn WalletNode>,
    poll_interval: Duration,
    operation_timeout: Duration,
}

impl WalletRpcSend {
    pub fn new(
        node: Arc<dyn WalletNode>,
        poll_interval: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            node,
            poll_interval,
            operation_timeout,
        }
    }

    async fn import_key(&self, spending_key: &SpendingKey) -> Result<(), ZmailError> {
        match self.node.import_key(spending_key).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_imported(&e) => {
                debug!("spending key already present in node wallet");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn wait_for_operation(
        &self,
        operation_id: &str,
        cancel: &CancelToken,
    ) -> Result<String, ZmailError> {
        let deadline = Instant::now() + self.operation_timeout;
        loop {
            cancel.check()?;
            match self.node.operation_status(operation_id).await {
                Ok(OperationStatus::Success { txid }) => return Ok(txid),
                Ok(OperationStatus::Failed { message }) => {
                    return Err(ZmailError::tx_failed(TxFailureKind::OperationFailed, message));
                }
                Ok(status) => debug!(operation_id, ?status, "operation pending"),
                // The operation may not be visible yet; keep polling.
                Err(RpcError::Transport(e)) => {
                    debug!(operation_id, error = %e, "operation status unavailable")
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                return Err(ZmailError::tx_failed(
                    TxFailureKind::Timeout,
                    format!(
                        "operation {operation_id} not finished after {}s",
                        self.operation_timeout.as_secs()
                    ),
                ));
            }
            cancel.sleep(self.poll_interval).await?;
        }
    }
}

#[async_trait]
impl SendStrategy for WalletRpcSend {
    fn name(&self) -> &'static str {
        "wallet-rpc"
    }

    async fn send(
        &self,
        request: &ShieldedSend,
        spending_key: &SpendingKey,
        cancel: &CancelToken,
    ) -> Result<SendOutcome, ZmailError> {
        self.import_key(spending_key).await?;
        cancel.check()?;

        let operation_id = self.node.send_shielded(request).await?;
        let txid = self.wait_for_operation(&operation_id, cancel).await?;
        Ok(SendOutcome {
            txid,
            operation_id: Some(operation_id),
        })
    }
}

/// Build and prove the transaction locally, then `sendrawtransaction`.
pub struct RawTxSend {
    node: Arc<dyn WalletNode>,
    builder: TransactionBuilder,
    prover: Arc<dyn TransactionProver>,
}

impl RawTxSend {
    pub fn new(
        node: Arc<dyn WalletNode>,
        builder: TransactionBuilder,
        prover: Arc<dyn TransactionProver>,
    ) -> Self {
        Self {
            node,
            builder,
            prover,
        }
    }
}

#[async_trait]
impl SendStrategy for RawTxSend {
    fn name(&self) -> &'static str {
        "raw-transaction"
    }

    async fn send(
        &self,
        request: &ShieldedSend,
        spending_key: &SpendingKey,
        cancel: &CancelToken,
    ) -> Result<SendOutcome, ZmailError> {
        let tx = self
            .builder
            .build(self.prover.as_ref(), request, spending_key)
            .await?;
        cancel.check()?;

        match self.node.broadcast_raw(&tx.raw_hex()).await {
            Ok(txid) => Ok(SendOutcome {
                txid,
                operation_id: None,
            }),
            Err(RpcError::Remote { code, message }) => {
                let kind = classify_broadcast_rejection(&message);
                warn!(code, %kind, "raw transaction rejected");
                Err(ZmailError::tx_failed(kind, message))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Which send path an endpoint supports, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    WalletRpc,
    RawTransaction,
}

impl StrategyKind {
    pub fn for_capabilities(caps: &RpcCapabilities) -> Option<Self> {
        if caps.supports_wallet_send() {
            Some(Self::WalletRpc)
        } else if caps.supports_send_raw_transaction {
            Some(Self::RawTransaction)
        } else {
            None
        }
    }
}

/// A message-carrying shielded payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    /// Value in zatoshis. Must be non-zero.
    pub amount: u64,
    pub memo: [u8; MEMO_SIZE],
    /// Fee in zatoshis, or the router default.
    pub fee: Option<u64>,
}

/// Dispatches shielded sends through whichever path the endpoint supports.
pub struct TransactionRouter {
    detector: CapabilityDetector,
    node: Arc<dyn WalletNode>,
    notes: Arc<dyn NoteSource>,
    prover: Arc<dyn TransactionProver>,
    config: RouterConfig,
    strategy: Mutex<Option<Arc<dyn SendStrategy>>>,
}

impl TransactionRouter {
    pub fn new(
        detector: CapabilityDetector,
        node: Arc<dyn WalletNode>,
        notes: Arc<dyn NoteSource>,
        config: RouterConfig,
    ) -> Self {
        Self {
            detector,
            node,
            notes,
            prover: Arc::new(UnavailableProver),
            config,
            strategy: Mutex::new(None),
        }
    }

    /// Prover used by the raw-transaction path.
    pub fn with_prover(mut self, prover: Arc<dyn TransactionProver>) -> Self {
        self.prover = prover;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.detector.endpoint()
    }

    /// Name of the cached strategy, if one has been selected.
    pub fn strategy_name(&self) -> Option<&'static str> {
        self.strategy.lock().as_ref().map(|s| s.name())
    }

    /// The strategy for this endpoint, detecting capabilities on first use.
    pub async fn select_strategy(&self) -> Result<Arc<dyn SendStrategy>, ZmailError> {
        if let Some(strategy) = self.strategy.lock().clone() {
            return Ok(strategy);
        }

        let caps = self.detector.detect_capabilities().await;
        let Some(kind) = StrategyKind::for_capabilities(&caps) else {
            return Err(ZmailError::tx_failed(
                TxFailureKind::CapabilityMismatch,
                format!(
                    "endpoint {} offers no send path (missing: {})",
                    self.endpoint(),
                    caps.missing().join(", ")
                ),
            ));
        };

        let strategy: Arc<dyn SendStrategy> = match kind {
            StrategyKind::WalletRpc => Arc::new(WalletRpcSend::new(
                self.node.clone(),
                self.config.poll_interval(),
                self.config.operation_timeout(),
            )),
            StrategyKind::RawTransaction => Arc::new(RawTxSend::new(
                self.node.clone(),
                TransactionBuilder::new(self.notes.clone()),
                self.prover.clone(),
            )),
        };
        info!(endpoint = %self.endpoint(), strategy = strategy.name(), "send strategy selected");
        *self.strategy.lock() = Some(strategy.clone());
        Ok(strategy)
    }

    /// Forget the selected strategy and re-detect the endpoint.
    pub async fn refresh(&self) -> RpcCapabilities {
        self.strategy.lock().take();
        self.detector.refresh_capabilities().await
    }

    pub async fn send_transaction(
        &self,
        request: &TransactionRequest,
        spending_key: &SpendingKey,
        cancel: &CancelToken,
    ) -> Result<SendOutcome, ZmailError> {
        if request.amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be non-zero".into()).into());
        }
        if spending_key.is_blank() {
            return Err(WalletError::MissingSpendingKey.into());
        }
        cancel.check()?;

        let strategy = self.select_strategy().await?;
        let send = ShieldedSend {
            from: request.from.clone(),
            to: request.to.clone(),
            amount: request.amount,
            memo: request.memo,
            fee: request.fee.unwrap_or(self.config.default_fee),
        };
        let outcome = strategy.send(&send, spending_key, cancel).await?;
        info!(
            endpoint = %self.endpoint(),
            strategy = strategy.name(),
            txid = %outcome.txid,
            "transaction dispatched"
        );
        Ok(outcome)
    }
}
