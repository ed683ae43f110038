//! Shared test helpers: a simulated chain node and service wiring.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use zmail_core::constants::COIN;
use zmail_core::error::RpcError;
use zmail_core::traits::{RpcTransport, WalletNode};
use zmail_core::types::{IncrementalWitness, ShieldedNote};
use zmail_rpc::{
    CapabilityCache, CapabilityDetector, RouterConfig, RpcNoteSource, RpcWalletNode,
    TransactionRouter,
};
use zmail_service::{MessageService, MessageStore, ServiceConfig};
use zmail_wallet::{ProvenTransaction, TransactionPlan, TransactionProver, WalletError};

/// Loopback endpoint: detected as a local node with full wallet access.
pub const LOCAL_ENDPOINT: &str = "http://127.0.0.1:8232";

/// Remote endpoint of no known provider.
pub const REMOTE_ENDPOINT: &str = "https://node.example.net:8232";

/// Value of the single spendable note every address owns on the sim chain.
pub const SIM_NOTE_VALUE: u64 = 10 * COIN;

/// What the simulated endpoint exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFeatures {
    /// Whether the endpoint answers at all.
    pub reachable: bool,
    /// Whether wallet methods (`z_sendmany`, `z_importkey`, ...) are enabled.
    pub wallet: bool,
}

impl SimFeatures {
    pub const FULL: Self = Self {
        reachable: true,
        wallet: true,
    };
    pub const RAW_ONLY: Self = Self {
        reachable: true,
        wallet: false,
    };
    pub const OFFLINE: Self = Self {
        reachable: false,
        wallet: false,
    };
}

/// A transaction accepted by the sim chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimTx {
    pub txid: String,
    pub from: Option<String>,
    pub to: String,
    /// Zatoshis.
    pub amount: u64,
    pub memo: Vec<u8>,
    /// `None` while in the mempool.
    pub height: Option<u64>,
}

/// Output description [`SimProver`] serializes as the "raw transaction".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimRawTx {
    pub to: String,
    pub value: u64,
    pub memo: String,
}

#[derive(Default)]
struct ChainState {
    tip: u64,
    txs: Vec<SimTx>,
    /// Operation id to (txid, remaining "executing" polls).
    operations: HashMap<String, (String, u32)>,
    imported_keys: Vec<String>,
    calls: Vec<String>,
    next_id: u64,
    broadcast_rejection: Option<String>,
}

/// In-process node answering the zcashd-style JSON-RPC methods zMail uses.
///
/// Wallet sends are accepted into the mempool immediately; blocks are only
/// produced by [`SimChain::mine`]. `z_listreceivedbyaddress`,
/// `getrawtransaction`, and the note-source methods stay available with
/// wallet methods disabled, the way an indexer-backed endpoint behaves.
pub struct SimChain {
    endpoint: String,
    features: Mutex<SimFeatures>,
    state: Mutex<ChainState>,
    /// Polls an async operation reports `executing` before succeeding.
    executing_polls: u32,
}

impl SimChain {
    pub fn new(endpoint: &str, features: SimFeatures) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            features: Mutex::new(features),
            state: Mutex::new(ChainState::default()),
            executing_polls: 1,
        })
    }

    /// Loopback node with its wallet enabled.
    pub fn local() -> Arc<Self> {
        Self::new(LOCAL_ENDPOINT, SimFeatures::FULL)
    }

    pub fn set_features(&self, features: SimFeatures) {
        *self.features.lock() = features;
    }

    /// Reject every later `sendrawtransaction` with `message`.
    pub fn reject_broadcasts(&self, message: &str) {
        self.state.lock().broadcast_rejection = Some(message.to_string());
    }

    /// Mine `blocks` blocks; all mempool transactions land in the first.
    pub fn mine(&self, blocks: u64) {
        let mut state = self.state.lock();
        let height = state.tip + 1;
        for tx in state.txs.iter_mut().filter(|tx| tx.height.is_none()) {
            tx.height = Some(height);
        }
        state.tip += blocks;
    }

    pub fn tip(&self) -> u64 {
        self.state.lock().tip
    }

    pub fn transactions(&self) -> Vec<SimTx> {
        self.state.lock().txs.clone()
    }

    /// Every method called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state.lock().calls.iter().filter(|m| *m == method).count()
    }

    pub fn imported_keys(&self) -> usize {
        self.state.lock().imported_keys.len()
    }

    fn dispatch(&self, method: &str, params: &[Value]) -> Result<Value, RpcError> {
        let features = *self.features.lock();
        let mut state = self.state.lock();
        state.calls.push(method.to_string());

        if !features.reachable {
            return Err(RpcError::Transport(format!("{}: connection refused", self.endpoint)));
        }
        let wallet_method = matches!(
            method,
            "z_listaddresses"
                | "z_sendmany"
                | "z_importkey"
                | "z_getoperationstatus"
                | "z_getbalance"
        );
        if wallet_method && !features.wallet {
            return Err(method_not_found());
        }

        match method {
            "getinfo" => Ok(json!({ "version": 5_000_000, "blocks": state.tip })),
            "z_listaddresses" => Ok(json!([])),
            "z_importkey" => state.import_key(params),
            "z_sendmany" => state.send_many(params, self.executing_polls),
            "z_getoperationstatus" => state.operation_status(params),
            "z_getbalance" => Ok(json!(0.0)),
            "z_listreceivedbyaddress" => state.list_received(params),
            "getrawtransaction" => state.raw_transaction(params),
            "sendrawtransaction" => state.broadcast(params),
            "getutxos" => to_json(vec![ShieldedNote {
                value: SIM_NOTE_VALUE,
                nullifier: [1; 32],
                rho: [2; 32],
                recipient: [3; 32],
            }]),
            "getwitness" => to_json(IncrementalWitness {
                position: 0,
                path: vec![[0; 32]; 32],
                cursor: None,
            }),
            "getanchorheight" => Ok(json!(state.tip)),
            _ => Err(method_not_found()),
        }
    }
}

#[async_trait]
impl RpcTransport for SimChain {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.dispatch(method, &params)
    }
}

impl ChainState {
    fn accept(&mut self, from: Option<String>, to: String, amount: u64, memo: Vec<u8>) -> String {
        self.next_id += 1;
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.next_id.to_be_bytes());
        hasher.update(to.as_bytes());
        hasher.update(&memo);
        let txid = hasher.finalize().to_hex().to_string();
        self.txs.push(SimTx {
            txid: txid.clone(),
            from,
            to,
            amount,
            memo,
            height: None,
        });
        txid
    }

    fn import_key(&mut self, params: &[Value]) -> Result<Value, RpcError> {
        let key = str_param(params, 0, "z_importkey \"zkey\" ( rescan startHeight )")?;
        if !self.imported_keys.iter().any(|k| k == key) {
            self.imported_keys.push(key.to_string());
        }
        Ok(Value::Null)
    }

    fn send_many(&mut self, params: &[Value], executing_polls: u32) -> Result<Value, RpcError> {
        let from = str_param(params, 0, "Invalid parameter, expected from address")?.to_string();
        let recipient = params
            .get(1)
            .and_then(|r| r.get(0))
            .ok_or_else(|| invalid_params("Invalid parameter, amounts array is empty"))?;
        let to = recipient
            .get("address")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_params("Invalid parameter, missing address"))?
            .to_string();
        let coins = recipient
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| invalid_params("Invalid parameter, missing amount"))?;
        let memo = recipient
            .get("memo")
            .and_then(Value::as_str)
            .map(hex::decode)
            .transpose()
            .map_err(|_| invalid_params("Invalid parameter, expected memo data in hexadecimal"))?
            .unwrap_or_default();

        let amount = (coins * COIN as f64).round() as u64;
        let txid = self.accept(Some(from), to, amount, memo);
        let opid = format!("opid-{}", self.next_id);
        self.operations.insert(opid.clone(), (txid, executing_polls));
        Ok(json!(opid))
    }

    fn operation_status(&mut self, params: &[Value]) -> Result<Value, RpcError> {
        let Some(opid) = params.first().and_then(|ids| ids.get(0)).and_then(Value::as_str) else {
            return Ok(json!([]));
        };
        let Some((txid, remaining)) = self.operations.get_mut(opid) else {
            return Ok(json!([]));
        };
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(json!([{ "id": opid, "status": "executing" }]));
        }
        Ok(json!([{ "id": opid, "status": "success", "result": { "txid": txid } }]))
    }

    fn list_received(&self, params: &[Value]) -> Result<Value, RpcError> {
        let address = str_param(params, 0, "Invalid parameter, expected address")?;
        let entries: Vec<Value> = self
            .txs
            .iter()
            .filter(|tx| tx.to == address)
            .map(|tx| {
                let mut entry = json!({
                    "txid": tx.txid,
                    "amount": tx.amount as f64 / COIN as f64,
                    "amountZat": tx.amount,
                    "memo": hex::encode(&tx.memo),
                    "outindex": 0,
                    "confirmations": self.confirmations(tx),
                });
                if let Some(height) = tx.height {
                    entry["blockheight"] = json!(height);
                }
                entry
            })
            .collect();
        Ok(Value::Array(entries))
    }

    fn raw_transaction(&self, params: &[Value]) -> Result<Value, RpcError> {
        let txid = str_param(params, 0, "Invalid parameter, expected txid")?;
        let tx = self.txs.iter().find(|tx| tx.txid == txid).ok_or_else(|| RpcError::Remote {
            code: -5,
            message: "No such mempool or blockchain transaction. Use gettransaction for wallet \
                      transactions."
                .into(),
        })?;
        let mut response = json!({ "txid": tx.txid });
        if let Some(height) = tx.height {
            response["height"] = json!(height);
            response["confirmations"] = json!(self.confirmations(tx));
        }
        Ok(response)
    }

    fn broadcast(&mut self, params: &[Value]) -> Result<Value, RpcError> {
        if let Some(message) = &self.broadcast_rejection {
            return Err(RpcError::Remote {
                code: -26,
                message: message.clone(),
            });
        }
        let decode_failed = || RpcError::Remote {
            code: -22,
            message: "TX decode failed".into(),
        };
        let raw = str_param(params, 0, "Invalid parameter, expected hex")?;
        let bytes = hex::decode(raw).map_err(|_| decode_failed())?;
        let tx: SimRawTx = serde_json::from_slice(&bytes).map_err(|_| decode_failed())?;
        let memo = hex::decode(&tx.memo).map_err(|_| decode_failed())?;
        Ok(json!(self.accept(None, tx.to, tx.value, memo)))
    }

    fn confirmations(&self, tx: &SimTx) -> u64 {
        tx.height.map_or(0, |h| self.tip.saturating_sub(h) + 1)
    }
}

fn method_not_found() -> RpcError {
    RpcError::Remote {
        code: -32601,
        message: "Method not found".into(),
    }
}

fn invalid_params(message: &str) -> RpcError {
    RpcError::Remote {
        code: -8,
        message: message.into(),
    }
}

fn str_param<'a>(params: &'a [Value], index: usize, usage: &str) -> Result<&'a str, RpcError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid_params(usage))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

/// Prover that "builds" a transaction by serializing the plan's primary
/// output, which [`SimChain`] decodes on broadcast.
pub struct SimProver;

#[async_trait]
impl TransactionProver for SimProver {
    async fn prove(&self, plan: &TransactionPlan) -> Result<ProvenTransaction, WalletError> {
        let output = plan
            .primary_output()
            .ok_or_else(|| WalletError::InvalidPlan("no outputs".into()))?;
        let raw = serde_json::to_vec(&SimRawTx {
            to: output.address.clone(),
            value: output.value,
            memo: hex::encode(&output.memo),
        })
        .map_err(|e| WalletError::InvalidPlan(e.to_string()))?;
        Ok(ProvenTransaction { raw, txid: None })
    }
}

/// Router over `chain` with a fresh capability cache and [`SimProver`].
pub fn router(chain: &Arc<SimChain>) -> TransactionRouter {
    let transport: Arc<dyn RpcTransport> = chain.clone();
    let detector = CapabilityDetector::new(transport.clone(), Arc::new(CapabilityCache::new()));
    let node: Arc<dyn WalletNode> = Arc::new(RpcWalletNode::new(transport.clone()));
    TransactionRouter::new(
        detector,
        node,
        Arc::new(RpcNoteSource::new(transport)),
        RouterConfig::default(),
    )
    .with_prover(Arc::new(SimProver))
}

/// Message service over `chain`, storing records in `store`.
pub fn service(chain: &Arc<SimChain>, store: MessageStore) -> MessageService {
    let transport: Arc<dyn RpcTransport> = chain.clone();
    let node: Arc<dyn WalletNode> = Arc::new(RpcWalletNode::new(transport));
    MessageService::new(Arc::new(router(chain)), node, store, ServiceConfig::default())
}
