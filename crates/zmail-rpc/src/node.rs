//! Wallet-node and note-source adapters over an [`RpcTransport`].
//!
//! [`RpcWalletNode`] speaks the zcashd-style wallet RPC. Amounts cross the
//! wire as decimal coins and are converted to zatoshis at this boundary.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};
use zmail_core::constants::COIN;
use zmail_core::error::RpcError;
use zmail_core::traits::{NoteSource, RpcTransport, WalletNode};
use zmail_core::types::{
    IncrementalWitness, OperationStatus, ReceivedOutput, ShieldedNote, ShieldedSend, SpendingKey,
    TransactionInfo,
};

/// Minimum confirmations for notes spent by `z_sendmany`.
const SEND_MIN_CONF: u64 = 1;

/// Coins to zatoshis, rounding to the nearest unit.
pub fn coins_to_zat(coins: f64) -> Result<u64, RpcError> {
    if !coins.is_finite() || coins < 0.0 {
        return Err(RpcError::InvalidResponse(format!("bad amount {coins}")));
    }
    Ok((coins * COIN as f64).round() as u64)
}

/// Zatoshis to coins for request parameters.
pub fn zat_to_coins(zat: u64) -> f64 {
    zat as f64 / COIN as f64
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value, RpcError> {
    value
        .get(key)
        .ok_or_else(|| RpcError::InvalidResponse(format!("missing field {key}")))
}

fn str_field<'a>(value: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    field(value, key)?
        .as_str()
        .ok_or_else(|| RpcError::InvalidResponse(format!("field {key} is not a string")))
}

/// Prefer the exact `amountZat` field, falling back to the decimal `amount`.
fn amount_zat(value: &Value) -> Result<u64, RpcError> {
    if let Some(zat) = value.get("amountZat").and_then(Value::as_u64) {
        return Ok(zat);
    }
    let coins = field(value, "amount")?
        .as_f64()
        .ok_or_else(|| RpcError::InvalidResponse("amount is not a number".into()))?;
    coins_to_zat(coins)
}

fn parse_received(entry: &Value) -> Result<ReceivedOutput, RpcError> {
    let memo = match entry.get("memo").and_then(Value::as_str) {
        Some(hex_memo) => hex::decode(hex_memo)
            .map_err(|e| RpcError::InvalidResponse(format!("memo is not hex: {e}")))?,
        None => Vec::new(),
    };
    let output_index = entry
        .get("outindex")
        .or_else(|| entry.get("jsoutindex"))
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(ReceivedOutput {
        txid: str_field(entry, "txid")?.to_string(),
        height: entry.get("blockheight").and_then(Value::as_u64),
        output_index: u32::try_from(output_index)
            .map_err(|_| RpcError::InvalidResponse("output index out of range".into()))?,
        amount: amount_zat(entry)?,
        memo,
    })
}

fn parse_operation_status(response: &Value) -> Result<OperationStatus, RpcError> {
    let Some(entry) = response.as_array().and_then(|ops| ops.first()) else {
        return Ok(OperationStatus::Missing);
    };
    let status = match str_field(entry, "status")? {
        "queued" => OperationStatus::Queued,
        "executing" => OperationStatus::Executing,
        "success" => {
            let txid = entry
                .get("result")
                .and_then(|r| r.get("txid"))
                .and_then(Value::as_str)
                .ok_or_else(|| RpcError::InvalidResponse("success without txid".into()))?;
            OperationStatus::Success {
                txid: txid.to_string(),
            }
        }
        "failed" => OperationStatus::Failed {
            message: entry
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("operation failed")
                .to_string(),
        },
        "cancelled" => OperationStatus::Failed {
            message: "operation cancelled by node".into(),
        },
        other => {
            debug!(status = other, "unrecognised operation status");
            OperationStatus::Missing
        }
    };
    Ok(status)
}

/// [`WalletNode`] over JSON-RPC.
pub struct RpcWalletNode {
    transport: Arc<dyn RpcTransport>,
}

impl RpcWalletNode {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl WalletNode for RpcWalletNode {
    async fn import_key(&self, spending_key: &SpendingKey) -> Result<(), RpcError> {
        self.transport
            .call("z_importkey", vec![json!(spending_key.expose()), json!("whenkeyisnew")])
            .await?;
        Ok(())
    }

    async fn send_shielded(&self, request: &ShieldedSend) -> Result<String, RpcError> {
        let recipients = json!([{
            "address": request.to,
            "amount": zat_to_coins(request.amount),
            "memo": hex::encode(request.memo),
        }]);
        let params = vec![
            json!(request.from),
            recipients,
            json!(SEND_MIN_CONF),
            json!(zat_to_coins(request.fee)),
        ];
        let opid = self.transport.call("z_sendmany", params).await?;
        let opid = opid
            .as_str()
            .ok_or_else(|| RpcError::InvalidResponse("operation id is not a string".into()))?;
        info!(endpoint = %self.transport.endpoint(), opid, "shielded send submitted");
        Ok(opid.to_string())
    }

    async fn operation_status(&self, operation_id: &str) -> Result<OperationStatus, RpcError> {
        let response = self
            .transport
            .call("z_getoperationstatus", vec![json!([operation_id])])
            .await?;
        parse_operation_status(&response)
    }

    async fn broadcast_raw(&self, raw_hex: &str) -> Result<String, RpcError> {
        let txid = self
            .transport
            .call("sendrawtransaction", vec![json!(raw_hex)])
            .await?;
        txid.as_str()
            .map(str::to_string)
            .ok_or_else(|| RpcError::InvalidResponse("txid is not a string".into()))
    }

    async fn list_received(&self, address: &str) -> Result<Vec<ReceivedOutput>, RpcError> {
        let response = self
            .transport
            .call("z_listreceivedbyaddress", vec![json!(address), json!(0)])
            .await?;
        response
            .as_array()
            .ok_or_else(|| RpcError::InvalidResponse("expected an array".into()))?
            .iter()
            .map(parse_received)
            .collect()
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionInfo, RpcError> {
        let response = self
            .transport
            .call("getrawtransaction", vec![json!(txid), json!(1)])
            .await?;
        Ok(TransactionInfo {
            txid: txid.to_string(),
            // Mempool transactions carry no confirmations field.
            confirmations: response.get("confirmations").and_then(Value::as_u64).unwrap_or(0),
            height: response.get("height").and_then(Value::as_u64),
        })
    }

    async fn balance(&self, address: &str) -> Result<u64, RpcError> {
        let response = self.transport.call("z_getbalance", vec![json!(address)]).await?;
        let coins = response
            .as_f64()
            .ok_or_else(|| RpcError::InvalidResponse("balance is not a number".into()))?;
        coins_to_zat(coins)
    }
}

/// [`NoteSource`] served by a light-wallet sidecar over JSON-RPC.
///
/// The sidecar owns the synced commitment tree and answers `getutxos`,
/// `getwitness`, and `getanchorheight` with the JSON form of the core types.
pub struct RpcNoteSource {
    transport: Arc<dyn RpcTransport>,
}

impl RpcNoteSource {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl NoteSource for RpcNoteSource {
    async fn get_utxos(&self, address: &str) -> Result<Vec<ShieldedNote>, RpcError> {
        decode(self.transport.call("getutxos", vec![json!(address)]).await?)
    }

    async fn get_witness(&self, note: &ShieldedNote) -> Result<IncrementalWitness, RpcError> {
        let note =
            serde_json::to_value(note).map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        decode(self.transport.call("getwitness", vec![note]).await?)
    }

    async fn get_anchor_height(&self) -> Result<u64, RpcError> {
        decode(self.transport.call("getanchorheight", vec![]).await?)
    }
}
