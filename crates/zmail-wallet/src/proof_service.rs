//! HTTP client for an external proof-generation service.
//!
//! The service exposes:
//! - `POST /proofs/build-transaction` building a complete transaction
//! - `GET /health`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::builder::TransactionPlan;
use crate::error::WalletError;
use crate::prover::{ProvenTransaction, TransactionProver};

/// Default request timeout. Proof generation is slow.
pub const DEFAULT_PROOF_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct BuildTransactionRequest<'a> {
    spending_key: &'a str,
    from_address: &'a str,
    to_address: &'a str,
    /// Zatoshis as a decimal string.
    amount: String,
    memo: &'a [u8],
    lightwalletd_endpoint: Option<&'a str>,
}

#[derive(Deserialize)]
struct BuildTransactionResponse {
    #[serde(default)]
    raw_transaction: Vec<u8>,
    txid: Option<String>,
    error: Option<String>,
}

/// [`TransactionProver`] backed by a proof service over HTTP.
pub struct ProofServiceProver {
    client: Client,
    base_url: Url,
    lightwalletd_endpoint: Option<String>,
}

impl ProofServiceProver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, WalletError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| WalletError::ProofService(format!("invalid url {base_url}: {e}")))?;
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::ProofService(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            lightwalletd_endpoint: None,
        })
    }

    /// Light-client server the service should read chain data from.
    pub fn with_lightwalletd(mut self, endpoint: impl Into<String>) -> Self {
        self.lightwalletd_endpoint = Some(endpoint.into());
        self
    }

    fn url(&self, path: &str) -> Result<Url, WalletError> {
        self.base_url
            .join(path)
            .map_err(|e| WalletError::ProofService(e.to_string()))
    }

    /// Whether the service answers its health check.
    pub async fn health(&self) -> bool {
        let Ok(url) = self.url("health") else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "proof service health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl TransactionProver for ProofServiceProver {
    async fn prove(&self, plan: &TransactionPlan) -> Result<ProvenTransaction, WalletError> {
        let primary = plan
            .primary_output()
            .ok_or_else(|| WalletError::InvalidPlan("no outputs".into()))?;
        let body = BuildTransactionRequest {
            spending_key: plan.spending_key.expose(),
            from_address: &plan.from,
            to_address: &primary.address,
            amount: primary.value.to_string(),
            memo: &primary.memo,
            lightwalletd_endpoint: self.lightwalletd_endpoint.as_deref(),
        };

        let resp = self
            .client
            .post(self.url("proofs/build-transaction")?)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::ProofService(e.without_url().to_string()))?;
        let status = resp.status();
        let parsed: BuildTransactionResponse = resp
            .json()
            .await
            .map_err(|e| WalletError::ProofService(format!("HTTP {status}: {e}")))?;

        if let Some(message) = parsed.error {
            warn!(%status, "proof service refused transaction");
            return Err(WalletError::ProofServiceRefused {
                status: status.as_u16(),
                message,
            });
        }
        if parsed.raw_transaction.is_empty() {
            return Err(WalletError::ProofService(format!(
                "HTTP {status}: empty transaction"
            )));
        }
        Ok(ProvenTransaction {
            raw: parsed.raw_transaction,
            txid: parsed.txid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use zmail_core::constants::MEMO_SIZE;
    use zmail_core::types::{IncrementalWitness, ShieldedNote, SpendingKey};

    use crate::builder::{PlannedInput, PlannedOutput};

    /// One-shot HTTP server answering with `status` and `body`. Returns the
    /// base URL and a handle yielding the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}/"), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let content_length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= header_end + 4 + content_length
    }

    fn plan() -> TransactionPlan {
        TransactionPlan {
            spending_key: SpendingKey::new("secret-extended-key-test"),
            from: "zs1sender".into(),
            inputs: vec![PlannedInput {
                note: ShieldedNote {
                    value: 20_000,
                    nullifier: [1; 32],
                    rho: [2; 32],
                    recipient: [3; 32],
                },
                witness: IncrementalWitness {
                    position: 0,
                    path: vec![],
                    cursor: None,
                },
            }],
            outputs: vec![PlannedOutput {
                address: "zs1recipient".into(),
                value: 10_000,
                memo: vec![0; MEMO_SIZE],
            }],
            fee: 10_000,
            anchor_height: 1,
        }
    }

    #[tokio::test]
    async fn prove_returns_raw_transaction() {
        let (url, handle) =
            serve_once("200 OK", r#"{"raw_transaction":[4,0,0,128],"txid":"ab12","error":null}"#)
                .await;
        let prover = ProofServiceProver::new(&url, Duration::from_secs(5)).unwrap();
        let tx = prover.prove(&plan()).await.unwrap();
        assert_eq!(tx.raw, vec![4, 0, 0, 128]);
        assert_eq!(tx.txid.as_deref(), Some("ab12"));

        let request = handle.await.unwrap();
        assert!(request.starts_with("POST /proofs/build-transaction"));
        assert!(request.contains(r#""amount":"10000""#));
        assert!(request.contains(r#""to_address":"zs1recipient""#));
    }

    #[tokio::test]
    async fn prove_surfaces_service_error() {
        let (url, _handle) = serve_once(
            "501 Not Implemented",
            r#"{"raw_transaction":[],"txid":null,"error":"Transaction building is being implemented"}"#,
        )
        .await;
        let prover = ProofServiceProver::new(&url, Duration::from_secs(5)).unwrap();
        let err = prover.prove(&plan()).await.unwrap_err();
        assert_eq!(
            err,
            WalletError::ProofServiceRefused {
                status: 501,
                message: "Transaction building is being implemented".into(),
            }
        );
    }

    #[tokio::test]
    async fn unreadable_answer_is_a_transport_failure() {
        let (url, _handle) = serve_once("502 Bad Gateway", "<html>upstream down</html>").await;
        let prover = ProofServiceProver::new(&url, Duration::from_secs(5)).unwrap();
        let err = prover.prove(&plan()).await.unwrap_err();
        assert!(matches!(err, WalletError::ProofService(_)), "{err:?}");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (url, handle) = serve_once("200 OK", r#""OK""#).await;
        let prover = ProofServiceProver::new(&url, Duration::from_secs(5)).unwrap();
        assert!(prover.health().await);
        assert!(handle.await.unwrap().starts_with("GET /health"));
    }

    #[tokio::test]
    async fn unreachable_service_is_unhealthy() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let prover =
            ProofServiceProver::new(&format!("http://{addr}/"), Duration::from_secs(1)).unwrap();
        assert!(!prover.health().await);
    }

    #[test]
    fn base_path_is_preserved() {
        let prover = ProofServiceProver::new("http://localhost:8080/api", Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            prover.url("health").unwrap().as_str(),
            "http://localhost:8080/api/health"
        );
    }

    #[test]
    fn invalid_url_rejected() {
        assert!(ProofServiceProver::new("not a url", Duration::from_secs(1)).is_err());
    }
}
