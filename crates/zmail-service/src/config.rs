//! Layered configuration for zMail.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `ZMAIL_` environment variables, with `__` between nested keys
//!    (`ZMAIL_RPC__ENDPOINT=http://10.0.0.2:8232` sets `rpc.endpoint`)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zmail_core::constants::{
    DEFAULT_CONFIRMATION_INTERVAL_SECS, DEFAULT_CONFIRMATION_TIMEOUT_SECS,
    DEFAULT_INTER_PART_DELAY_MS, DEFAULT_MESSAGE_AMOUNT,
};
use zmail_core::error::ZmailError;
use zmail_rpc::{RouterConfig, RpcConfig};
use zmail_wallet::proof_service::DEFAULT_PROOF_TIMEOUT;
use zmail_wallet::{ProofServiceProver, TransactionProver, UnavailableProver};

const ENV_PREFIX: &str = "ZMAIL";

/// Message service timings and amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Pause between consecutive parts of one message, in milliseconds.
    pub inter_part_delay_ms: u64,
    /// Seconds between confirmation polls.
    pub confirmation_interval_secs: u64,
    /// Give up waiting for confirmations after this many seconds.
    pub confirmation_timeout_secs: u64,
    /// Value in zatoshis attached to every message transaction.
    pub message_amount: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            inter_part_delay_ms: DEFAULT_INTER_PART_DELAY_MS,
            confirmation_interval_secs: DEFAULT_CONFIRMATION_INTERVAL_SECS,
            confirmation_timeout_secs: DEFAULT_CONFIRMATION_TIMEOUT_SECS,
            message_amount: DEFAULT_MESSAGE_AMOUNT,
        }
    }
}

impl ServiceConfig {
    pub fn inter_part_delay(&self) -> Duration {
        Duration::from_millis(self.inter_part_delay_ms)
    }

    pub fn confirmation_interval(&self) -> Duration {
        Duration::from_secs(self.confirmation_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

/// Where raw-transaction proofs come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProverConfig {
    /// Base URL of an HTTP proof service. Without one, raw sends fail.
    pub proof_service_url: Option<String>,
    /// Light-client server the proof service should read chain data from.
    pub lightwalletd_endpoint: Option<String>,
    /// Directory holding the Sapling parameter files.
    pub params_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            proof_service_url: None,
            lightwalletd_endpoint: None,
            params_dir: None,
            timeout_secs: DEFAULT_PROOF_TIMEOUT.as_secs(),
        }
    }
}

impl ProverConfig {
    /// The prover this configuration describes.
    pub fn build_prover(&self) -> Result<Arc<dyn TransactionProver>, ZmailError> {
        Ok(match self.proof_service()? {
            Some(prover) => Arc::new(prover),
            None => Arc::new(UnavailableProver),
        })
    }

    /// Client for the configured proof service, if any.
    pub fn proof_service(&self) -> Result<Option<ProofServiceProver>, ZmailError> {
        let Some(url) = &self.proof_service_url else {
            return Ok(None);
        };
        let mut prover = ProofServiceProver::new(url, Duration::from_secs(self.timeout_secs))
            .map_err(|e| ZmailError::Config(e.to_string()))?;
        if let Some(endpoint) = &self.lightwalletd_endpoint {
            prover = prover.with_lightwalletd(endpoint.clone());
        }
        Ok(Some(prover))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZmailConfig {
    /// Root directory for persisted message records.
    pub data_dir: PathBuf,
    pub rpc: RpcConfig,
    pub router: RouterConfig,
    pub service: ServiceConfig,
    pub prover: ProverConfig,
}

impl Default for ZmailConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zmail");

        Self {
            data_dir,
            rpc: RpcConfig::default(),
            router: RouterConfig::default(),
            service: ServiceConfig::default(),
            prover: ProverConfig::default(),
        }
    }
}

impl ZmailConfig {
    /// Load defaults, then `path` (which must exist if given), then the
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ZmailError> {
        Self::load_with_env(path, std::env::vars())
    }

    /// [`load`](Self::load) with an explicit environment.
    pub fn load_with_env(
        path: Option<&Path>,
        env: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self, ZmailError> {
        let defaults = config::Config::try_from(&Self::default()).map_err(config_error)?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let prefix = format!("{ENV_PREFIX}_");
        let env = env
            .into_iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .collect();
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(Some(env)),
        );

        builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(config_error)
    }

    /// Directory holding message records.
    pub fn messages_dir(&self) -> PathBuf {
        self.data_dir.join("messages")
    }
}

fn config_error(e: config::ConfigError) -> ZmailError {
    ZmailError::Config(e.to_string())
}
