//! RPC capability detection.
//!
//! Detection runs once per endpoint and is cached in a [`CapabilityCache`]
//! owned by whoever builds the router. Each endpoint moves through
//!
//! ```text
//! Unknown -> Probing -> LocalFull | PublicLimited | PublicNone
//! ```
//!
//! Probes never change wallet state: loopback nodes are trusted to offer the
//! full wallet surface without being asked, and remote nodes only see calls
//! that are either read-only or missing required parameters.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info};
use zmail_core::traits::RpcTransport;
use zmail_core::types::{ProviderType, RpcCapabilities};

use crate::classify::{ErrorClass, ErrorClassifier, SubstringClassifier};

/// Hosts of known public light-wallet and RPC providers.
pub const DEFAULT_PUBLIC_PROVIDERS: &[&str] = &[
    "zec.rocks",
    "lightwalletd.com",
    "zcashexplorer.app",
    "nighthawkwallet.com",
    "zecwallet.co",
];

/// Detection progress for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Unknown,
    Probing,
    /// Loopback node, full wallet surface assumed.
    LocalFull,
    /// Remote endpoint with at least one send path.
    PublicLimited,
    /// Remote endpoint with no usable send path.
    PublicNone,
}

impl DetectionState {
    fn for_capabilities(caps: &RpcCapabilities) -> Self {
        if caps.is_local_node {
            Self::LocalFull
        } else if caps.supports_wallet_send() || caps.supports_send_raw_transaction {
            Self::PublicLimited
        } else {
            Self::PublicNone
        }
    }
}

/// Cached detection result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedCapabilities {
    pub capabilities: RpcCapabilities,
    pub detected_at: DateTime<Utc>,
}

/// Endpoint-keyed capability cache.
///
/// Concurrent first detections of the same endpoint may both probe; the last
/// writer wins, and both results are equivalent.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: DashMap<String, CachedCapabilities>,
    in_flight: DashMap<String, ()>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, endpoint: &str) -> Option<CachedCapabilities> {
        self.entries.get(endpoint).map(|e| e.value().clone())
    }

    pub fn insert(&self, endpoint: &str, capabilities: RpcCapabilities) {
        self.entries.insert(
            endpoint.to_string(),
            CachedCapabilities {
                capabilities,
                detected_at: Utc::now(),
            },
        );
    }

    /// Forget `endpoint`. Returns whether anything was cached.
    pub fn invalidate(&self, endpoint: &str) -> bool {
        self.entries.remove(endpoint).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn state(&self, endpoint: &str) -> DetectionState {
        if let Some(cached) = self.entries.get(endpoint) {
            DetectionState::for_capabilities(&cached.capabilities)
        } else if self.in_flight.contains_key(endpoint) {
            DetectionState::Probing
        } else {
            DetectionState::Unknown
        }
    }
}

/// Marks an endpoint as being detected until dropped, including when the
/// detecting future is abandoned mid-call.
struct InFlight<'a> {
    cache: &'a CapabilityCache,
    endpoint: &'a str,
}

impl<'a> InFlight<'a> {
    fn mark(cache: &'a CapabilityCache, endpoint: &'a str) -> Self {
        cache.in_flight.insert(endpoint.to_string(), ());
        Self { cache, endpoint }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.remove(self.endpoint);
    }
}

/// Classify `endpoint` by host.
///
/// Returns `(is_local, provider_type)`. Unparseable endpoints are `Unknown`.
pub fn classify_endpoint(endpoint: &str, public_providers: &[String]) -> (bool, ProviderType) {
    let parsed = Url::parse(endpoint)
        .ok()
        .filter(|u| u.has_host())
        .or_else(|| Url::parse(&format!("http://{endpoint}")).ok());
    let Some(host) = parsed.as_ref().and_then(|u| u.host_str()) else {
        return (false, ProviderType::Unknown);
    };
    let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();

    let is_loopback = host == "localhost"
        || host.ends_with(".localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback());
    if is_loopback {
        return (true, ProviderType::Local);
    }

    let known = public_providers.iter().any(|p| {
        let p = p.to_ascii_lowercase();
        host == p || host.ends_with(&format!(".{p}"))
    });
    let provider = if known { ProviderType::Public } else { ProviderType::Unknown };
    (false, provider)
}

/// Probes an endpoint and caches what it can do.
pub struct CapabilityDetector {
    transport: Arc<dyn RpcTransport>,
    cache: Arc<CapabilityCache>,
    classifier: Arc<dyn ErrorClassifier>,
    public_providers: Vec<String>,
}

impl CapabilityDetector {
    pub fn new(transport: Arc<dyn RpcTransport>, cache: Arc<CapabilityCache>) -> Self {
        Self {
            transport,
            cache,
            classifier: Arc::new(SubstringClassifier::default()),
            public_providers: DEFAULT_PUBLIC_PROVIDERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_public_providers(mut self, providers: Vec<String>) -> Self {
        self.public_providers = providers;
        self
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    pub fn state(&self) -> DetectionState {
        self.cache.state(self.endpoint())
    }

    /// Cached capabilities, detecting them first if needed.
    pub async fn detect_capabilities(&self) -> RpcCapabilities {
        if let Some(cached) = self.cache.get(self.endpoint()) {
            return cached.capabilities;
        }
        self.detect().await
    }

    /// Drop the cached result and detect again.
    pub async fn refresh_capabilities(&self) -> RpcCapabilities {
        self.cache.invalidate(self.endpoint());
        self.detect().await
    }

    async fn detect(&self) -> RpcCapabilities {
        let endpoint = self.endpoint().to_string();
        let _in_flight = InFlight::mark(&self.cache, &endpoint);

        let (is_local, provider_type) = classify_endpoint(&endpoint, &self.public_providers);
        let reachable = self.transport.call("getinfo", vec![]).await.is_ok();

        let mut caps = RpcCapabilities {
            supports_send_raw_transaction: reachable,
            is_local_node: is_local,
            provider_type,
            ..RpcCapabilities::default()
        };

        if is_local {
            caps.supports_wallet_methods = true;
            caps.supports_z_send_many = true;
            caps.supports_z_import_key = true;
        } else {
            caps.supports_wallet_methods = self.method_exists("z_listaddresses", vec![]).await;
            // Both are called without their required arguments.
            caps.supports_z_send_many = self.method_exists("z_sendmany", vec![]).await;
            caps.supports_z_import_key = self.method_exists("z_importkey", vec![]).await;
        }

        self.cache.insert(&endpoint, caps);
        info!(
            endpoint = %endpoint,
            local = caps.is_local_node,
            provider = %caps.provider_type,
            wallet_send = caps.supports_wallet_send(),
            raw_broadcast = caps.supports_send_raw_transaction,
            "rpc capabilities detected"
        );
        caps
    }

    async fn method_exists(&self, method: &str, params: Vec<Value>) -> bool {
        match self.transport.call(method, params).await {
            Ok(_) => true,
            Err(e) => {
                let class = self.classifier.classify(&e);
                debug!(method, error = %e, ?class, "capability probe error");
                class == ErrorClass::Rejected
            }
        }
    }
}
