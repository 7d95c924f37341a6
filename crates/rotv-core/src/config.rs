use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration shared by the gateway core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Global cap on cache entries; the oldest entry is evicted first (default: 2000).
    pub cache_max_entries: usize,
    /// HTTP request timeout for upstream calls.
    pub request_timeout: Duration,
    /// How long a refreshed channel list stays cached.
    pub channel_ttl: Duration,
    /// How long VOD catalog pages stay cached.
    pub vod_ttl: Duration,
    /// How long resolved stream descriptors stay cached. Short on purpose:
    /// provider stream URLs carry expiring tokens.
    pub stream_ttl: Duration,
    /// Directory holding per-module persisted auth records.
    pub auth_dir: PathBuf,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: 2000,
            request_timeout: Duration::from_secs(20),
            channel_ttl: Duration::from_secs(6 * 3600),
            vod_ttl: Duration::from_secs(30 * 60),
            stream_ttl: Duration::from_secs(120),
            auth_dir: PathBuf::from("auth"),
        }
    }
}

impl GatewayConfig {
    pub fn with_cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl = ttl;
        self
    }

    pub fn with_vod_ttl(mut self, ttl: Duration) -> Self {
        self.vod_ttl = ttl;
        self
    }

    pub fn with_stream_ttl(mut self, ttl: Duration) -> Self {
        self.stream_ttl = ttl;
        self
    }

    pub fn with_auth_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.auth_dir = dir.into();
        self
    }

    /// Shared upstream HTTP client. One per process; connection pooling
    /// matters because every request funnels through the same providers.
    pub fn build_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
            .expect("Failed to build HTTP client")
    }
}
