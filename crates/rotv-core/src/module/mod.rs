//! The capability contract every provider module satisfies, plus the
//! concrete provider implementations.
//!
//! The gateway is written entirely against [`ProviderModule`]; nothing
//! outside the registry branches on provider identity.

pub mod antena_play;
pub mod digi24;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{AuthRecord, AuthStore, AuthStoreError};
use crate::cache::Cache;
use crate::config::GatewayConfig;

#[derive(Debug, Error)]
pub enum ModuleError {
    /// The provider rejected the credentials or token (HTTP 401-equivalent).
    #[error("authentication rejected: {0}")]
    Authentication(String),
    /// The provider's anti-abuse layer rejected the request (HTTP
    /// 403-equivalent). Not a credential problem; rotating credentials
    /// will not help.
    #[error("blocked by provider: {0}")]
    UpstreamBlocked(String),
    #[error("unknown module '{0}'")]
    UnknownModule(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream returned status {status} for {url}")]
    Upstream { url: String, status: u16 },
    #[error("upstream timeout fetching {0}")]
    Timeout(String),
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error(transparent)]
    AuthStore(#[from] AuthStoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ModuleError {
    pub(crate) fn from_transport(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            ModuleError::Timeout(url.to_string())
        } else {
            ModuleError::Internal(format!("request to {url} failed: {err}"))
        }
    }
}

/// Maps a non-success upstream status to the matching error kind.
pub(crate) fn classify_response(resp: reqwest::Response) -> Result<reqwest::Response, ModuleError> {
    let status = resp.status();
    let url = resp.url().to_string();
    match status.as_u16() {
        200..=299 => Ok(resp),
        401 => Err(ModuleError::Authentication(format!(
            "provider rejected request to {url}"
        ))),
        403 => Err(ModuleError::UpstreamBlocked(format!(
            "provider refused request to {url}"
        ))),
        s => Err(ModuleError::Upstream { url, status: s }),
    }
}

/// Provider-normalized live channel record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VodShow {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VodEpisode {
    pub id: String,
    pub show_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
}

/// One page of a paginated catalog listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Page<T> {
    pub fn single(data: Vec<T>) -> Self {
        Self {
            data,
            pagination: Pagination {
                current_page: 1,
                total_pages: 1,
            },
        }
    }
}

/// A resolved upstream stream, input to the proxy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub upstream_url: String,
    pub requires_auth: bool,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl StreamDescriptor {
    pub fn open(upstream_url: impl Into<String>) -> Self {
        Self {
            upstream_url: upstream_url.into(),
            requires_auth: false,
            headers: HashMap::new(),
        }
    }

    pub fn authenticated(upstream_url: impl Into<String>, token: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        Self {
            upstream_url: upstream_url.into(),
            requires_auth: true,
            headers,
        }
    }
}

/// Shared collaborators handed to every module at construction.
///
/// Construction must stay cheap and network-free; modules only touch the
/// network inside their async operations.
#[derive(Clone)]
pub struct ModuleContext {
    pub cache: Arc<Cache>,
    pub auth: Arc<AuthStore>,
    pub client: reqwest::Client,
    pub config: GatewayConfig,
}

impl ModuleContext {
    pub fn new(config: GatewayConfig) -> Self {
        let client = config.build_client();
        Self {
            cache: Arc::new(Cache::new(config.cache_max_entries)),
            auth: Arc::new(AuthStore::new(&config.auth_dir)),
            client,
            config,
        }
    }
}

/// The capability contract: login, catalog refresh, live and VOD stream
/// resolution. One implementation per upstream provider.
#[async_trait]
pub trait ProviderModule: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn context(&self) -> &ModuleContext;

    /// Provider-specific login handshake. Returns tokens ordered most
    /// recently usable first. Modules without authentication return
    /// `Ok(vec![])`; callers must check the first token is non-empty
    /// rather than treat any `Ok` as success.
    async fn login(&self, username: &str, password: &str) -> Result<Vec<String>, ModuleError>;

    /// Refreshes the live catalog from upstream and replaces the cached
    /// list wholesale. Token rejections surface as
    /// [`ModuleError::Authentication`]; whether to re-login is the
    /// handler's decision, not the module's.
    async fn update_channels(&self) -> Result<Vec<Channel>, ModuleError>;

    async fn live_stream(&self, channel_id: &str) -> Result<StreamDescriptor, ModuleError>;

    /// One catalog page, optionally filtered server-side by `search`.
    async fn vod_shows(
        &self,
        page: u32,
        search: Option<&str>,
    ) -> Result<Page<VodShow>, ModuleError>;

    async fn vod_episodes(&self, show_id: &str, page: u32)
        -> Result<Page<VodEpisode>, ModuleError>;

    async fn vod_stream(
        &self,
        show_id: &str,
        episode_id: &str,
    ) -> Result<StreamDescriptor, ModuleError>;

    /// Cache-first channel list; falls back to a full refresh on miss.
    async fn live_channels(&self) -> Result<Vec<Channel>, ModuleError> {
        if let Some(cached) = self.context().cache.get(&self.channels_cache_key()) {
            if let Ok(list) = serde_json::from_value::<Vec<Channel>>(cached) {
                return Ok(list);
            }
        }
        self.update_channels().await
    }

    fn channels_cache_key(&self) -> String {
        format!("{}:channels", self.id())
    }

    fn auth(&self) -> AuthRecord {
        self.context().auth.load(self.id())
    }

    fn set_auth(&self, record: &AuthRecord) -> Result<(), AuthStoreError> {
        self.context().auth.save(self.id(), record)
    }

    fn clear_cache(&self) {
        self.context().cache.clear_module(self.id());
    }
}
