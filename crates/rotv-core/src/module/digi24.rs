//! Digi24: free provider without authentication.
//!
//! The channel catalog is one public JSON document that already carries
//! the HLS URL per channel, so `update_channels` caches both the
//! normalized list and an id-to-url map for stream resolution. `login` is
//! a no-op returning an empty token list.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::module::{
    classify_response, Channel, ModuleContext, ModuleError, Page, ProviderModule,
    StreamDescriptor, VodEpisode, VodShow,
};

pub const MODULE_ID: &str = "digi24";
const DEFAULT_BASE_URL: &str = "https://www.digi24.ro";

pub struct Digi24 {
    ctx: ModuleContext,
    base_url: String,
}

#[derive(Deserialize)]
struct UpstreamChannel {
    id: String,
    name: String,
    stream_url: String,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

impl Digi24 {
    pub fn new(ctx: ModuleContext) -> Self {
        Self {
            ctx,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn streams_cache_key(&self) -> String {
        format!("{}:streams", self.id())
    }

    async fn refresh_catalog(&self) -> Result<(Vec<Channel>, HashMap<String, String>), ModuleError>
    {
        let url = format!("{}/api/live/channels.json", self.base_url);
        let resp = self
            .ctx
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModuleError::from_transport(e, &url))?;
        let upstream: Vec<UpstreamChannel> = classify_response(resp)?
            .json()
            .await
            .map_err(|e| ModuleError::Internal(format!("bad payload from {url}: {e}")))?;

        let mut streams = HashMap::with_capacity(upstream.len());
        let channels: Vec<Channel> = upstream
            .into_iter()
            .map(|c| {
                streams.insert(c.id.clone(), c.stream_url);
                Channel {
                    id: c.id,
                    name: c.name,
                    logo: c.logo,
                    category: c.category,
                }
            })
            .collect();

        debug!(module = MODULE_ID, count = channels.len(), "Refreshed channel list");
        Ok((channels, streams))
    }
}

#[async_trait]
impl ProviderModule for Digi24 {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn display_name(&self) -> &str {
        "Digi24"
    }

    fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    async fn login(&self, _username: &str, _password: &str) -> Result<Vec<String>, ModuleError> {
        // Free provider; there is nothing to authenticate against.
        Ok(Vec::new())
    }

    async fn update_channels(&self) -> Result<Vec<Channel>, ModuleError> {
        let (channels, streams) = self.refresh_catalog().await?;
        let ttl = self.ctx.config.channel_ttl;
        self.ctx.cache.set(
            &self.channels_cache_key(),
            serde_json::to_value(&channels).map_err(|e| ModuleError::Internal(e.to_string()))?,
            ttl,
        );
        self.ctx.cache.set(
            &self.streams_cache_key(),
            serde_json::to_value(&streams).map_err(|e| ModuleError::Internal(e.to_string()))?,
            ttl,
        );
        Ok(channels)
    }

    async fn live_stream(&self, channel_id: &str) -> Result<StreamDescriptor, ModuleError> {
        let streams: HashMap<String, String> = match self
            .ctx
            .cache
            .get(&self.streams_cache_key())
            .and_then(|v| serde_json::from_value(v).ok())
        {
            Some(map) => map,
            None => {
                let (_, streams) = self.refresh_catalog().await?;
                self.ctx.cache.set(
                    &self.streams_cache_key(),
                    serde_json::to_value(&streams)
                        .map_err(|e| ModuleError::Internal(e.to_string()))?,
                    self.ctx.config.channel_ttl,
                );
                streams
            }
        };

        streams
            .get(channel_id)
            .map(|url| StreamDescriptor::open(url.clone()))
            .ok_or_else(|| ModuleError::NotFound(format!("channel '{channel_id}'")))
    }

    async fn vod_shows(
        &self,
        _page: u32,
        _search: Option<&str>,
    ) -> Result<Page<VodShow>, ModuleError> {
        // News channels only; there is no VOD catalog upstream.
        Ok(Page::single(Vec::new()))
    }

    async fn vod_episodes(
        &self,
        show_id: &str,
        _page: u32,
    ) -> Result<Page<VodEpisode>, ModuleError> {
        Err(ModuleError::NotFound(format!("show '{show_id}'")))
    }

    async fn vod_stream(
        &self,
        show_id: &str,
        _episode_id: &str,
    ) -> Result<StreamDescriptor, ModuleError> {
        Err(ModuleError::NotFound(format!("show '{show_id}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_module(base_url: &str) -> Digi24 {
        let dir = std::env::temp_dir().join(format!("rotv-digi-{}", uuid::Uuid::new_v4()));
        let ctx = ModuleContext::new(GatewayConfig::default().with_auth_dir(dir));
        Digi24::new(ctx).with_base_url(base_url)
    }

    fn catalog_body() -> serde_json::Value {
        serde_json::json!([
            {
                "id": "digi24",
                "name": "Digi24 HD",
                "stream_url": "https://live.digi24.ro/digi24/index.m3u8",
                "category": "news"
            },
            {
                "id": "digisport1",
                "name": "Digi Sport 1",
                "stream_url": "https://live.digi24.ro/ds1/index.m3u8"
            }
        ])
    }

    #[tokio::test]
    async fn login_is_a_noop() {
        let module = test_module("http://127.0.0.1:1");
        let tokens = module.login("", "").await.unwrap();
        assert!(tokens.is_empty());
    }

    #[tokio::test]
    async fn update_channels_normalizes_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live/channels.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let channels = module.update_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "digi24");
        assert_eq!(channels[0].category.as_deref(), Some("news"));
    }

    #[tokio::test]
    async fn live_stream_resolves_without_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live/channels.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let desc = module.live_stream("digisport1").await.unwrap();
        assert_eq!(desc.upstream_url, "https://live.digi24.ro/ds1/index.m3u8");
        assert!(!desc.requires_auth);
        assert!(desc.headers.is_empty());
    }

    #[tokio::test]
    async fn live_stream_unknown_channel_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/live/channels.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_body()))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let err = module.live_stream("nope").await.unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)), "{err}");
    }

    #[tokio::test]
    async fn vod_catalog_is_empty() {
        let module = test_module("http://127.0.0.1:1");
        let page = module.vod_shows(1, None).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total_pages, 1);

        let err = module.vod_stream("x", "y").await.unwrap_err();
        assert!(matches!(err, ModuleError::NotFound(_)), "{err}");
    }
}
