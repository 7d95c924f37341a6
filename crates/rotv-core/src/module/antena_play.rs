//! Antena Play: token-authenticated provider.
//!
//! Login trades credentials plus a generated device id for a bearer token;
//! every catalog and stream call carries that token. The provider answers
//! 401 for bad or expired tokens and 403 when its anti-abuse layer refuses
//! the caller's IP, and the two must stay distinguishable.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::hashed_key;
use crate::module::{
    classify_response, Channel, ModuleContext, ModuleError, Page, Pagination, ProviderModule,
    StreamDescriptor, VodEpisode, VodShow,
};

pub const MODULE_ID: &str = "antena-play";
const DEFAULT_BASE_URL: &str = "https://restapi.antenaplay.ro";

pub struct AntenaPlay {
    ctx: ModuleContext,
    base_url: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ChannelsResponse {
    data: Vec<UpstreamChannel>,
}

#[derive(Deserialize)]
struct UpstreamChannel {
    id: u64,
    name: String,
    #[serde(default)]
    logo: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Deserialize)]
struct PlayResponse {
    url: String,
}

#[derive(Deserialize)]
struct PagedResponse<T> {
    data: Vec<T>,
    pagination: UpstreamPagination,
}

#[derive(Deserialize)]
struct UpstreamPagination {
    current_page: u32,
    total_pages: u32,
}

#[derive(Deserialize)]
struct UpstreamShow {
    id: u64,
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    poster: Option<String>,
}

#[derive(Deserialize)]
struct UpstreamEpisode {
    id: u64,
    title: String,
    #[serde(default)]
    season: Option<u32>,
    #[serde(default)]
    episode: Option<u32>,
}

impl AntenaPlay {
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

    fn token(&self) -> Result<String, ModuleError> {
        self.auth()
            .primary_token()
            .map(str::to_string)
            .ok_or_else(|| {
                ModuleError::Authentication("no usable token persisted; login first".into())
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ModuleError> {
        let token = self.token()?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .ctx
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(query)
            .send()
            .await
            .map_err(|e| ModuleError::from_transport(e, &url))?;
        classify_response(resp)?
            .json::<T>()
            .await
            .map_err(|e| ModuleError::Internal(format!("bad payload from {url}: {e}")))
    }
}

#[async_trait]
impl ProviderModule for AntenaPlay {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn display_name(&self) -> &str {
        "Antena Play"
    }

    fn context(&self) -> &ModuleContext {
        &self.ctx
    }

    async fn login(&self, username: &str, password: &str) -> Result<Vec<String>, ModuleError> {
        let url = format!("{}/v1/auth/login", self.base_url);
        let device_id = Uuid::new_v4().to_string();
        let resp = self
            .ctx
            .client
            .post(&url)
            .json(&json!({
                "username": username,
                "password": password,
                "device_id": device_id,
                "device_type": "web",
            }))
            .send()
            .await
            .map_err(|e| ModuleError::from_transport(e, &url))?;

        let body: LoginResponse = classify_response(resp)?
            .json()
            .await
            .map_err(|e| ModuleError::Internal(format!("bad login payload: {e}")))?;

        info!(module = MODULE_ID, "Login handshake succeeded");
        let mut tokens = vec![body.token];
        tokens.extend(body.refresh_token);
        Ok(tokens)
    }

    async fn update_channels(&self) -> Result<Vec<Channel>, ModuleError> {
        let body: ChannelsResponse = self.get_json("/v1/channels", &[]).await?;
        let channels: Vec<Channel> = body
            .data
            .into_iter()
            .map(|c| Channel {
                id: c.id.to_string(),
                name: c.name,
                logo: c.logo,
                category: c.category,
            })
            .collect();

        debug!(module = MODULE_ID, count = channels.len(), "Refreshed channel list");
        self.ctx.cache.set(
            &self.channels_cache_key(),
            serde_json::to_value(&channels)
                .map_err(|e| ModuleError::Internal(e.to_string()))?,
            self.ctx.config.channel_ttl,
        );
        Ok(channels)
    }

    async fn live_stream(&self, channel_id: &str) -> Result<StreamDescriptor, ModuleError> {
        let key = format!("{}:live:{channel_id}", self.id());
        if let Some(cached) = self.ctx.cache.get(&key) {
            if let Ok(desc) = serde_json::from_value::<StreamDescriptor>(cached) {
                return Ok(desc);
            }
        }

        let body: PlayResponse = self
            .get_json(&format!("/v1/channels/{channel_id}/play"), &[])
            .await?;
        let desc = StreamDescriptor::authenticated(body.url, &self.token()?);

        self.ctx.cache.set(
            &key,
            serde_json::to_value(&desc).map_err(|e| ModuleError::Internal(e.to_string()))?,
            self.ctx.config.stream_ttl,
        );
        Ok(desc)
    }

    async fn vod_shows(
        &self,
        page: u32,
        search: Option<&str>,
    ) -> Result<Page<VodShow>, ModuleError> {
        // Search terms are arbitrary user input; they go into the key
        // hashed, not raw.
        let key = match search {
            Some(term) => format!(
                "{}:vod:search:{}:page:{page}",
                self.id(),
                hashed_key(&[term])
            ),
            None => format!("{}:vod:page:{page}", self.id()),
        };
        if let Some(cached) = self.ctx.cache.get(&key) {
            if let Ok(p) = serde_json::from_value::<Page<VodShow>>(cached) {
                return Ok(p);
            }
        }

        let mut query = vec![("page", page.to_string())];
        if let Some(term) = search {
            query.push(("search", term.to_string()));
        }
        let body: PagedResponse<UpstreamShow> = self.get_json("/v1/vod", &query).await?;
        let result = Page {
            data: body
                .data
                .into_iter()
                .map(|s| VodShow {
                    id: s.id.to_string(),
                    name: s.name,
                    category: s.category,
                    poster: s.poster,
                })
                .collect(),
            pagination: Pagination {
                current_page: body.pagination.current_page,
                total_pages: body.pagination.total_pages,
            },
        };

        self.ctx.cache.set(
            &key,
            serde_json::to_value(&result).map_err(|e| ModuleError::Internal(e.to_string()))?,
            self.ctx.config.vod_ttl,
        );
        Ok(result)
    }

    async fn vod_episodes(
        &self,
        show_id: &str,
        page: u32,
    ) -> Result<Page<VodEpisode>, ModuleError> {
        let key = format!("{}:vod:{show_id}:page:{page}", self.id());
        if let Some(cached) = self.ctx.cache.get(&key) {
            if let Ok(p) = serde_json::from_value::<Page<VodEpisode>>(cached) {
                return Ok(p);
            }
        }

        let body: PagedResponse<UpstreamEpisode> = self
            .get_json(
                &format!("/v1/vod/{show_id}/episodes"),
                &[("page", page.to_string())],
            )
            .await?;
        let result = Page {
            data: body
                .data
                .into_iter()
                .map(|e| VodEpisode {
                    id: e.id.to_string(),
                    show_id: show_id.to_string(),
                    title: e.title,
                    season: e.season,
                    episode: e.episode,
                })
                .collect(),
            pagination: Pagination {
                current_page: body.pagination.current_page,
                total_pages: body.pagination.total_pages,
            },
        };

        self.ctx.cache.set(
            &key,
            serde_json::to_value(&result).map_err(|e| ModuleError::Internal(e.to_string()))?,
            self.ctx.config.vod_ttl,
        );
        Ok(result)
    }

    async fn vod_stream(
        &self,
        show_id: &str,
        episode_id: &str,
    ) -> Result<StreamDescriptor, ModuleError> {
        let key = format!("{}:vod:stream:{}", self.id(), hashed_key(&[show_id, episode_id]));
        if let Some(cached) = self.ctx.cache.get(&key) {
            if let Ok(desc) = serde_json::from_value::<StreamDescriptor>(cached) {
                return Ok(desc);
            }
        }

        let body: PlayResponse = self
            .get_json(&format!("/v1/vod/{show_id}/{episode_id}/play"), &[])
            .await?;
        let desc = StreamDescriptor::authenticated(body.url, &self.token()?);

        self.ctx.cache.set(
            &key,
            serde_json::to_value(&desc).map_err(|e| ModuleError::Internal(e.to_string()))?,
            self.ctx.config.stream_ttl,
        );
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthRecord;
    use crate::config::GatewayConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_module(base_url: &str) -> AntenaPlay {
        let dir = std::env::temp_dir().join(format!("rotv-ap-{}", Uuid::new_v4()));
        let ctx = ModuleContext::new(GatewayConfig::default().with_auth_dir(dir));
        AntenaPlay::new(ctx).with_base_url(base_url)
    }

    fn authenticate(module: &AntenaPlay, token: &str) {
        let record = AuthRecord {
            username: "u".into(),
            password: "p".into(),
            auth_tokens: vec![token.into()],
            last_updated: chrono::Utc::now(),
        };
        module.set_auth(&record).unwrap();
    }

    #[tokio::test]
    async fn login_returns_tokens_most_recent_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "access-1",
                "refresh_token": "refresh-1"
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let tokens = module.login("user", "pass").await.unwrap();
        assert_eq!(tokens, vec!["access-1", "refresh-1"]);
    }

    #[tokio::test]
    async fn login_401_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let err = module.login("user", "wrong").await.unwrap_err();
        assert!(matches!(err, ModuleError::Authentication(_)), "{err}");
    }

    #[tokio::test]
    async fn login_403_is_upstream_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/auth/login"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        let err = module.login("user", "pass").await.unwrap_err();
        assert!(matches!(err, ModuleError::UpstreamBlocked(_)), "{err}");
    }

    #[tokio::test]
    async fn update_channels_without_token_fails_before_network() {
        let module = test_module("http://127.0.0.1:1");
        let err = module.update_channels().await.unwrap_err();
        assert!(matches!(err, ModuleError::Authentication(_)), "{err}");
    }

    #[tokio::test]
    async fn update_channels_sends_bearer_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/channels"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "id": 10, "name": "Antena 1", "category": "general" },
                    { "id": 11, "name": "Antena Stars" }
                ]
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "tok-1");

        let channels = module.update_channels().await.unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].id, "10");
        assert_eq!(channels[0].category.as_deref(), Some("general"));

        // Second call is served from cache.
        let cached = module.live_channels().await.unwrap();
        assert_eq!(cached, channels);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_token_surfaces_as_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/channels"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "stale-token");
        let err = module.update_channels().await.unwrap_err();
        assert!(matches!(err, ModuleError::Authentication(_)), "{err}");
    }

    #[tokio::test]
    async fn live_stream_builds_authenticated_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/channels/10/play"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://cdn.antenaplay.ro/live/a1/index.m3u8"
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "tok-1");

        let desc = module.live_stream("10").await.unwrap();
        assert_eq!(desc.upstream_url, "https://cdn.antenaplay.ro/live/a1/index.m3u8");
        assert!(desc.requires_auth);
        assert_eq!(desc.headers.get("Authorization").unwrap(), "Bearer tok-1");
    }

    #[tokio::test]
    async fn vod_shows_maps_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vod"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "id": 7, "name": "Insula", "category": "reality" } ],
                "pagination": { "current_page": 2, "total_pages": 9 }
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "tok-1");

        let page = module.vod_shows(2, None).await.unwrap();
        assert_eq!(page.data[0].name, "Insula");
        assert_eq!(page.pagination.current_page, 2);
        assert_eq!(page.pagination.total_pages, 9);
    }

    #[tokio::test]
    async fn vod_search_is_forwarded_and_cached_separately() {
        let server = MockServer::start().await;
        // Mount order matters: the search mock must win for search requests.
        Mock::given(method("GET"))
            .and(path("/v1/vod"))
            .and(query_param("search", "insula"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "id": 7, "name": "Insula" } ],
                "pagination": { "current_page": 1, "total_pages": 1 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/vod"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "id": 1, "name": "Observator" } ],
                "pagination": { "current_page": 1, "total_pages": 3 }
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "tok-1");

        let filtered = module.vod_shows(1, Some("insula")).await.unwrap();
        assert_eq!(filtered.data[0].name, "Insula");

        let plain = module.vod_shows(1, None).await.unwrap();
        assert_eq!(plain.data[0].name, "Observator");

        // Repeat search is served from its own cache entry.
        let again = module.vod_shows(1, Some("insula")).await.unwrap();
        assert_eq!(again.data[0].name, "Insula");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn vod_stream_resolves_episode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/vod/7/1234/play"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://vod.antenaplay.ro/e/1234/index.m3u8"
            })))
            .mount(&server)
            .await;

        let module = test_module(&server.uri());
        authenticate(&module, "tok-1");

        let desc = module.vod_stream("7", "1234").await.unwrap();
        assert_eq!(desc.upstream_url, "https://vod.antenaplay.ro/e/1234/index.m3u8");
        assert!(desc.requires_auth);
    }
}
