use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use rotv_core::hls::{
    combined_playlist, decode_segment_token, looks_like_playlist, rewrite_to_gateway, FetchError,
};
use rotv_core::{AuthRecord, ModuleError, ProviderModule, StreamDescriptor};

use crate::envelope::Envelope;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginBody {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    pub cors: Option<String>,
}

impl ManifestQuery {
    fn cors_enabled(&self) -> bool {
        self.cors.as_deref().is_some_and(|v| !v.is_empty() && v != "0")
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/modules", get(list_modules))
        .route("/clearcache", get(clear_all_cache))
        .route("/cors/{*url}", get(cors_proxy))
        .route("/{module}", get(module_info))
        .route("/{module}/login", post(login))
        .route("/{module}/updatechannels", get(update_channels))
        .route("/{module}/live", get(live_list))
        .route("/{module}/live/index.m3u8", get(live_playlist))
        .route("/{module}/live/{channel}/index.m3u8", get(live_channel_playlist))
        .route("/{module}/segment/{token}", get(segment))
        .route("/{module}/vod", get(vod_shows))
        .route("/{module}/vod/{show}", get(vod_episodes))
        .route("/{module}/vod/{show}/{episode}", get(vod_episode))
        .route(
            "/{module}/vod/{show}/{episode}/index.m3u8",
            get(vod_episode_playlist),
        )
        .route("/{module}/clearcache", get(clear_module_cache))
}

fn resolve(state: &AppState, module: &str) -> Result<Arc<dyn ProviderModule>, ApiError> {
    state
        .registry
        .resolve(module)
        .map_err(|e| ApiError::module(module, e))
}

/// GET /modules
async fn list_modules(State(state): State<AppState>) -> Json<Envelope> {
    Json(Envelope::success("gateway", json!(state.registry.ids())))
}

/// GET /:module
async fn module_info(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let record = m.auth();
    let ch_list = state
        .cache
        .get(&m.channels_cache_key())
        .unwrap_or(Value::Null);

    Ok(Json(Envelope::success(
        &module,
        json!({
            "module": m.id(),
            "name": m.display_name(),
            "authenticated": record.has_token(),
            "chList": ch_list,
        }),
    )))
}

fn first_token_usable(tokens: &[String]) -> bool {
    tokens.first().is_some_and(|t| !t.is_empty())
}

/// Request-body credentials win, then the persisted record, then the
/// per-module defaults from the config file.
fn pick_credentials(
    state: &AppState,
    module: &str,
    body: &LoginBody,
    record: &AuthRecord,
) -> (String, String) {
    if let (Some(username), Some(password)) = (&body.username, &body.password) {
        return (username.clone(), password.clone());
    }
    if record.has_credentials() {
        return (record.username.clone(), record.password.clone());
    }
    if let Some(creds) = state.credentials.get(module) {
        return (creds.username.clone(), creds.password.clone());
    }
    (String::new(), String::new())
}

/// POST /:module/login
async fn login(
    State(state): State<AppState>,
    Path(module): Path<String>,
    body: Option<Json<LoginBody>>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let record = m.auth();
    let (username, password) = pick_credentials(&state, &module, &body, &record);

    let tokens = m
        .login(&username, &password)
        .await
        .map_err(|e| ApiError::module(&module, e))?;

    if !first_token_usable(&tokens) {
        // Do not overwrite the last known-good record with an empty one.
        return Err(ApiError::module(
            &module,
            ModuleError::Authentication("login returned no usable token".into()),
        ));
    }

    let fresh = AuthRecord {
        username,
        password,
        auth_tokens: tokens.clone(),
        last_updated: Utc::now(),
    };
    m.set_auth(&fresh)
        .map_err(|e| ApiError::module(&module, e.into()))?;

    info!(module = %module, tokens = tokens.len(), "Login succeeded, auth record persisted");
    Ok(Json(Envelope::success(&module, json!(tokens))))
}

/// Re-login with persisted or configured credentials after a token
/// rejection. Returns an error when no credentials are available.
async fn relogin(
    state: &AppState,
    module: &str,
    m: &Arc<dyn ProviderModule>,
) -> Result<(), ApiError> {
    let record = m.auth();
    let (username, password) =
        pick_credentials(state, module, &LoginBody::default(), &record);
    if username.is_empty() {
        return Err(ApiError::module(
            module,
            ModuleError::Authentication("token rejected and no credentials available".into()),
        ));
    }

    let tokens = m
        .login(&username, &password)
        .await
        .map_err(|e| ApiError::module(module, e))?;
    if !first_token_usable(&tokens) {
        return Err(ApiError::module(
            module,
            ModuleError::Authentication("re-login returned no usable token".into()),
        ));
    }

    let fresh = AuthRecord {
        username,
        password,
        auth_tokens: tokens,
        last_updated: Utc::now(),
    };
    m.set_auth(&fresh)
        .map_err(|e| ApiError::module(module, e.into()))?;
    info!(module = %module, "Re-login after token rejection succeeded");
    Ok(())
}

/// GET /:module/updatechannels
async fn update_channels(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;

    let channels = match m.update_channels().await {
        Ok(channels) => channels,
        Err(ModuleError::Authentication(reason)) => {
            warn!(module = %module, %reason, "Token rejected, attempting re-login");
            relogin(&state, &module, &m).await?;
            m.update_channels()
                .await
                .map_err(|e| ApiError::module(&module, e))?
        }
        Err(e) => return Err(ApiError::module(&module, e)),
    };

    Ok(Json(Envelope::success(&module, json!(channels))))
}

/// GET /:module/live
async fn live_list(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let channels = m
        .live_channels()
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    Ok(Json(Envelope::success(&module, json!(channels))))
}

/// GET /:module/live/index.m3u8
async fn live_playlist(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Response, ApiError> {
    let m = resolve(&state, &module)?;
    let channels = m
        .live_channels()
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    Ok(manifest_response(combined_playlist(&module, &channels), false))
}

/// GET /:module/live/:channel/index.m3u8
async fn live_channel_playlist(
    State(state): State<AppState>,
    Path((module, channel)): Path<(String, String)>,
    Query(query): Query<ManifestQuery>,
) -> Result<Response, ApiError> {
    let m = resolve(&state, &module)?;
    let desc = m
        .live_stream(&channel)
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    serve_manifest(&state, &module, &desc, query.cors_enabled()).await
}

/// GET /:module/segment/:token
///
/// Re-entry point for rewritten playlist URIs. The token alone carries the
/// upstream URL and headers; the gateway holds no per-stream state.
async fn segment(
    State(state): State<AppState>,
    Path((module, token)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let seg = decode_segment_token(&token).map_err(|e| ApiError::module(&module, e.into()))?;
    let resp = state
        .engine
        .fetch_raw(&seg.url, &seg.headers)
        .await
        .map_err(|e| ApiError::module(&module, e.into()))?;

    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if !status.is_success() {
        warn!(module = %module, url = %seg.url, status = status.as_u16(), "Upstream segment fetch failed");
        return Ok(cors_response(
            status,
            content_type,
            Body::from_stream(resp.bytes_stream()),
        ));
    }

    if looks_like_playlist(content_type.as_deref(), &seg.url) {
        let body = resp.text().await.map_err(|e| {
            ApiError::module(&module, ModuleError::StreamUnavailable(e.to_string()))
        })?;
        let base = Url::parse(&seg.url).map_err(|e| {
            ApiError::module(&module, ModuleError::Internal(format!("bad upstream url: {e}")))
        })?;
        let rewritten = rewrite_to_gateway(&body, &base, &module, &seg.headers);
        return Ok(manifest_response(rewritten, true));
    }

    Ok(cors_response(
        status,
        content_type,
        Body::from_stream(resp.bytes_stream()),
    ))
}

/// GET /:module/vod?page=N&search=term
async fn vod_shows(
    State(state): State<AppState>,
    Path(module): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let page = m
        .vod_shows(query.page.unwrap_or(1), query.search.as_deref())
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    let data = serde_json::to_value(page)
        .map_err(|e| ApiError::module(&module, ModuleError::Internal(e.to_string())))?;
    Ok(Json(Envelope::success(&module, data)))
}

/// GET /:module/vod/:show?page=N
async fn vod_episodes(
    State(state): State<AppState>,
    Path((module, show)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let page = m
        .vod_episodes(&show, query.page.unwrap_or(1))
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    let data = serde_json::to_value(page)
        .map_err(|e| ApiError::module(&module, ModuleError::Internal(e.to_string())))?;
    Ok(Json(Envelope::success(&module, data)))
}

/// GET /:module/vod/:show/:episode
async fn vod_episode(
    State(state): State<AppState>,
    Path((module, show, episode)): Path<(String, String, String)>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    let desc = m
        .vod_stream(&show, &episode)
        .await
        .map_err(|e| ApiError::module(&module, e))?;

    Ok(Json(Envelope::success(
        &module,
        json!({
            "stream": desc.upstream_url,
            "requiresAuth": desc.requires_auth,
            "headers": desc.headers,
        }),
    )))
}

/// GET /:module/vod/:show/:episode/index.m3u8
async fn vod_episode_playlist(
    State(state): State<AppState>,
    Path((module, show, episode)): Path<(String, String, String)>,
    Query(query): Query<ManifestQuery>,
) -> Result<Response, ApiError> {
    let m = resolve(&state, &module)?;
    let desc = m
        .vod_stream(&show, &episode)
        .await
        .map_err(|e| ApiError::module(&module, e))?;
    serve_manifest(&state, &module, &desc, query.cors_enabled()).await
}

/// GET /:module/clearcache
async fn clear_module_cache(
    State(state): State<AppState>,
    Path(module): Path<String>,
) -> Result<Json<Envelope>, ApiError> {
    let m = resolve(&state, &module)?;
    m.clear_cache();
    info!(module = %module, "Module cache cleared");
    Ok(Json(Envelope::success(&module, Value::Null)))
}

/// GET /clearcache
async fn clear_all_cache(State(state): State<AppState>) -> Json<Envelope> {
    state.cache.clear();
    info!("Global cache cleared");
    Json(Envelope::success("gateway", Value::Null))
}

/// GET /cors/*url
///
/// Passthrough proxy: upstream status, content type and body are relayed
/// verbatim, with permissive CORS added.
async fn cors_proxy(
    State(state): State<AppState>,
    Path(url): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, ApiError> {
    let target = normalize_proxied_url(&url, raw_query.as_deref())
        .ok_or_else(|| ApiError::bad_request("cors", format!("not an http(s) URL: {url}")))?;

    let resp = state
        .engine
        .fetch_passthrough(&target)
        .await
        .map_err(|e| ApiError::module("cors", e.into()))?;

    let status =
        StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    Ok(cors_response(
        status,
        content_type,
        Body::from_stream(resp.bytes_stream()),
    ))
}

/// Repairs the scheme a path-embedded URL loses to slash collapsing and
/// reattaches the query string.
fn normalize_proxied_url(raw: &str, query: Option<&str>) -> Option<String> {
    let mut fixed = raw.to_string();
    for scheme in ["https", "http"] {
        let broken = format!("{scheme}:/");
        let correct = format!("{scheme}://");
        if fixed.starts_with(&broken) && !fixed.starts_with(&correct) {
            fixed = fixed.replacen(&broken, &correct, 1);
            break;
        }
    }
    if let Some(q) = query {
        fixed = format!("{fixed}?{q}");
    }
    let parsed = Url::parse(&fixed).ok()?;
    matches!(parsed.scheme(), "http" | "https").then_some(fixed)
}

async fn serve_manifest(
    state: &AppState,
    module_id: &str,
    desc: &StreamDescriptor,
    cors: bool,
) -> Result<Response, ApiError> {
    let body = match state.engine.fetch_playlist(desc).await {
        Ok(body) => body,
        Err(FetchError::UpstreamStatus { url, status }) => {
            // Direct-proxy endpoint: the upstream status is relayed as-is.
            warn!(module = %module_id, url = %url, status, "Upstream manifest fetch failed");
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            return Ok((code, format!("upstream returned status {status}")).into_response());
        }
        Err(e) => return Err(ApiError::module(module_id, e.into())),
    };

    let base = Url::parse(&desc.upstream_url).map_err(|e| {
        ApiError::module(module_id, ModuleError::Internal(format!("bad upstream url: {e}")))
    })?;
    let rewritten = rewrite_to_gateway(&body, &base, module_id, &desc.headers);
    Ok(manifest_response(rewritten, cors))
}

fn manifest_response(body: String, cors: bool) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl");
    if cors {
        builder = builder.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    }
    builder.body(Body::from(body)).expect("valid response")
}

fn cors_response(status: StatusCode, content_type: Option<String>, body: Body) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    // An upstream content type that is not a valid header value is dropped
    // rather than failing the whole relay.
    if let Some(ct) = content_type.and_then(|ct| header::HeaderValue::from_str(&ct).ok()) {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    builder.body(body).expect("valid response")
}
