//! HLS manifest rewriting and upstream proxying.
//!
//! Playlist rewriting is line-oriented on purpose: playlist semantics are
//! order-sensitive (segment order is playback order), so tag lines pass
//! through verbatim and in position while URI lines are resolved against
//! the manifest's own URL and swapped for gateway URLs. The rewritten URL
//! carries everything a later segment request needs (upstream URL plus
//! auth headers) encoded in an opaque token, so the proxy holds no state
//! between the playlist request and the segment requests that follow.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::module::{Channel, ModuleError, StreamDescriptor};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned status {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },
    #[error("timeout fetching {url}")]
    Timeout { url: String },
    #[error("network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("{url} is not an HLS playlist")]
    NotPlaylist { url: String },
    #[error("invalid segment token")]
    InvalidToken,
}

impl FetchError {
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn from_transport(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl From<FetchError> for ModuleError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::UpstreamStatus { url, status } => ModuleError::Upstream { url, status },
            FetchError::Timeout { url } => ModuleError::Timeout(url),
            FetchError::Network { url, reason } => {
                ModuleError::StreamUnavailable(format!("{url}: {reason}"))
            }
            FetchError::NotPlaylist { url } => {
                ModuleError::StreamUnavailable(format!("{url} is not an HLS playlist"))
            }
            FetchError::InvalidToken => ModuleError::NotFound("invalid segment token".into()),
        }
    }
}

/// Context a rewritten segment URL carries back into the engine: the
/// original upstream URL plus the headers the fetch needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentToken {
    #[serde(rename = "u")]
    pub url: String,
    #[serde(rename = "h", default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// Encodes `url` + `headers` into an opaque URL-safe token.
pub fn segment_token(url: &str, headers: &HashMap<String, String>) -> String {
    let token = SegmentToken {
        url: url.to_string(),
        headers: headers.clone(),
    };
    let json = serde_json::to_vec(&token).expect("token serialization cannot fail");
    URL_SAFE_NO_PAD.encode(json)
}

/// Inverse of [`segment_token`].
pub fn decode_segment_token(token: &str) -> Result<SegmentToken, FetchError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| FetchError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| FetchError::InvalidToken)
}

/// Rewrites every URI line of `body` through `rewrite`, resolving relative
/// references against `base` first. Tag (`#`) and blank lines pass through
/// unchanged and in position.
pub fn rewrite_playlist<F>(body: &str, base: &Url, mut rewrite: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(body.len() * 2);
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            out.push_str(line);
        } else {
            match base.join(trimmed) {
                Ok(absolute) => out.push_str(&rewrite(absolute.as_str())),
                Err(e) => {
                    warn!(line = trimmed, error = %e, "Leaving unresolvable playlist URI as-is");
                    out.push_str(line);
                }
            }
        }
        out.push('\n');
    }
    out
}

/// Rewrites a fetched manifest so every URI re-enters the gateway at
/// `/{module}/segment/{token}`.
pub fn rewrite_to_gateway(
    body: &str,
    base: &Url,
    module_id: &str,
    headers: &HashMap<String, String>,
) -> String {
    rewrite_playlist(body, base, |absolute| {
        format!("/{module_id}/segment/{}", segment_token(absolute, headers))
    })
}

/// Quotes, commas and line breaks would corrupt the attribute list, so
/// they never reach it verbatim.
fn extinf_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '"' => '\'',
            ',' | '\n' | '\r' => ' ',
            c => c,
        })
        .collect()
}

/// Builds the combined IPTV playlist for a module's channel list, with one
/// `#EXTINF` entry per channel pointing back at the gateway.
pub fn combined_playlist(module_id: &str, channels: &[Channel]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for channel in channels {
        out.push_str(&format!("#EXTINF:-1 tvg-id=\"{}\"", extinf_value(&channel.id)));
        if let Some(logo) = &channel.logo {
            out.push_str(&format!(" tvg-logo=\"{}\"", extinf_value(logo)));
        }
        if let Some(category) = &channel.category {
            out.push_str(&format!(" group-title=\"{}\"", extinf_value(category)));
        }
        // The title is the trailing field; only line breaks can hurt it.
        out.push_str(&format!(",{}\n", channel.name.replace(['\n', '\r'], " ")));
        out.push_str(&format!("/{module_id}/live/{}/index.m3u8\n", channel.id));
    }
    out
}

/// True when a proxied child resource should be treated as a playlist and
/// rewritten rather than streamed through byte-for-byte.
pub fn looks_like_playlist(content_type: Option<&str>, url: &str) -> bool {
    if let Some(ct) = content_type {
        let ct = ct.to_ascii_lowercase();
        if ct.contains("mpegurl") {
            return true;
        }
        // Some CDNs serve playlists as text/plain or octet-stream; fall
        // through to the URL check.
    }
    url.split(['?', '#']).next().unwrap_or(url).ends_with(".m3u8")
}

/// Fetches upstream playlists and relays segment bytes. Stateless: every
/// call stands alone, and nothing is retried or served stale here.
#[derive(Debug, Clone)]
pub struct ProxyEngine {
    client: Client,
}

impl ProxyEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// GET `url` with `headers`; only transport failures error here, the
    /// upstream status comes back with the response for the caller to
    /// relay or reject.
    pub async fn fetch_raw(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Response, FetchError> {
        let mut req = self.client.get(url);
        for (name, value) in headers {
            req = req.header(name, value);
        }
        req.send()
            .await
            .map_err(|e| FetchError::from_transport(e, url))
    }

    /// Fetches the top-level manifest for `desc` and returns its text.
    /// Non-2xx statuses and non-playlist bodies are errors; a live
    /// manifest is never substituted from cache at this layer.
    pub async fn fetch_playlist(&self, desc: &StreamDescriptor) -> Result<String, FetchError> {
        let resp = self.fetch_raw(&desc.upstream_url, &desc.headers).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus {
                url: desc.upstream_url.clone(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| FetchError::Network {
            url: desc.upstream_url.clone(),
            reason: e.to_string(),
        })?;

        if !body.trim_start().starts_with("#EXTM3U")
            || m3u8_rs::parse_playlist_res(body.as_bytes()).is_err()
        {
            return Err(FetchError::NotPlaylist {
                url: desc.upstream_url.clone(),
            });
        }

        debug!(url = %desc.upstream_url, bytes = body.len(), "Fetched upstream manifest");
        Ok(body)
    }

    /// CORS/passthrough mode: fetch verbatim, relay whatever comes back.
    pub async fn fetch_passthrough(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        self.fetch_raw(url, &HashMap::new()).await
    }
}
