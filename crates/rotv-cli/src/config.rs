//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [cache]
//! max_entries = 2000
//! persist_path = "/var/lib/rotv/cache.json"
//!
//! [auth]
//! dir = "/var/lib/rotv/auth"
//!
//! [upstream]
//! request_timeout_ms = 20000
//! channel_ttl_secs = 21600
//! stream_ttl_secs = 120
//!
//! [[module]]
//! id = "antena-play"
//! username = "user@example.com"
//! password = "secret"
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use rotv_api::state::Credentials;
use rotv_core::GatewayConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub module: Vec<ModuleDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

fn default_listen() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Optional snapshot file; when set the cache is restored from it at
    /// startup and written back on shutdown.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            persist_path: None,
        }
    }
}

fn default_max_entries() -> usize {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_dir")]
    pub dir: PathBuf,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dir: default_auth_dir(),
        }
    }
}

fn default_auth_dir() -> PathBuf {
    PathBuf::from("auth")
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_channel_ttl_secs")]
    pub channel_ttl_secs: u64,

    #[serde(default = "default_vod_ttl_secs")]
    pub vod_ttl_secs: u64,

    #[serde(default = "default_stream_ttl_secs")]
    pub stream_ttl_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            channel_ttl_secs: default_channel_ttl_secs(),
            vod_ttl_secs: default_vod_ttl_secs(),
            stream_ttl_secs: default_stream_ttl_secs(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    20_000
}

fn default_channel_ttl_secs() -> u64 {
    6 * 3600
}

fn default_vod_ttl_secs() -> u64 {
    30 * 60
}

fn default_stream_ttl_secs() -> u64 {
    120
}

/// Default credentials for one provider module, used when a login request
/// carries none of its own.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDef {
    pub id: String,
    pub username: String,
    pub password: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.cache.max_entries == 0 {
            return Err("cache.max_entries must be at least 1".into());
        }

        let mut ids = std::collections::HashSet::new();
        for m in &self.module {
            if m.id.is_empty() {
                return Err("Module id must not be empty".into());
            }
            if !ids.insert(&m.id) {
                return Err(format!("Duplicate module id: {}", m.id));
            }
            if m.username.is_empty() {
                return Err(format!("Module '{}' has an empty username", m.id));
            }
        }

        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        Ok(())
    }

    pub fn to_gateway_config(&self) -> GatewayConfig {
        GatewayConfig::default()
            .with_cache_max_entries(self.cache.max_entries)
            .with_request_timeout(Duration::from_millis(self.upstream.request_timeout_ms))
            .with_channel_ttl(Duration::from_secs(self.upstream.channel_ttl_secs))
            .with_vod_ttl(Duration::from_secs(self.upstream.vod_ttl_secs))
            .with_stream_ttl(Duration::from_secs(self.upstream.stream_ttl_secs))
            .with_auth_dir(self.auth.dir.clone())
    }

    pub fn credentials(&self) -> HashMap<String, Credentials> {
        self.module
            .iter()
            .map(|m| {
                (
                    m.id.clone(),
                    Credentials {
                        username: m.username.clone(),
                        password: m.password.clone(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: AppConfig = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.server.log_format, "pretty");
        assert_eq!(config.cache.max_entries, 2000);
        assert!(config.module.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[server]
listen = "127.0.0.1:9090"
log_format = "json"

[cache]
max_entries = 500
persist_path = "/tmp/rotv-cache.json"

[auth]
dir = "/tmp/rotv-auth"

[upstream]
request_timeout_ms = 5000
channel_ttl_secs = 3600
stream_ttl_secs = 60

[[module]]
id = "antena-play"
username = "user@example.com"
password = "secret"

[[module]]
id = "digi24"
username = "unused"
password = "unused"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server.listen.port(), 9090);
        assert_eq!(config.server.log_format, "json");
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(
            config.cache.persist_path.as_deref(),
            Some(Path::new("/tmp/rotv-cache.json"))
        );

        let gateway = config.to_gateway_config();
        assert_eq!(gateway.cache_max_entries, 500);
        assert_eq!(gateway.request_timeout, Duration::from_millis(5000));
        assert_eq!(gateway.channel_ttl, Duration::from_secs(3600));
        assert_eq!(gateway.stream_ttl, Duration::from_secs(60));
        // Unset TTLs keep their defaults.
        assert_eq!(gateway.vod_ttl, Duration::from_secs(30 * 60));

        let creds = config.credentials();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds["antena-play"].username, "user@example.com");
    }

    #[test]
    fn validate_rejects_duplicate_module_ids() {
        let toml = r#"
[[module]]
id = "same"
username = "a"
password = "b"

[[module]]
id = "same"
username = "c"
password = "d"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Duplicate module id"), "{}", err);
    }

    #[test]
    fn validate_rejects_empty_username() {
        let toml = r#"
[[module]]
id = "antena-play"
username = ""
password = "x"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("empty username"), "{}", err);
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let toml = r#"
[server]
log_format = "xml"
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("Invalid log_format"), "{}", err);
    }

    #[test]
    fn validate_rejects_zero_cache_entries() {
        let toml = r#"
[cache]
max_entries = 0
"#;
        let config: AppConfig = toml::from_str(toml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.contains("max_entries"), "{}", err);
    }
}
