#![forbid(unsafe_code)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod hls;
pub mod module;
pub mod registry;

pub use auth::{AuthRecord, AuthStore, AuthStoreError};
pub use cache::Cache;
pub use config::GatewayConfig;
pub use hls::{
    combined_playlist, decode_segment_token, rewrite_playlist, segment_token, FetchError,
    ProxyEngine, SegmentToken,
};
pub use module::{
    Channel, ModuleContext, ModuleError, Page, Pagination, ProviderModule, StreamDescriptor,
    VodEpisode, VodShow,
};
pub use registry::ModuleRegistry;
