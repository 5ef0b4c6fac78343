use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::services::spot_catalog::{CatalogOptions, CatalogSource, ColumnMapping};

pub const DEFAULT_SPOTS_SOURCE: &str = "public/output_with_coords.csv";
pub const DEFAULT_DIRECTIONS_BASE_URL: &str = "https://api.mapbox.com";
pub const DEFAULT_LOCAL_STORE_PATH: &str = "spotwalk-store.json";
pub const DEFAULT_STATIC_DIR: &str = "public";

pub const DEFAULT_LEDGER_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_ENGINE_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_NOTICE_BUFFER: usize = 64;
pub const DEFAULT_BROADCAST_BUFFER: usize = 256;
pub const DEFAULT_SERVER_PORT: u16 = 3000;
pub const SSE_KEEPALIVE_SECS: u64 = 15;

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|value| {
        let normalized = value.trim().to_ascii_lowercase();
        matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
    })
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn spots_source() -> CatalogSource {
    CatalogSource::parse(&env_string("SPOTS_SOURCE").unwrap_or_else(|| DEFAULT_SPOTS_SOURCE.into()))
}

pub fn spots_has_header() -> bool {
    env_flag("SPOTS_HAS_HEADER").unwrap_or(true)
}

pub fn spots_columns() -> ColumnMapping {
    let Some(raw) = env_string("SPOTS_COLUMNS") else {
        return ColumnMapping::default();
    };
    ColumnMapping::parse(&raw).unwrap_or_else(|e| {
        warn!(error = %e, columns = %raw, "invalid SPOTS_COLUMNS; using label,longitude,latitude");
        ColumnMapping::default()
    })
}

pub fn catalog_options() -> CatalogOptions {
    CatalogOptions {
        has_header: spots_has_header(),
        columns: spots_columns(),
    }
}

pub fn directions_base_url() -> String {
    env_string("DIRECTIONS_BASE_URL")
        .map(|url| url.trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_DIRECTIONS_BASE_URL.to_string())
}

pub fn mapbox_access_token() -> Option<String> {
    env_string("MAPBOX_ACCESS_TOKEN")
}

pub fn database_url() -> Option<String> {
    env_string("DATABASE_URL")
}

pub fn db_max_connections() -> u32 {
    env_parse::<u32>("DB_MAX_CONNECTIONS")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
}

pub fn local_store_path() -> PathBuf {
    env_string("LOCAL_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_STORE_PATH))
}

pub fn static_dir() -> PathBuf {
    env_string("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATIC_DIR))
}

pub fn ledger_poll_interval() -> Duration {
    env_parse::<u64>("LEDGER_POLL_INTERVAL_MS")
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_LEDGER_POLL_INTERVAL_MS))
}

pub fn upstream_http_timeout() -> Duration {
    env_parse::<u64>("UPSTREAM_HTTP_TIMEOUT_SECS")
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS))
}

pub fn upstream_connect_timeout() -> Duration {
    env_parse::<u64>("UPSTREAM_CONNECT_TIMEOUT_SECS")
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS))
}

pub fn engine_queue_capacity() -> usize {
    env_parse::<usize>("ENGINE_QUEUE_CAPACITY")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_ENGINE_QUEUE_CAPACITY)
}

pub fn notice_buffer() -> usize {
    env_parse::<usize>("NOTICE_BUFFER")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_NOTICE_BUFFER)
}

pub fn broadcast_buffer() -> usize {
    env_parse::<usize>("SSE_BROADCAST_BUFFER")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_BROADCAST_BUFFER)
}

pub fn server_port() -> u16 {
    env_parse::<u16>("SERVER_PORT")
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SERVER_PORT)
}
