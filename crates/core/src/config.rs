use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OtelMapError, Result};

pub const DEFAULT_SESSION_ATTRIBUTE: &str = "otelmap.session_token";
pub const DEFAULT_SESSION_HEADER: &str = "x-otel-session";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub otlp_grpc_addr: String,
    pub otlp_http_addr: String,
    pub api_addr: String,
    pub public_base_url: Option<String>,
    pub session_attribute_key: String,
    pub session_header: String,
    pub retention_ttl: Duration,
    pub write_batch_size: usize,
    pub write_flush_ms: u64,
    pub map_timeout: Duration,
    pub session_events_timeout: Duration,
    pub session_events_poll: Duration,
    pub include_client_only_services: bool,
}

impl Default for Config {
    fn default() -> Self {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let data_root = env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home).join(".local/share"));

        Self {
            db_path: data_root.join("otelmap/otelmap.duckdb"),
            otlp_grpc_addr: "127.0.0.1:4317".to_string(),
            otlp_http_addr: "127.0.0.1:4318".to_string(),
            api_addr: "127.0.0.1:8000".to_string(),
            public_base_url: None,
            session_attribute_key: DEFAULT_SESSION_ATTRIBUTE.to_string(),
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            retention_ttl: Duration::from_secs(60 * 60 * 24),
            write_batch_size: 2048,
            write_flush_ms: 200,
            map_timeout: Duration::from_secs(10),
            session_events_timeout: Duration::from_secs(60),
            session_events_poll: Duration::from_secs(2),
            include_client_only_services: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        let config_path = config_file_path();
        if let Some(file_overrides) = load_file_overrides(&config_path)? {
            apply_overrides(&mut cfg, file_overrides, "config file")?;
        }
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        let env_overrides = load_env_overrides()?;
        apply_overrides(&mut cfg, env_overrides, "environment")?;
        Ok(cfg)
    }

    /// OTLP/HTTP traces URL advertised to session clients.
    pub fn otlp_http_url(&self) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/v1/traces", base.trim_end_matches('/')),
            None => format!("http://{}/v1/traces", self.otlp_http_addr),
        }
    }

    pub fn otlp_grpc_url(&self) -> String {
        match &self.public_base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.otlp_grpc_addr),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigOverrides {
    db_path: Option<PathBuf>,
    otlp_grpc_addr: Option<String>,
    otlp_http_addr: Option<String>,
    api_addr: Option<String>,
    public_base_url: Option<String>,
    session_attribute_key: Option<String>,
    session_header: Option<String>,
    retention_ttl: Option<String>,
    write_batch_size: Option<usize>,
    write_flush_ms: Option<u64>,
    map_timeout: Option<String>,
    session_events_timeout: Option<String>,
    session_events_poll: Option<String>,
    include_client_only_services: Option<bool>,
}

fn config_file_path() -> PathBuf {
    if let Ok(path) = env::var("OTELMAP_CONFIG") {
        return PathBuf::from(path);
    }

    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let config_home = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(home).join(".config"));
    config_home.join("otelmap/config.toml")
}

fn load_file_overrides(path: &PathBuf) -> Result<Option<ConfigOverrides>> {
    if !path.exists() {
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .map_err(|e| OtelMapError::Config(format!("failed reading {}: {e}", path.display())))?;
    let parsed: ConfigOverrides = toml::from_str(&raw)
        .map_err(|e| OtelMapError::Config(format!("failed parsing {}: {e}", path.display())))?;
    Ok(Some(parsed))
}

fn load_env_overrides() -> Result<ConfigOverrides> {
    let write_batch_size = match env::var("OTELMAP_WRITE_BATCH_SIZE") {
        Ok(v) => Some(v.parse::<usize>().map_err(|e| {
            OtelMapError::Config(format!("bad OTELMAP_WRITE_BATCH_SIZE in environment: {e}"))
        })?),
        Err(_) => None,
    };
    let write_flush_ms = match env::var("OTELMAP_WRITE_FLUSH_MS") {
        Ok(v) => Some(v.parse::<u64>().map_err(|e| {
            OtelMapError::Config(format!("bad OTELMAP_WRITE_FLUSH_MS in environment: {e}"))
        })?),
        Err(_) => None,
    };
    let include_client_only_services = env::var("OTELMAP_INCLUDE_CLIENT_ONLY_SERVICES")
        .ok()
        .map(|v| parse_bool(&v))
        .transpose()?;

    Ok(ConfigOverrides {
        db_path: env::var("OTELMAP_DB_PATH").ok().map(PathBuf::from),
        otlp_grpc_addr: env::var("OTELMAP_OTLP_GRPC_ADDR").ok(),
        otlp_http_addr: env::var("OTELMAP_OTLP_HTTP_ADDR").ok(),
        api_addr: env::var("OTELMAP_API_ADDR").ok(),
        public_base_url: env::var("OTELMAP_PUBLIC_BASE_URL").ok(),
        session_attribute_key: env::var("OTELMAP_SESSION_ATTRIBUTE_KEY").ok(),
        session_header: env::var("OTELMAP_SESSION_HEADER").ok(),
        retention_ttl: env::var("OTELMAP_RETENTION_TTL").ok(),
        write_batch_size,
        write_flush_ms,
        map_timeout: env::var("OTELMAP_MAP_TIMEOUT").ok(),
        session_events_timeout: env::var("OTELMAP_SESSION_EVENTS_TIMEOUT").ok(),
        session_events_poll: env::var("OTELMAP_SESSION_EVENTS_POLL").ok(),
        include_client_only_services,
    })
}

fn apply_overrides(cfg: &mut Config, overrides: ConfigOverrides, source: &str) -> Result<()> {
    if let Some(v) = overrides.db_path {
        cfg.db_path = v;
    }
    if let Some(v) = overrides.otlp_grpc_addr {
        cfg.otlp_grpc_addr = v;
    }
    if let Some(v) = overrides.otlp_http_addr {
        cfg.otlp_http_addr = v;
    }
    if let Some(v) = overrides.api_addr {
        cfg.api_addr = v;
    }
    if let Some(v) = overrides.public_base_url {
        cfg.public_base_url = Some(v);
    }
    if let Some(v) = overrides.session_attribute_key {
        if v.trim().is_empty() {
            return Err(OtelMapError::Config(format!(
                "session_attribute_key in {source} cannot be empty"
            )));
        }
        cfg.session_attribute_key = v;
    }
    if let Some(v) = overrides.session_header {
        cfg.session_header = v.to_ascii_lowercase();
    }
    if let Some(v) = overrides.retention_ttl {
        cfg.retention_ttl = parse_duration_field("retention_ttl", &v, source)?;
    }
    if let Some(v) = overrides.write_batch_size {
        cfg.write_batch_size = v;
    }
    if let Some(v) = overrides.write_flush_ms {
        cfg.write_flush_ms = v;
    }
    if let Some(v) = overrides.map_timeout {
        cfg.map_timeout = parse_duration_field("map_timeout", &v, source)?;
    }
    if let Some(v) = overrides.session_events_timeout {
        cfg.session_events_timeout = parse_duration_field("session_events_timeout", &v, source)?;
    }
    if let Some(v) = overrides.session_events_poll {
        cfg.session_events_poll = parse_duration_field("session_events_poll", &v, source)?;
    }
    if let Some(v) = overrides.include_client_only_services {
        cfg.include_client_only_services = v;
    }
    Ok(())
}

fn parse_duration_field(field: &str, value: &str, source: &str) -> Result<Duration> {
    humantime::parse_duration(value).map_err(|e| {
        OtelMapError::Config(format!("bad {field} in {source}: {e} (value={value})"))
    })
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(OtelMapError::Config(format!(
            "expected a boolean, got {other}"
        ))),
    }
}
