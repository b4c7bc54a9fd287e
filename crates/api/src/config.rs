use std::path::PathBuf;
use std::str::FromStr;

/// Server configuration loaded from environment variables.
///
/// Everything except the two ComfyUI URLs has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins. A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// ComfyUI HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub comfyui_url: String,
    /// ComfyUI WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub comfyui_ws_url: String,
    /// Directory holding stored job documents.
    pub workflows_dir: PathBuf,
    /// Directory served for every path no route matches.
    pub static_dir: PathBuf,
    /// Maximum multipart request body size.
    pub max_upload_bytes: usize,
    /// Seconds a finished session is kept.
    pub session_ttl_secs: u64,
    /// Seconds an unfinished session may go without updates.
    pub session_idle_ttl_secs: u64,
    /// Seconds between eviction sweeps.
    pub session_sweep_interval_secs: u64,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
}

/// Invalid or missing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default     |
    /// |-------------------------------|-------------|
    /// | `HOST`                        | `0.0.0.0`   |
    /// | `PORT`                        | `3000`      |
    /// | `CORS_ORIGINS`                | `*`         |
    /// | `REQUEST_TIMEOUT_SECS`        | `30`        |
    /// | `COMFYUI_URL`                 | required    |
    /// | `COMFYUI_WS_URL`              | required    |
    /// | `WORKFLOWS_DIR`               | `workflows` |
    /// | `STATIC_DIR`                  | `public`    |
    /// | `MAX_UPLOAD_BYTES`            | `20971520`  |
    /// | `SESSION_TTL_SECS`            | `3600`      |
    /// | `SESSION_IDLE_TTL_SECS`       | `86400`     |
    /// | `SESSION_SWEEP_INTERVAL_SECS` | `60`        |
    /// | `LOG_FORMAT`                  | `pretty`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let cors_origins: Vec<String> = var("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let required = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        Ok(Self {
            host: var("HOST", "0.0.0.0"),
            port: parse("PORT", &var("PORT", "3000"))?,
            cors_origins,
            request_timeout_secs: parse("REQUEST_TIMEOUT_SECS", &var("REQUEST_TIMEOUT_SECS", "30"))?,
            comfyui_url: required("COMFYUI_URL")?,
            comfyui_ws_url: required("COMFYUI_WS_URL")?,
            workflows_dir: PathBuf::from(var("WORKFLOWS_DIR", "workflows")),
            static_dir: PathBuf::from(var("STATIC_DIR", "public")),
            max_upload_bytes: parse("MAX_UPLOAD_BYTES", &var("MAX_UPLOAD_BYTES", "20971520"))?,
            session_ttl_secs: parse("SESSION_TTL_SECS", &var("SESSION_TTL_SECS", "3600"))?,
            session_idle_ttl_secs: parse(
                "SESSION_IDLE_TTL_SECS",
                &var("SESSION_IDLE_TTL_SECS", "86400"),
            )?,
            session_sweep_interval_secs: parse(
                "SESSION_SWEEP_INTERVAL_SECS",
                &var("SESSION_SWEEP_INTERVAL_SECS", "60"),
            )?,
            log_json: var("LOG_FORMAT", "pretty").eq_ignore_ascii_case("json"),
        })
    }

    /// Whether every origin is allowed.
    pub fn cors_any(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

fn parse<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: value.to_string(),
    })
}
