use serde::Deserialize;

pub const DEFAULT_API_BASE_URL: &str = "https://api.elycapfracprop.com/api";

/// How opaque storage keys are turned into URLs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Exchange the key for a presigned URL through the files endpoint.
    #[default]
    Presign,
    /// Build a URL under the media base without asking the backend.
    Direct,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub address: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    pub media_base_url: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    pub api_token: Option<String>,
    #[serde(default)]
    pub resolution: ResolutionMode,
    pub cache_capacity: Option<usize>,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("mediaref/{}", env!("CARGO_PKG_VERSION"))
}

fn default_batch_concurrency() -> usize {
    1
}

fn default_max_batch_size() -> usize {
    64
}

impl AppConfig {
    /// Host root the files endpoints live under (the API base without `/api`).
    pub fn files_base_url(&self) -> String {
        strip_api_suffix(&self.api_base_url)
    }

    pub fn media_base_url(&self) -> String {
        match &self.media_base_url {
            Some(base) if !base.is_empty() => base.trim_end_matches('/').to_string(),
            _ => self.files_base_url(),
        }
    }
}

/// Strips one trailing `/api` (or `/api/`) segment from a base URL.
pub fn strip_api_suffix(base: &str) -> String {
    let trimmed = base.strip_suffix('/').unwrap_or(base);
    match trimmed.strip_suffix("/api") {
        Some(root) => root.to_string(),
        None => base.to_string(),
    }
}
