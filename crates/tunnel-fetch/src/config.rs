use origin_classifier::{ClassifierConfig, ServerEntry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Origin the mini-app (and its worker) is served from.
    #[serde(default = "default_own_origin")]
    pub own_origin: Url,
    /// Location of the embedding host window. `None` models a parent whose
    /// location cannot be read.
    #[serde(default)]
    pub parent_url: Option<Url>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_script_url")]
    pub script_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            own_origin: default_own_origin(),
            parent_url: None,
            timeout_secs: default_timeout_secs(),
            script_url: default_script_url(),
            scope: default_scope(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransportConfig {
    /// Proxy for the host's outbound requests (e.g. a local Tor SOCKS port).
    #[serde(default)]
    pub proxy_url: Option<String>,
    /// Per-request limit for the host's own fetch; keep it below the worker
    /// timeout so failures are reported instead of timing out.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Static table for dotless node aliases.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy_url: None,
            request_timeout_secs: default_request_timeout(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            journal_path: default_journal_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default-value functions used by serde
// ---------------------------------------------------------------------------

fn default_own_origin() -> Url {
    Url::parse("https://miniapp.localhost").expect("static origin is valid")
}

fn default_timeout_secs() -> u64 {
    edge_interceptor::DEFAULT_TIMEOUT.as_secs()
}

fn default_script_url() -> String {
    page_relay::DEFAULT_SCRIPT_URL.to_string()
}

fn default_scope() -> String {
    page_relay::DEFAULT_SCOPE.to_string()
}

fn default_request_timeout() -> u64 {
    25
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("journal.jsonl")
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load configuration from a YAML file. Returns `None` when the file does
/// not exist; the caller falls back to defaults and reports it once logging
/// is up.
pub fn load(path: &Path) -> anyhow::Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

    parse(&contents)
        .map(Some)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))
}

fn parse(contents: &str) -> Result<Config, serde_yml::Error> {
    serde_yml::from_str(contents)
}
