//! Load config from file and environment, and hold it in a watchable store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use safebox_core::{ConnectionMode, CoreConfig, ReconnectPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_LOCAL_PORT};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

/// Bridge configuration. File: ~/.config/safebox-bridge/config.toml or /etc/safebox-bridge/config.toml.
/// Env overrides: SAFEBOX_MODE, SAFEBOX_LOCAL_PORT, SAFEBOX_ENDPOINTS (comma separated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `local` or `endpoints` (default local).
    #[serde(default)]
    pub mode: ConnectionMode,
    /// Remote relay WebSocket URLs, highest priority first.
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Written into `endpoints` the first time endpoints mode finds the list empty.
    #[serde(default)]
    pub default_endpoints: Vec<String>,
    /// Companion client port (default 8081).
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    /// Per-candidate connect bound in the endpoint race (default 4000).
    #[serde(default = "default_candidate_timeout_ms")]
    pub candidate_timeout_ms: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
    /// HTTP path on the companion that reports the helper port.
    #[serde(default = "default_helper_path")]
    pub helper_path: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_local_port() -> u16 {
    DEFAULT_LOCAL_PORT
}
fn default_candidate_timeout_ms() -> u64 {
    4000
}
fn default_download_timeout_secs() -> u64 {
    60
}
fn default_upload_timeout_secs() -> u64 {
    180
}
fn default_helper_path() -> String {
    "/getHelperPort".to_string()
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::default(),
            endpoints: Vec::new(),
            default_endpoints: Vec::new(),
            local_port: default_local_port(),
            candidate_timeout_ms: default_candidate_timeout_ms(),
            download_timeout_secs: default_download_timeout_secs(),
            upload_timeout_secs: default_upload_timeout_secs(),
            helper_path: default_helper_path(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Config {
    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms)
    }

    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            download_timeout: Duration::from_secs(self.download_timeout_secs),
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Drop endpoint URLs that are not ws:// or wss:// with a dotted host, and duplicates.
    pub fn sanitize(&mut self) {
        self.endpoints = sanitize_endpoints(std::mem::take(&mut self.endpoints));
        self.default_endpoints = sanitize_endpoints(std::mem::take(&mut self.default_endpoints));
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
    }
}

/// Keep valid `ws://`/`wss://` URLs in order, trimmed, without duplicates.
pub fn sanitize_endpoints(urls: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(urls.len());
    for url in urls {
        let url = url.trim().to_string();
        if !is_valid_endpoint_url(&url) {
            warn!(%url, "ignoring invalid endpoint url");
            continue;
        }
        if out.contains(&url) {
            warn!(%url, "ignoring duplicate endpoint url");
            continue;
        }
        out.push(url);
    }
    out
}

/// `ws://` or `wss://` URL whose host contains a dot and no whitespace.
pub fn is_valid_endpoint_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return false;
    }
    match parsed.host_str() {
        Some(host) => {
            let mut parts = host.splitn(2, '.');
            let head = parts.next().unwrap_or("");
            let tail = parts.next().unwrap_or("");
            !head.is_empty() && !tail.is_empty() && !host.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Load config: `explicit` path if given, else the first existing default path, then env vars.
pub fn load(explicit: Option<&Path>) -> Config {
    let mut c = match explicit {
        Some(p) => load_path(p),
        None => load_file(),
    }
    .unwrap_or_default();
    apply_env(&mut c, |k| std::env::var(k).ok());
    c.sanitize();
    c
}

fn apply_env(c: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(s) = get("SAFEBOX_MODE") {
        match s.parse::<ConnectionMode>() {
            Ok(m) => c.mode = m,
            Err(e) => warn!("SAFEBOX_MODE: {e}"),
        }
    }
    if let Some(s) = get("SAFEBOX_LOCAL_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.local_port = p;
        }
    }
    if let Some(s) = get("SAFEBOX_ENDPOINTS") {
        c.endpoints = s
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/safebox-bridge/config.toml"));
    }
    out.push(PathBuf::from("/etc/safebox-bridge/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    config_paths()
        .into_iter()
        .find(|p| p.exists())
        .and_then(|p| load_path(&p))
}

fn load_path(path: &Path) -> Option<Config> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), "cannot read config: {e}");
            return None;
        }
    };
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(path = %path.display(), "bad config, using defaults: {e}");
            None
        }
    }
}

/// In-memory configuration shared by the manager and the request router.
/// Every update is published to subscribers.
#[derive(Clone)]
pub struct ConfigStore {
    tx: watch::Sender<Config>,
}

impl ConfigStore {
    pub fn new(config: Config) -> Self {
        let (tx, _) = watch::channel(config);
        Self { tx }
    }

    pub fn current(&self) -> Config {
        self.tx.borrow().clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.tx.borrow().mode
    }

    /// Apply `f` and notify subscribers if anything changed.
    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        self.tx.send_if_modified(|c| {
            let before = c.clone();
            f(c);
            *c != before
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<Config> {
        self.tx.subscribe()
    }
}
