//! Runtime configuration.
//!
//! Callers construct a [`Config`], wrap it in a [`ConfigHandle`], and hand
//! the handle to the services. The handle publishes an immutable snapshot;
//! parsers read the snapshot once per call, and [`ConfigHandle::reload`]
//! swaps in a new one (re-applying the user override file) without touching
//! in-flight work. Environment/env-file loading belongs to the embedding
//! application, not this crate.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Service configuration. Field defaults match the deployed service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 2-letter state codes to keep; empty accepts all states.
    pub filter_states: Vec<String>,
    /// Phenomenon codes to keep; empty accepts all phenomena.
    pub target_phenomena: Vec<String>,
    /// Lifetime assigned to short-lived alerts with no derivable expiration.
    pub default_alert_lifetime_minutes: u32,
    /// Seconds between expiration sweeps.
    pub alert_cleanup_interval_seconds: u32,
    /// Seconds between REST API polls.
    pub api_poll_interval_seconds: u32,
    /// Hours a cached zone geometry stays valid.
    pub zone_cache_ttl_hours: u32,
    /// Whether to save/load the active set across restarts.
    pub persist_alerts: bool,
    /// Directory for persisted state files.
    pub data_dir: PathBuf,
    /// NWS REST API base URL.
    pub api_base_url: String,
    /// Mandatory User-Agent for REST requests.
    pub api_user_agent: String,
    /// NWWS-OI username; `None` disables the push source.
    pub nwws_username: Option<String>,
    /// NWWS-OI password; `None` disables the push source.
    pub nwws_password: Option<String>,
    /// NWWS-OI XMPP server.
    pub nwws_server: String,
    /// NWWS-OI chatroom to join.
    pub nwws_room: String,
    /// Nickname to join the chatroom under.
    pub nwws_nickname: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter_states: Vec::new(),
            target_phenomena: Vec::new(),
            default_alert_lifetime_minutes: 60,
            alert_cleanup_interval_seconds: 60,
            api_poll_interval_seconds: 300,
            zone_cache_ttl_hours: 24,
            persist_alerts: true,
            data_dir: PathBuf::from("data"),
            api_base_url: "https://api.weather.gov".to_owned(),
            api_user_agent: "nwswire/0.1 (+https://github.com/nwswire/nwswire)".to_owned(),
            nwws_username: None,
            nwws_password: None,
            nwws_server: "nwws-oi.weather.gov".to_owned(),
            nwws_room: "nwws@conference.nwws-oi.weather.gov".to_owned(),
            nwws_nickname: "nwswire".to_owned(),
        }
    }
}

impl Config {
    /// Whether the NWWS push source is configured.
    pub fn nwws_enabled(&self) -> bool {
        self.nwws_username.is_some() && self.nwws_password.is_some()
    }

    /// Path of the persisted active-alert set.
    pub fn alerts_path(&self) -> PathBuf {
        self.data_dir.join("active_alerts.json")
    }

    /// Path of the persisted geometry cache.
    pub fn geometry_cache_path(&self) -> PathBuf {
        self.data_dir.join("zone_geometry.json")
    }

    /// Path of the user override file.
    pub fn user_overrides_path(&self) -> PathBuf {
        self.data_dir.join("user_settings.json")
    }

    /// Whether a phenomenon passes the configured filter.
    pub fn accepts_phenomenon(&self, phenomenon: &str) -> bool {
        self.target_phenomena.is_empty()
            || self
                .target_phenomena
                .iter()
                .any(|p| p.eq_ignore_ascii_case(phenomenon))
    }
}

/// User-editable overrides layered on top of the base configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserOverrides {
    #[serde(default)]
    target_phenomena: Option<Vec<String>>,
}

/// A reloadable holder publishing immutable [`Config`] snapshots.
///
/// # Example
///
/// ```
/// use nwswire::config::{Config, ConfigHandle};
///
/// let handle = ConfigHandle::new(Config::default());
/// let snapshot = handle.snapshot();
/// assert!(snapshot.accepts_phenomenon("TO"));
/// ```
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    base: Arc<Config>,
    current: Arc<RwLock<Arc<Config>>>,
}

impl ConfigHandle {
    /// Wrap a base configuration, applying user overrides if present.
    pub fn new(base: Config) -> Self {
        let base = Arc::new(base);
        let current = Arc::new(RwLock::new(apply_overrides(&base)));
        Self { base, current }
    }

    /// The current immutable snapshot. Cheap; read once per operation.
    pub fn snapshot(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-read the user override file and publish a fresh snapshot.
    pub fn reload(&self) -> Arc<Config> {
        let fresh = apply_overrides(&self.base);
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh.clone();
        tracing::info!(
            phenomena = fresh.target_phenomena.len(),
            "configuration reloaded"
        );
        fresh
    }
}

fn apply_overrides(base: &Arc<Config>) -> Arc<Config> {
    match load_overrides(&base.user_overrides_path()) {
        Some(overrides) => {
            let mut config = Config::clone(base);
            if let Some(phenomena) = overrides.target_phenomena {
                config.target_phenomena =
                    phenomena.iter().map(|p| p.to_ascii_uppercase()).collect();
                tracing::info!(
                    count = config.target_phenomena.len(),
                    "applied user phenomenon override"
                );
            }
            Arc::new(config)
        }
        None => base.clone(),
    }
}

fn load_overrides(path: &Path) -> Option<UserOverrides> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(overrides) => Some(overrides),
        Err(error) => {
            tracing::warn!(%error, path = %path.display(), "unreadable user settings file");
            None
        }
    }
}
