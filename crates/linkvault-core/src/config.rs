//! VaultConfig - ポリシー定数と起動時設定
//!
//! すべての値にデフォルトがあり、`LINKVAULT_*` キーで上書きできます。
//!
//! - `from_kv`: 任意のキー・値マップから組み立てる（テスト用にも使う）
//! - `load`: `LINKVAULT_CONFIG_PATH` が指す `KEY=VALUE` ファイル → プロセス環境変数
//!   の順にマージして `from_kv` に渡す
//!
//! tier テーブルは `name:max_mb:hours` をカンマ区切りで並べ、
//! 最後の tier だけ `max_mb` を `*` にします。
//! 例: `tiny:10:2,small:50:4,huge:*:48`

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{DEFAULT_SIGNATURE_KEYS, ExpiryTier, TierTable, TierTableError};
use crate::links::DEFAULT_MAX_REDEMPTIONS;

pub const CONFIG_PATH_KEY: &str = "LINKVAULT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config line {line} in {path}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: &'static str,
    },

    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("LINKVAULT_EXPIRY_TIERS is invalid: {0}")]
    Tiers(#[from] TierTableError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VaultConfig {
    pub artifact_root: PathBuf,
    pub links_file: PathBuf,
    pub index_file: PathBuf,
    pub signature_keys: Vec<String>,
    pub tiers: TierTable,
    pub max_redemptions: u32,
    pub reaper_interval: Duration,
    pub reaper_max_errors: u32,
    pub shutdown_timeout: Duration,
    pub fetch_timeout: Duration,
    /// 終わった操作の進捗をどれだけ問い合わせ可能にしておくか
    pub progress_retention: Duration,
    /// 0 ならレート制限しない
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub suspicious_threshold: u32,
    pub suspicious_horizon: Duration,
    pub blacklist_duration: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from("downloads"),
            links_file: PathBuf::from("temp_links.json"),
            index_file: PathBuf::from("download_index.json"),
            signature_keys: DEFAULT_SIGNATURE_KEYS.iter().map(|k| k.to_string()).collect(),
            tiers: TierTable::default(),
            max_redemptions: DEFAULT_MAX_REDEMPTIONS,
            reaper_interval: Duration::from_secs(300),
            reaper_max_errors: 10,
            shutdown_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(300),
            progress_retention: Duration::from_secs(3600),
            rate_limit_max_requests: 2,
            rate_limit_window: Duration::from_secs(60),
            suspicious_threshold: 10,
            suspicious_horizon: Duration::from_secs(3600),
            blacklist_duration: Duration::from_secs(3600),
        }
    }
}

impl VaultConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var(CONFIG_PATH_KEY) {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                merged.extend(parse_env_file(config_path)?);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let artifact_root = parse_path(kv.get("LINKVAULT_ARTIFACT_ROOT"), defaults.artifact_root);
        let links_file = parse_path(kv.get("LINKVAULT_LINKS_FILE"), defaults.links_file);
        let index_file = parse_path(kv.get("LINKVAULT_INDEX_FILE"), defaults.index_file);

        let signature_keys = match non_empty(kv.get("LINKVAULT_SIGNATURE_KEYS")) {
            None => defaults.signature_keys,
            Some(raw) => {
                let keys: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect();
                if keys.is_empty() {
                    return Err(invalid("LINKVAULT_SIGNATURE_KEYS", "must name at least one key"));
                }
                keys
            }
        };

        let tiers = match non_empty(kv.get("LINKVAULT_EXPIRY_TIERS")) {
            None => defaults.tiers,
            Some(raw) => parse_tiers(raw)?,
        };

        let max_redemptions = parse_u32(
            kv.get("LINKVAULT_MAX_REDEMPTIONS"),
            defaults.max_redemptions,
            "LINKVAULT_MAX_REDEMPTIONS",
        )?;
        if max_redemptions == 0 {
            return Err(invalid("LINKVAULT_MAX_REDEMPTIONS", "must be >= 1"));
        }

        let reaper_interval = parse_secs(
            kv.get("LINKVAULT_REAPER_INTERVAL_SECS"),
            defaults.reaper_interval,
            "LINKVAULT_REAPER_INTERVAL_SECS",
        )?;
        if reaper_interval.is_zero() {
            return Err(invalid("LINKVAULT_REAPER_INTERVAL_SECS", "must be >= 1"));
        }

        let reaper_max_errors = parse_u32(
            kv.get("LINKVAULT_REAPER_MAX_ERRORS"),
            defaults.reaper_max_errors,
            "LINKVAULT_REAPER_MAX_ERRORS",
        )?;
        let shutdown_timeout = parse_secs(
            kv.get("LINKVAULT_SHUTDOWN_TIMEOUT_SECS"),
            defaults.shutdown_timeout,
            "LINKVAULT_SHUTDOWN_TIMEOUT_SECS",
        )?;
        let fetch_timeout = parse_secs(
            kv.get("LINKVAULT_FETCH_TIMEOUT_SECS"),
            defaults.fetch_timeout,
            "LINKVAULT_FETCH_TIMEOUT_SECS",
        )?;
        if fetch_timeout.is_zero() {
            return Err(invalid("LINKVAULT_FETCH_TIMEOUT_SECS", "must be >= 1"));
        }
        let progress_retention = parse_secs(
            kv.get("LINKVAULT_PROGRESS_RETENTION_SECS"),
            defaults.progress_retention,
            "LINKVAULT_PROGRESS_RETENTION_SECS",
        )?;

        let rate_limit_max_requests = parse_u32(
            kv.get("LINKVAULT_RATE_LIMIT_MAX_REQUESTS"),
            defaults.rate_limit_max_requests,
            "LINKVAULT_RATE_LIMIT_MAX_REQUESTS",
        )?;
        let rate_limit_window = parse_secs(
            kv.get("LINKVAULT_RATE_LIMIT_WINDOW_SECS"),
            defaults.rate_limit_window,
            "LINKVAULT_RATE_LIMIT_WINDOW_SECS",
        )?;
        if rate_limit_max_requests > 0 && rate_limit_window.is_zero() {
            return Err(invalid("LINKVAULT_RATE_LIMIT_WINDOW_SECS", "must be >= 1"));
        }

        let suspicious_threshold = parse_u32(
            kv.get("LINKVAULT_SUSPICIOUS_THRESHOLD"),
            defaults.suspicious_threshold,
            "LINKVAULT_SUSPICIOUS_THRESHOLD",
        )?;
        if suspicious_threshold == 0 {
            return Err(invalid("LINKVAULT_SUSPICIOUS_THRESHOLD", "must be >= 1"));
        }
        let suspicious_horizon = parse_secs(
            kv.get("LINKVAULT_SUSPICIOUS_HORIZON_SECS"),
            defaults.suspicious_horizon,
            "LINKVAULT_SUSPICIOUS_HORIZON_SECS",
        )?;
        let blacklist_duration = parse_secs(
            kv.get("LINKVAULT_BLACKLIST_SECS"),
            defaults.blacklist_duration,
            "LINKVAULT_BLACKLIST_SECS",
        )?;

        Ok(Self {
            artifact_root,
            links_file,
            index_file,
            signature_keys,
            tiers,
            max_redemptions,
            reaper_interval,
            reaper_max_errors,
            shutdown_timeout,
            fetch_timeout,
            progress_retention,
            rate_limit_max_requests,
            rate_limit_window,
            suspicious_threshold,
            suspicious_horizon,
            blacklist_duration,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: PathBuf::from(path),
        source,
    })?;

    let mut kv = HashMap::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parse_error = |reason| ConfigError::Parse {
            path: PathBuf::from(path),
            line: idx + 1,
            reason,
        };
        let (key, value) = line.split_once('=').ok_or_else(|| parse_error("expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(parse_error("empty key"));
        }
        kv.insert(key.to_string(), strip_quotes(value.trim()).to_string());
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|rest| rest.strip_suffix(quote)) {
            return inner;
        }
    }
    s
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn parse_path(value: Option<&String>, default: PathBuf) -> PathBuf {
    non_empty(value).map(PathBuf::from).unwrap_or(default)
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, ConfigError> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v.parse::<u32>().map_err(|_| invalid(key, "must be an integer")),
    }
}

fn parse_secs(
    value: Option<&String>,
    default: Duration,
    key: &'static str,
) -> Result<Duration, ConfigError> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| invalid(key, "must be a whole number of seconds")),
    }
}

fn parse_tiers(raw: &str) -> Result<TierTable, ConfigError> {
    const KEY: &str = "LINKVAULT_EXPIRY_TIERS";

    let mut tiers = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        let [name, max_mb, hours] = parts.as_slice() else {
            return Err(invalid(KEY, format!("`{entry}` is not name:max_mb:hours")));
        };
        let hours = hours
            .parse::<u32>()
            .map_err(|_| invalid(KEY, format!("`{entry}` has a non-integer expiry")))?;
        let tier = if *max_mb == "*" {
            ExpiryTier::unbounded(name, hours)
        } else {
            let max_mb = max_mb
                .parse::<f64>()
                .map_err(|_| invalid(KEY, format!("`{entry}` has a non-numeric size bound")))?;
            ExpiryTier::bounded(name, max_mb, hours)
        };
        tiers.push(tier);
    }

    Ok(TierTable::new(tiers)?)
}
