//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! VaultConfig と Fetcher から、共有される各コンポーネント
//! （ArtifactCache / LinkRegistry / AdmissionGate / ProgressTracker）を組み立てます。
//! グローバル変数は使わず、すべて App が所有して Broker と ReaperLoop に注入します。
//!
//! # Fail-fast
//! Fetcher の未設定、成果物ディレクトリが作れない、などは
//! `build()` の時点で BuildError にします。

use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionGate, RateLimiter, ReputationTracker, ThreatDetector};
use crate::cache::ArtifactCache;
use crate::config::VaultConfig;
use crate::domain::Canonicalizer;
use crate::links::{LinkRegistry, ReapReport};
use crate::observability::VaultStatus;
use crate::ports::{Clock, Fetcher, IdGenerator, SystemClock, UlidGenerator};
use crate::store::{ArtifactRoot, SnapshotFile};

use super::broker::Broker;
use super::progress::ProgressTracker;
use super::reaper_loop::{ReaperHandle, ReaperLoop};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(VaultConfig::load()?)
///     .fetcher(Arc::new(MyFetcher::new()))
///     .build()?;
/// let reaper = app.start_reaper();
/// let submission = app.broker().submit("203.0.113.7", &params).await?;
/// ```
pub struct AppBuilder {
    config: VaultConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no fetcher configured; call AppBuilder::fetcher() before build()")]
    MissingFetcher,

    #[error("cannot prepare artifact root {path}: {source}")]
    ArtifactRoot {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid threat pattern: {0}")]
    ThreatPatterns(#[from] regex::Error),

    #[error("{0} is out of range")]
    DurationOutOfRange(&'static str),
}

impl AppBuilder {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            fetcher: None,
            clock: None,
            ids: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 省略時は SystemClock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 省略時は clock を使う UlidGenerator
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let config = self.config;
        let fetcher = self.fetcher.ok_or(BuildError::MissingFetcher)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let root = ArtifactRoot::open(&config.artifact_root).map_err(|source| {
            BuildError::ArtifactRoot {
                path: config.artifact_root.clone(),
                source,
            }
        })?;

        let gate = Arc::new(AdmissionGate::new(
            RateLimiter::new(
                config.rate_limit_max_requests,
                to_chrono(config.rate_limit_window, "rate limit window")?,
            ),
            ReputationTracker::new(
                config.suspicious_threshold,
                to_chrono(config.suspicious_horizon, "suspicious horizon")?,
                to_chrono(config.blacklist_duration, "blacklist duration")?,
            ),
            ThreatDetector::new()?,
            Arc::clone(&clock),
        ));
        let cache = Arc::new(ArtifactCache::open(
            SnapshotFile::new(&config.index_file),
            Arc::clone(&clock),
        ));
        let registry = Arc::new(LinkRegistry::open(
            SnapshotFile::new(&config.links_file),
            Arc::clone(&clock),
            Arc::clone(&ids),
            config.tiers.clone(),
            config.max_redemptions,
        ));
        let progress = Arc::new(ProgressTracker::new(
            Arc::clone(&clock),
            to_chrono(config.progress_retention, "progress retention")?,
        ));

        let broker = Arc::new(Broker {
            gate: Arc::clone(&gate),
            canonicalizer: Canonicalizer::new(config.signature_keys.iter().cloned()),
            cache: Arc::clone(&cache),
            links: Arc::clone(&registry),
            root: root.clone(),
            fetcher,
            progress: Arc::clone(&progress),
            ids,
            clock,
            fetch_timeout: config.fetch_timeout,
        });

        Ok(App {
            broker,
            registry,
            cache,
            gate,
            progress,
            root,
            reaper_interval: config.reaper_interval,
            reaper_max_errors: config.reaper_max_errors,
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

fn to_chrono(duration: Duration, what: &'static str) -> Result<chrono::Duration, BuildError> {
    chrono::Duration::from_std(duration).map_err(|_| BuildError::DurationOutOfRange(what))
}

/// App は構築済みのコンポーネント一式
pub struct App {
    broker: Arc<Broker>,
    registry: Arc<LinkRegistry>,
    cache: Arc<ArtifactCache>,
    gate: Arc<AdmissionGate>,
    progress: Arc<ProgressTracker>,
    root: ArtifactRoot,
    reaper_interval: Duration,
    reaper_max_errors: u32,
    shutdown_timeout: Duration,
}

impl App {
    /// リクエスト処理層に渡す窓口
    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub fn artifact_root(&self) -> &ArtifactRoot {
        &self.root
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Reaper をバックグラウンドタスクとして起動する（tokio ランタイム内で呼ぶこと）
    pub fn start_reaper(&self) -> ReaperHandle {
        self.reaper().spawn()
    }

    /// 回収パスをその場で 1 回実行する
    pub fn reap_now(&self) -> ReapReport {
        self.reaper().run_once()
    }

    pub fn status(&self) -> VaultStatus {
        VaultStatus {
            links: self.registry.counts(),
            cache: self.cache.counts(),
            admission: self.gate.counts(),
        }
    }

    fn reaper(&self) -> ReaperLoop {
        ReaperLoop::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.gate),
            Arc::clone(&self.progress),
            self.root.clone(),
            self.reaper_interval,
            self.reaper_max_errors,
        )
    }
}
