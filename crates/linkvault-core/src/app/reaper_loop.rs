//! ReaperLoop - 無効なリンクと成果物の定期回収
//!
//! # フロー（起動直後に 1 回、その後 interval ごと）
//! 1. `LinkRegistry::reap()` で無効なリンクを取り除き、実体ファイルを消す
//! 2. `AdmissionGate::sweep()` で古いウィンドウやブラックリストを捨てる
//! 3. `ProgressTracker::sweep()` で保持期間を過ぎた進捗を捨てる
//!
//! ファイル削除と fsync を伴うので、パスは `spawn_blocking` で実行します。
//!
//! # 停止
//! - `ReaperHandle::shutdown()` で停止を要求し、上限時間まで終了を待つ
//! - 待ち切れなければ warn を出してタスクを abort する
//! - どちらの場合も最後に 1 回だけ回収パスを実行する
//! - リンク単位の障害が連続して閾値を超えたら、ループは自分で止まる

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::progress::ProgressTracker;
use crate::admission::AdmissionGate;
use crate::links::{LinkRegistry, ReapReport};
use crate::store::ArtifactRoot;

/// ループが終わった理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaperExit {
    Shutdown,
    TooManyErrors,
}

pub struct ReaperLoop {
    registry: Arc<LinkRegistry>,
    gate: Arc<AdmissionGate>,
    progress: Arc<ProgressTracker>,
    root: ArtifactRoot,
    interval: Duration,
    max_errors: u32,
}

impl ReaperLoop {
    pub fn new(
        registry: Arc<LinkRegistry>,
        gate: Arc<AdmissionGate>,
        progress: Arc<ProgressTracker>,
        root: ArtifactRoot,
        interval: Duration,
        max_errors: u32,
    ) -> Self {
        Self {
            registry,
            gate,
            progress,
            root,
            interval,
            max_errors,
        }
    }

    /// 回収パスを 1 回だけ実行する（ブロッキング）
    pub fn run_once(&self) -> ReapReport {
        let report = self.registry.reap(&self.root);
        self.gate.sweep();
        let evicted_progress = self.progress.sweep();
        debug!(
            removed_links = report.removed_links,
            removed_files = report.removed_files,
            faults = report.faults,
            evicted_progress,
            "reaper pass finished"
        );
        report
    }

    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = Arc::new(self);
        let join = tokio::spawn(Arc::clone(&reaper).run(shutdown_rx));
        ReaperHandle {
            shutdown_tx,
            join,
            reaper,
        }
    }

    /// `run_once` をブロッキング用スレッドで実行する。パニックしたら None
    async fn run_blocking(self: Arc<Self>) -> Option<ReapReport> {
        match tokio::task::spawn_blocking(move || self.run_once()).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "reaper pass panicked");
                None
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> ReaperExit {
        info!(interval_secs = self.interval.as_secs(), "reaper started");
        let mut consecutive_errors: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                info!("reaper stopping on request");
                return ReaperExit::Shutdown;
            }

            let errors = match Arc::clone(&self).run_blocking().await {
                Some(report) if report.is_clean() => 0,
                Some(report) => {
                    warn!(
                        faults = report.faults,
                        persist_failed = report.persist_error.is_some(),
                        "reaper pass had errors"
                    );
                    report.faults as u32 + u32::from(report.persist_error.is_some())
                }
                None => 1,
            };
            if errors == 0 {
                consecutive_errors = 0;
            } else {
                consecutive_errors = consecutive_errors.saturating_add(errors);
                if consecutive_errors > self.max_errors {
                    error!(
                        consecutive_errors,
                        max_errors = self.max_errors,
                        "reaper exceeded its error threshold and is stopping; expired artifacts will no longer be reclaimed"
                    );
                    return ReaperExit::TooManyErrors;
                }
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // Sender が drop されたら止まる
                    if changed.is_err() {
                        return ReaperExit::Shutdown;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

/// 起動済み ReaperLoop の操作用ハンドル
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<ReaperExit>,
    reaper: Arc<ReaperLoop>,
}

impl ReaperHandle {
    pub fn request_shutdown(&self) {
        // ループが先に終わっていれば受信側はもういない
        let _ = self.shutdown_tx.send(true);
    }

    /// ループが（自分で止まった場合も含めて）終了しているか
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 停止を要求して `timeout` まで待ち、最後の回収パスを実行する
    ///
    /// 時間内に終わったならその終了理由を返す。
    pub async fn shutdown(mut self, timeout: Duration) -> Option<ReaperExit> {
        self.request_shutdown();

        let exit = match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(exit)) => Some(exit),
            Ok(Err(e)) => {
                error!(error = %e, "reaper task panicked");
                None
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs_f64(), "reaper did not stop in time, aborting it");
                self.join.abort();
                None
            }
        };

        if let Some(report) = Arc::clone(&self.reaper).run_blocking().await {
            info!(removed_links = report.removed_links, "final reclamation pass done");
        }
        exit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{RateLimiter, ReputationTracker, ThreatDetector};
    use crate::domain::{OpId, TierTable};
    use crate::ports::{FixedClock, IdGenerator, UlidGenerator};
    use crate::store::SnapshotFile;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        clock: Arc<FixedClock>,
        root: ArtifactRoot,
        registry: Arc<LinkRegistry>,
        gate: Arc<AdmissionGate>,
        progress: Arc<ProgressTracker>,
        links_file: SnapshotFile,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = ArtifactRoot::open(dir.path().join("downloads")).unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(clock.clone()));
        let links_file = SnapshotFile::new(dir.path().join("temp_links.json"));
        let registry = Arc::new(LinkRegistry::open(
            links_file.clone(),
            clock.clone(),
            ids,
            TierTable::default(),
            5,
        ));
        let gate = Arc::new(AdmissionGate::new(
            RateLimiter::new(2, chrono::Duration::seconds(60)),
            ReputationTracker::new(10, chrono::Duration::hours(1), chrono::Duration::hours(1)),
            ThreatDetector::new().unwrap(),
            clock.clone(),
        ));
        let progress = Arc::new(ProgressTracker::new(clock.clone(), chrono::Duration::hours(1)));
        Fixture {
            _dir: dir,
            clock,
            root,
            registry,
            gate,
            progress,
            links_file,
        }
    }

    impl Fixture {
        fn reaper(&self, interval: Duration, max_errors: u32) -> ReaperLoop {
            ReaperLoop::new(
                self.registry.clone(),
                self.gate.clone(),
                self.progress.clone(),
                self.root.clone(),
                interval,
                max_errors,
            )
        }

        fn artifact(&self, name: &str) -> std::path::PathBuf {
            let path = self.root.join(name);
            fs::write(&path, b"data").unwrap();
            path
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn periodic_pass_reclaims_expired_links() {
        let fx = fixture();
        let path = fx.artifact("a.nc");
        fx.registry.issue(&path, 1.0).unwrap();
        fx.clock.advance(chrono::Duration::hours(3));

        let handle = fx.reaper(Duration::from_millis(10), 10).spawn();
        wait_until(|| fx.registry.counts().total == 0).await;

        assert_eq!(fx.registry.counts().total, 0);
        assert!(!path.exists());
        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, Some(ReaperExit::Shutdown));
    }

    #[tokio::test]
    async fn shutdown_runs_a_final_pass() {
        let fx = fixture();
        let path = fx.artifact("a.nc");
        fx.registry.issue(&path, 1.0).unwrap();

        let handle = fx.reaper(Duration::from_secs(3600), 10).spawn();
        fx.clock.advance(chrono::Duration::hours(3));
        assert_eq!(fx.registry.counts().expired, 1);

        let exit = handle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(exit, Some(ReaperExit::Shutdown));
        assert_eq!(fx.registry.counts().total, 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn stops_itself_after_too_many_errors() {
        let fx = fixture();
        // ファイルとしてリンクを発行してから同名のディレクトリに差し替えると、削除が失敗する
        let path = fx.artifact("stuck.nc");
        fx.registry.issue(&path, 1.0).unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fx.clock.advance(chrono::Duration::hours(3));

        let handle = fx.reaper(Duration::from_millis(10), 0).spawn();
        wait_until(|| handle.is_finished()).await;

        assert!(handle.is_finished());
        // 障害があってもリンク自体は回収されている
        assert_eq!(fx.registry.counts().total, 0);
        assert_eq!(
            handle.shutdown(Duration::from_secs(1)).await,
            Some(ReaperExit::TooManyErrors)
        );
    }

    #[test]
    fn run_once_sweeps_the_gate() {
        let fx = fixture();
        fx.gate.admit("ip", &crate::domain::RequestParams::new());
        fx.clock.advance(chrono::Duration::minutes(5));

        fx.reaper(Duration::from_secs(300), 10).run_once();
        assert_eq!(fx.gate.counts().tracked_identifiers, 0);
    }

    #[tokio::test]
    async fn first_pass_runs_at_startup() {
        let fx = fixture();
        let path = fx.artifact("a.nc");
        fx.registry.issue(&path, 1.0).unwrap();
        // 停止中に期限が切れていたリンク
        fx.clock.advance(chrono::Duration::hours(3));

        let handle = fx.reaper(Duration::from_secs(3600), 10).spawn();
        wait_until(|| fx.registry.counts().total == 0).await;

        assert_eq!(fx.registry.counts().total, 0);
        assert!(!path.exists());
        assert_eq!(handle.shutdown(Duration::from_secs(1)).await, Some(ReaperExit::Shutdown));
    }

    #[tokio::test]
    async fn persist_failures_count_toward_the_error_threshold() {
        let fx = fixture();
        fx.registry.issue(&fx.artifact("a.nc"), 1.0).unwrap();
        fx.clock.advance(chrono::Duration::hours(3));
        // staging パスがディレクトリなので保存が失敗する
        fs::create_dir(fx.links_file.staging_path()).unwrap();

        let handle = fx.reaper(Duration::from_millis(10), 0).spawn();
        wait_until(|| handle.is_finished()).await;

        assert!(handle.is_finished());
        assert_eq!(
            handle.shutdown(Duration::from_secs(1)).await,
            Some(ReaperExit::TooManyErrors)
        );
        // メモリ上は回収済み、ディスク上は回収前のまま
        assert_eq!(fx.registry.counts().total, 0);
        let on_disk: serde_json::Value =
            serde_json::from_slice(&fs::read(fx.links_file.live_path()).unwrap()).unwrap();
        assert_eq!(on_disk.as_object().unwrap().len(), 1);
    }

    #[test]
    fn run_once_evicts_finished_progress() {
        let fx = fixture();
        let op = OpId::from_ulid(ulid::Ulid::new());
        fx.progress.init(op);
        fx.progress.complete(op);
        fx.clock.advance(chrono::Duration::hours(2));

        fx.reaper(Duration::from_secs(300), 10).run_once();
        assert_eq!(fx.progress.get(op), None);
        assert!(fx.progress.is_empty());
    }
}
