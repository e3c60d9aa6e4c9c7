//! LinkRegistry - 共有リンクの発行・検証・消費・回収
//!
//! # クリティカルセクション
//! issue / redeem / reap はどれも
//! 「ロック取得 → マップ変更 → スナップショット保存 → ロック解放」です。
//! 保存に失敗した変更はメモリ上でも巻き戻すので、
//! メモリとディスクの状態がずれたまま処理が進むことはありません。
//! （reap だけは例外で、無効なリンクの削除は巻き戻さない。次の保存で追いつく）

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::domain::{LinkId, LinkState, ShareLink, TierTable};
use crate::observability::RegistryCounts;
use crate::ports::{Clock, IdGenerator};
use crate::store::{ArtifactRoot, RemoveOutcome, SnapshotError, SnapshotFile};

/// Default cap on how many times one link can be redeemed.
pub const DEFAULT_MAX_REDEMPTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link {0} not found")]
    NotFound(LinkId),

    #[error("link {0} has expired")]
    Expired(LinkId),

    #[error("link {0} has reached its download limit")]
    Exhausted(LinkId),

    #[error("artifact behind link {0} no longer exists")]
    ArtifactMissing(LinkId),

    /// 存在しない成果物へのリンク発行（呼び出し側の契約違反）
    #[error("cannot issue a link for missing artifact {0}")]
    NoSuchArtifact(PathBuf),

    #[error("failed to persist link registry: {0}")]
    Persist(#[from] SnapshotError),
}

impl LinkError {
    fn for_state(id: LinkId, state: LinkState) -> Option<Self> {
        match state {
            LinkState::Valid => None,
            LinkState::Expired => Some(LinkError::Expired(id)),
            LinkState::Exhausted => Some(LinkError::Exhausted(id)),
            LinkState::ArtifactMissing => Some(LinkError::ArtifactMissing(id)),
        }
    }
}

/// issue の結果
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedLink {
    pub link_id: LinkId,
    pub expiry_hours: u32,
    pub expires_at: DateTime<Utc>,
}

/// redeem の結果（ファイルを返すのに必要な情報）
#[derive(Debug, Clone, PartialEq)]
pub struct Redemption {
    pub link_id: LinkId,
    pub artifact_path: PathBuf,
    pub filename: String,
    pub redemption_count: u32,
    pub max_redemptions: u32,
}

impl Redemption {
    pub fn remaining(&self) -> u32 {
        self.max_redemptions.saturating_sub(self.redemption_count)
    }
}

/// 1 回の回収パスの結果
#[derive(Debug, Default)]
pub struct ReapReport {
    pub removed_links: usize,
    pub removed_files: usize,
    /// 他の有効なリンクがまだ参照しているので残したファイル
    pub kept_shared_files: usize,
    pub containment_violations: usize,
    /// ファイル削除の I/O 失敗など、リンク単位の障害
    pub faults: usize,
    pub persist_error: Option<SnapshotError>,
}

impl ReapReport {
    pub fn is_clean(&self) -> bool {
        self.faults == 0 && self.persist_error.is_none()
    }
}

pub struct LinkRegistry {
    links: Mutex<HashMap<LinkId, ShareLink>>,
    file: SnapshotFile,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    tiers: TierTable,
    max_redemptions: u32,
}

impl LinkRegistry {
    /// 状態ファイルから復元して開く
    pub fn open(
        file: SnapshotFile,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        tiers: TierTable,
        max_redemptions: u32,
    ) -> Self {
        let loaded = file.load::<BTreeMap<LinkId, ShareLink>>();
        debug!(links = loaded.state.len(), source = ?loaded.source, "link registry loaded");
        Self {
            links: Mutex::new(loaded.state.into_iter().collect()),
            file,
            clock,
            ids,
            tiers,
            max_redemptions,
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// 成果物に対して新しいリンクを発行する
    ///
    /// 期限はサイズ別の tier で決まり、発行のたびに新しい ID になる
    /// （キャッシュヒットでも既存リンクは使い回さない）。
    pub fn issue(&self, artifact_path: &Path, artifact_size_mb: f64) -> Result<IssuedLink, LinkError> {
        if !artifact_path.is_file() {
            return Err(LinkError::NoSuchArtifact(artifact_path.to_path_buf()));
        }

        let expiry_hours = self.tiers.expiry_hours(artifact_size_mb);
        let link = ShareLink::new(
            artifact_path.to_path_buf(),
            artifact_size_mb,
            self.clock.now(),
            expiry_hours,
            self.max_redemptions,
        );
        let expires_at = link.expires_at;

        let mut links = self.lock();
        let mut link_id = self.ids.generate_link_id();
        while links.contains_key(&link_id) {
            link_id = self.ids.generate_link_id();
        }
        links.insert(link_id, link);

        if let Err(e) = self.persist(&links) {
            error!(%link_id, error = %e, "failed to persist issued link");
            links.remove(&link_id);
            return Err(e.into());
        }

        info!(%link_id, expiry_hours, size_mb = artifact_size_mb, "link issued");
        Ok(IssuedLink {
            link_id,
            expiry_hours,
            expires_at,
        })
    }

    /// 現在の状態（存在しなければ NotFound）
    pub fn check(&self, link_id: LinkId) -> Result<LinkState, LinkError> {
        let now = self.clock.now();
        let links = self.lock();
        links
            .get(&link_id)
            .map(|link| link.state_at(now))
            .ok_or(LinkError::NotFound(link_id))
    }

    pub fn is_valid(&self, link_id: LinkId) -> Result<bool, LinkError> {
        self.check(link_id).map(LinkState::is_valid)
    }

    /// リンクのコピーと状態
    pub fn inspect(&self, link_id: LinkId) -> Result<(ShareLink, LinkState), LinkError> {
        let now = self.clock.now();
        let links = self.lock();
        let link = links.get(&link_id).ok_or(LinkError::NotFound(link_id))?;
        Ok((link.clone(), link.state_at(now)))
    }

    /// 有効なリンクを 1 回消費する
    ///
    /// 判定と加算は同じロックの中で行うので、同じ ID への同時 redeem でも
    /// 成功回数は `max_redemptions` を超えない。
    pub fn redeem(&self, link_id: LinkId) -> Result<Redemption, LinkError> {
        let now = self.clock.now();
        let mut links = self.lock();

        let link = links.get_mut(&link_id).ok_or(LinkError::NotFound(link_id))?;
        if let Some(err) = LinkError::for_state(link_id, link.state_at(now)) {
            return Err(err);
        }
        link.redemption_count += 1;
        let redemption = Redemption {
            link_id,
            artifact_path: link.artifact_path.clone(),
            filename: link.filename.clone(),
            redemption_count: link.redemption_count,
            max_redemptions: link.max_redemptions,
        };

        if let Err(e) = self.persist(&links) {
            error!(%link_id, error = %e, "failed to persist redemption");
            if let Some(link) = links.get_mut(&link_id) {
                link.redemption_count -= 1;
            }
            return Err(e.into());
        }

        debug!(%link_id, count = redemption.redemption_count, "link redeemed");
        Ok(redemption)
    }

    /// 無効なリンクを取り除き、他から参照されていない実体ファイルを削除する
    ///
    /// 削除は `root` の内側のパスに限る。1 件も取り除かなければ保存しない。
    pub fn reap(&self, root: &ArtifactRoot) -> ReapReport {
        let now = self.clock.now();
        let mut report = ReapReport::default();
        let mut links = self.lock();

        let mut doomed = Vec::new();
        let mut surviving_paths = HashSet::new();
        for (id, link) in links.iter() {
            if link.state_at(now).is_valid() {
                surviving_paths.insert(link.artifact_path.as_path());
            } else {
                doomed.push(*id);
            }
        }

        let mut handled_paths: HashSet<PathBuf> = HashSet::new();
        for id in &doomed {
            let Some(link) = links.get(id) else { continue };
            let path = link.artifact_path.as_path();
            if surviving_paths.contains(path) {
                report.kept_shared_files += 1;
                continue;
            }
            if !handled_paths.insert(path.to_path_buf()) {
                continue;
            }
            match root.remove(path) {
                Ok(RemoveOutcome::Removed) => {
                    report.removed_files += 1;
                    info!(link_id = %id, file = %link.filename, "removed expired artifact");
                }
                Ok(RemoveOutcome::AlreadyGone) => {}
                Ok(RemoveOutcome::OutsideRoot(resolved)) => {
                    report.containment_violations += 1;
                    error!(
                        link_id = %id,
                        path = %resolved.display(),
                        root = %root.path().display(),
                        "refusing to delete artifact outside the artifact root"
                    );
                }
                Err(e) => {
                    // リンク自体は回収する
                    report.faults += 1;
                    error!(link_id = %id, path = %path.display(), error = %e, "failed to delete artifact");
                }
            }
        }
        drop(surviving_paths);

        for id in &doomed {
            links.remove(id);
        }
        report.removed_links = doomed.len();

        if report.removed_links > 0 {
            match self.persist(&links) {
                Ok(()) => info!(removed = report.removed_links, "reaped invalid links"),
                Err(e) => {
                    error!(error = %e, "failed to persist link registry after reaping");
                    report.persist_error = Some(e);
                }
            }
        }

        if report.kept_shared_files > 0 {
            debug!(kept = report.kept_shared_files, "artifacts still shared by live links");
        }
        report
    }

    pub fn counts(&self) -> RegistryCounts {
        let now = self.clock.now();
        let links = self.lock();
        let mut counts = RegistryCounts {
            total: links.len(),
            ..RegistryCounts::default()
        };
        for link in links.values() {
            match link.state_at(now) {
                LinkState::Valid => counts.valid += 1,
                LinkState::Expired => counts.expired += 1,
                LinkState::Exhausted => counts.exhausted += 1,
                LinkState::ArtifactMissing => counts.artifact_missing += 1,
            }
        }
        counts
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LinkId, ShareLink>> {
        self.links.lock().unwrap_or_else(|poisoned| {
            warn!("link registry lock was poisoned, continuing with last committed state");
            poisoned.into_inner()
        })
    }

    fn persist(&self, links: &HashMap<LinkId, ShareLink>) -> Result<(), SnapshotError> {
        let ordered: BTreeMap<&LinkId, &ShareLink> = links.iter().collect();
        self.file.save(&ordered)
    }
}
