//! Broker - リクエスト処理層から呼ばれる窓口
//!
//! # submit の流れ
//! 1. AdmissionGate で受付可否を判定
//! 2. Canonicalizer で Signature を作る
//! 3. ArtifactCache を引く。ヒットすれば上流には行かない
//!    （リンク発行までに実体が消えていたらミスとして扱う）
//! 4. ミスなら Fetcher をタイムアウト付きで呼ぶ（どのロックも持たない）
//! 5. 取得結果を検証して ArtifactCache に記録
//! 6. LinkRegistry で新しい共有リンクを発行
//!
//! キャッシュヒットでも既存リンクは使い回さず、毎回新しいリンクを発行します。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::progress::{ProgressReporter, ProgressTracker};
use super::status::LinkStatusView;
use crate::admission::{Admission, AdmissionGate};
use crate::cache::ArtifactCache;
use crate::domain::{Canonicalizer, LinkId, OpId, OpStatus, ProgressView, RequestParams, Signature};
use crate::error::VaultError;
use crate::links::{LinkError, LinkRegistry, Redemption};
use crate::ports::{Clock, FetchError, FetchedArtifact, Fetcher, IdGenerator};
use crate::store::{ArtifactRoot, RemoveOutcome};

/// submit の結果
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub op_id: OpId,
    pub signature: Signature,
    pub link_id: LinkId,
    pub expiry_hours: u32,
    pub expires_at: DateTime<Utc>,
    pub filename: String,
    pub artifact_path: PathBuf,
    pub size_mb: f64,
    pub cache_hit: bool,
}

pub struct Broker {
    pub(crate) gate: Arc<AdmissionGate>,
    pub(crate) canonicalizer: Canonicalizer,
    pub(crate) cache: Arc<ArtifactCache>,
    pub(crate) links: Arc<LinkRegistry>,
    pub(crate) root: ArtifactRoot,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) fetch_timeout: Duration,
}

impl Broker {
    pub async fn submit(
        &self,
        identifier: &str,
        params: &RequestParams,
    ) -> Result<Submission, VaultError> {
        match self.gate.admit(identifier, params) {
            Admission::Allowed => {}
            Admission::Blacklisted { retry_after } => {
                return Err(VaultError::Blacklisted { retry_after });
            }
            Admission::Suspicious { threats } => return Err(VaultError::Suspicious(threats)),
            Admission::RateLimited { retry_after } => {
                return Err(VaultError::RateLimited { retry_after });
            }
        }

        let signature = self.canonicalizer.sign(params);
        let op_id = self.ids.generate_op_id();
        self.progress.init(op_id);

        if let Some(entry) = self.cache.lookup(&signature) {
            info!(%op_id, %signature, file = %entry.filename, "cache hit, skipping fetch");
            match self.finish(op_id, signature.clone(), entry.artifact_path, entry.artifact_size_mb, true) {
                // lookup と issue の間に Reaper が実体を消した。ミスとして取り直す
                Err(VaultError::Link(LinkError::NoSuchArtifact(path))) => {
                    warn!(%op_id, %signature, path = %path.display(), "cached artifact vanished before a link was issued");
                }
                result => return result.inspect_err(|_| self.progress.fail(op_id)),
            }
        }

        info!(%op_id, %signature, identifier, "cache miss, fetching artifact");
        self.progress.set_status(op_id, OpStatus::Accepted);

        let artifact = match self.fetch(op_id, params).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(%op_id, %signature, error = %e, "fetch failed");
                self.progress.fail(op_id);
                return Err(e.into());
            }
        };
        let size_mb = artifact.size_mb();

        let result = self
            .cache
            .insert(signature.clone(), artifact.path.clone(), size_mb)
            .map_err(VaultError::from)
            .and_then(|_| self.finish(op_id, signature, artifact.path, size_mb, false));
        if result.is_err() {
            self.progress.fail(op_id);
        }
        result
    }

    /// リンクを 1 回消費して、返すべきファイルの情報を得る
    pub fn redeem(&self, link_id: &str) -> Result<Redemption, VaultError> {
        let link_id: LinkId = link_id.parse()?;
        Ok(self.links.redeem(link_id)?)
    }

    /// リンクの状態（無効でもエラーにはしない）
    pub fn link_status(&self, link_id: &str) -> LinkStatusView {
        let Ok(link_id) = link_id.parse::<LinkId>() else {
            return LinkStatusView::not_found();
        };
        match self.links.inspect(link_id) {
            Ok((link, state)) => LinkStatusView::from_link(&link, state, self.clock.now()),
            Err(LinkError::NotFound(_)) => LinkStatusView::not_found(),
            Err(e) => {
                error!(%link_id, error = %e, "unexpected error while inspecting link");
                LinkStatusView::not_found()
            }
        }
    }

    pub fn progress(&self, op_id: &str) -> Option<ProgressView> {
        let op_id: OpId = op_id.parse().ok()?;
        self.progress.get(op_id)
    }

    fn finish(
        &self,
        op_id: OpId,
        signature: Signature,
        artifact_path: PathBuf,
        size_mb: f64,
        cache_hit: bool,
    ) -> Result<Submission, VaultError> {
        let issued = self.links.issue(&artifact_path, size_mb)?;
        self.progress.complete(op_id);
        Ok(Submission {
            op_id,
            signature,
            link_id: issued.link_id,
            expiry_hours: issued.expiry_hours,
            expires_at: issued.expires_at,
            filename: artifact_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            artifact_path,
            size_mb,
            cache_hit,
        })
    }

    async fn fetch(&self, op_id: OpId, params: &RequestParams) -> Result<FetchedArtifact, FetchError> {
        let reporter = ProgressReporter::new(Arc::clone(&self.progress), op_id);
        let fetched = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(params, &reporter))
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))??;
        self.validate(fetched)
    }

    /// root の内側にあり、空でないことを確認する。空ファイルは消す
    fn validate(&self, fetched: FetchedArtifact) -> Result<FetchedArtifact, FetchError> {
        let path = match self.root.resolve(&fetched.path)? {
            Some(Ok(inside)) => inside,
            Some(Err(outside)) => return Err(FetchError::OutsideRoot(outside)),
            None => {
                return Err(FetchError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("fetched artifact {} does not exist", fetched.path.display()),
                )));
            }
        };

        let size_bytes = std::fs::metadata(&path)?.len();
        if size_bytes == 0 {
            match self.root.remove(&path) {
                Ok(RemoveOutcome::Removed | RemoveOutcome::AlreadyGone) => {}
                Ok(RemoveOutcome::OutsideRoot(p)) => {
                    error!(path = %p.display(), "empty artifact resolved outside the root");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove empty artifact"),
            }
            return Err(FetchError::EmptyArtifact);
        }

        Ok(FetchedArtifact { path, size_bytes })
    }
}
