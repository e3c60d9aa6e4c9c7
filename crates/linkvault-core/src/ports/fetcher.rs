//! Fetcher port - 上流のデータ取得サービス
//!
//! 取得には数分〜数時間かかります。Broker はこの呼び出しを
//! どのロックも持たない状態で、タイムアウト付きで行います。

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{OpStatus, RequestParams};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// 取得に成功した成果物
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl FetchedArtifact {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / BYTES_PER_MB
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream rejected the request: {0}")]
    Upstream(String),

    #[error("fetch did not finish within {0:?}")]
    Timeout(Duration),

    #[error("fetched artifact is empty")]
    EmptyArtifact,

    #[error("fetched artifact is outside the artifact root: {0}")]
    OutsideRoot(PathBuf),

    #[error("io error while fetching: {0}")]
    Io(#[from] std::io::Error),
}

/// 取得中の進捗を報告する先
///
/// 実装は `app::progress::ProgressReporter`。進捗は単調増加に丸められるので、
/// Fetcher 側は上流が返す値をそのまま流してよい。
pub trait ProgressSink: Send + Sync {
    fn set_status(&self, status: OpStatus);

    /// `fraction` は 0.0..=1.0
    fn set_fraction(&self, fraction: f64);

    fn set_request_id(&self, request_id: String);
}

/// Fetcher は正規化済みパラメータから成果物ファイルを作る
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        params: &RequestParams,
        progress: &dyn ProgressSink,
    ) -> Result<FetchedArtifact, FetchError>;
}
