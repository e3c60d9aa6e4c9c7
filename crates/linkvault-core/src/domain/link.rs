//! ShareLink - 期限付き・回数制限付きの共有リンク
//!
//! # 有効性
//! リンクが有効なのは次の 3 つが全て成り立つときだけです。
//! - `now < expires_at`
//! - `redemption_count < max_redemptions`
//! - `artifact_path` がディスク上に存在する
//!
//! 無効な理由は `LinkState` で区別します（期限切れ / 回数超過 / 実体なし）。
//! 呼び出し側はこれを見て「期限切れです」「ダウンロード回数の上限です」を
//! 出し分けます。

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 永続化フォーマットのフィールド名は既存ファイルとの互換のため
/// `download_count` / `max_downloads` のまま
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub filename: String,
    pub artifact_path: PathBuf,
    pub artifact_size_mb: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "download_count")]
    pub redemption_count: u32,
    #[serde(rename = "max_downloads")]
    pub max_redemptions: u32,
}

/// リンクの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Valid,
    Expired,
    Exhausted,
    ArtifactMissing,
}

impl LinkState {
    pub fn is_valid(self) -> bool {
        self == LinkState::Valid
    }
}

impl ShareLink {
    pub fn new(
        artifact_path: PathBuf,
        artifact_size_mb: f64,
        created_at: DateTime<Utc>,
        expiry_hours: u32,
        max_redemptions: u32,
    ) -> Self {
        let filename = file_name_of(&artifact_path);
        Self {
            filename,
            artifact_path,
            artifact_size_mb,
            created_at,
            expires_at: created_at + Duration::hours(i64::from(expiry_hours.max(1))),
            redemption_count: 0,
            max_redemptions,
        }
    }

    /// 時刻と回数だけで判定（ファイルシステムに触れない）
    pub fn state_ignoring_artifact(&self, now: DateTime<Utc>) -> LinkState {
        if now >= self.expires_at {
            LinkState::Expired
        } else if self.redemption_count >= self.max_redemptions {
            LinkState::Exhausted
        } else {
            LinkState::Valid
        }
    }

    /// 実体ファイルの存在まで含めた判定
    pub fn state_at(&self, now: DateTime<Utc>) -> LinkState {
        match self.state_ignoring_artifact(now) {
            LinkState::Valid if !self.artifact_path.exists() => LinkState::ArtifactMissing,
            state => state,
        }
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
