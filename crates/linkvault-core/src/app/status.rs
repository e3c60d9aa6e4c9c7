//! Status - リンク状態の問い合わせ結果
//!
//! リンク状態のエンドポイントがそのまま JSON にして返す形です。
//! 無効なリンクでもエラーにはせず、`valid: false` と理由を返します。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LinkState, ShareLink};

/// 無効な理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotFound,
    Expired,
    Exhausted,
    ArtifactMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkStatusView {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<InvalidReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// 小数 1 桁に丸めた残り時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<u32>,
}

impl LinkStatusView {
    pub fn not_found() -> Self {
        Self {
            valid: false,
            reason: Some(InvalidReason::NotFound),
            filename: None,
            file_size_mb: None,
            expires_at: None,
            remaining_hours: None,
            download_count: None,
            max_downloads: None,
        }
    }

    pub fn from_link(link: &ShareLink, state: LinkState, now: DateTime<Utc>) -> Self {
        let reason = match state {
            LinkState::Valid => None,
            LinkState::Expired => Some(InvalidReason::Expired),
            LinkState::Exhausted => Some(InvalidReason::Exhausted),
            LinkState::ArtifactMissing => Some(InvalidReason::ArtifactMissing),
        };
        let remaining_secs = link.remaining(now).num_seconds() as f64;
        Self {
            valid: state.is_valid(),
            reason,
            filename: Some(link.filename.clone()),
            file_size_mb: Some(link.artifact_size_mb),
            expires_at: Some(link.expires_at),
            remaining_hours: Some((remaining_secs / 3600.0 * 10.0).round() / 10.0),
            download_count: Some(link.redemption_count),
            max_downloads: Some(link.max_redemptions),
        }
    }
}
