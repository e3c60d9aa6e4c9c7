//! Observability - 状態エンドポイント向けの集計ビュー
//!
//! 各コンポーネントの `counts()` が返すスナップショットです。
//! どれも serde でそのまま JSON にできます。

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub exhausted: usize,
    pub artifact_missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounts {
    pub entries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionCounts {
    pub tracked_identifiers: usize,
    pub blacklisted: usize,
}

/// 状態エンドポイント向けのまとめ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStatus {
    pub links: RegistryCounts,
    pub cache: CacheCounts,
    pub admission: AdmissionCounts,
}
