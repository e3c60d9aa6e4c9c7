//! Errors - エラーの運用分類
//!
//! 呼び出し側（HTTP 層など）が「再試行するか」「ユーザーに何を見せるか」を
//! 決めるための分類です。個々のエラー型は `crate::error` にあり、
//! それぞれ `kind()` でここに写像されます。

use serde::{Deserialize, Serialize};

/// ErrorKind は実行エラーの分類
///
/// - Validation: 入力不正。即時拒否、再試行しない
/// - Resource: fetch やファイルシステムの失敗。呼び出し側で有限回の再試行対象
/// - RateLimit: `retry_after` だけ待てば回復する
/// - System: 永続化・初期化の失敗。その操作にとっては致命的
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Resource,
    RateLimit,
    System,
}

impl ErrorKind {
    /// 呼び出し側での再試行が意味を持つか
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Resource | ErrorKind::RateLimit)
    }
}
