//! Progress - ポーリングするクライアントから見た受付操作の状態

use serde::{Deserialize, Serialize};

/// 1 つの受付操作のライフサイクル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Submitted,
    Accepted,
    Running,
    Successful,
    Failed,
}

impl OpStatus {
    /// この状態に到達した時点での進捗の下限
    pub fn progress_floor(self) -> u8 {
        match self {
            OpStatus::Submitted => 1,
            OpStatus::Accepted => 10,
            OpStatus::Running => 35,
            OpStatus::Successful => 90,
            OpStatus::Failed => 100,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OpStatus::Successful | OpStatus::Failed)
    }
}

/// 進捗のスナップショット
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    pub status: OpStatus,
    /// 0..=100。同じ op では減らない
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
