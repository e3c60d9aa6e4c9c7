//! ProgressTracker - 受付操作ごとの進捗
//!
//! ポーリングするクライアントから見て進捗が巻き戻らないよう、
//! 更新はすべて「現在値との max」を取ります。
//!
//! 終端状態（successful / failed）になった操作は `retention` の間だけ残し、
//! `sweep()`（ReaperLoop から毎パス呼ばれる）で捨てます。

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::domain::{OpId, OpStatus, ProgressView};
use crate::ports::{Clock, ProgressSink};

struct Tracked {
    view: ProgressView,
    finished_at: Option<DateTime<Utc>>,
}

pub struct ProgressTracker {
    ops: Mutex<HashMap<OpId, Tracked>>,
    clock: Arc<dyn Clock>,
    retention: Duration,
}

impl ProgressTracker {
    pub fn new(clock: Arc<dyn Clock>, retention: Duration) -> Self {
        Self {
            ops: Mutex::new(HashMap::new()),
            clock,
            retention,
        }
    }

    pub fn init(&self, op_id: OpId) {
        self.lock().insert(
            op_id,
            Tracked {
                view: ProgressView {
                    status: OpStatus::Submitted,
                    progress: OpStatus::Submitted.progress_floor(),
                    request_id: None,
                },
                finished_at: None,
            },
        );
    }

    /// 状態を進め、その状態の下限まで進捗を引き上げる
    pub fn set_status(&self, op_id: OpId, status: OpStatus) {
        let now = self.clock.now();
        let mut ops = self.lock();
        let Some(op) = ops.get_mut(&op_id) else {
            return;
        };
        if op.view.status.is_terminal() && op.view.status != status {
            warn!(%op_id, from = ?op.view.status, to = ?status, "ignoring status change after completion");
            return;
        }
        op.view.status = status;
        op.view.progress = op.view.progress.max(status.progress_floor());
        if status.is_terminal() {
            op.finished_at.get_or_insert(now);
        }
    }

    /// `fraction` (0.0..=1.0) を running 区間の進捗に写像する
    pub fn set_fraction(&self, op_id: OpId, fraction: f64) {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let floor = OpStatus::Running.progress_floor();
        let ceiling = OpStatus::Successful.progress_floor();
        let value = floor + (f64::from(ceiling - floor) * fraction).round() as u8;

        let mut ops = self.lock();
        if let Some(op) = ops.get_mut(&op_id) {
            if !op.view.status.is_terminal() {
                op.view.progress = op.view.progress.max(value);
            }
        }
    }

    pub fn set_request_id(&self, op_id: OpId, request_id: String) {
        if let Some(op) = self.lock().get_mut(&op_id) {
            op.view.request_id = Some(request_id);
        }
    }

    pub fn complete(&self, op_id: OpId) {
        let now = self.clock.now();
        if let Some(op) = self.lock().get_mut(&op_id) {
            op.view.status = OpStatus::Successful;
            op.view.progress = 100;
            op.finished_at.get_or_insert(now);
        }
    }

    pub fn fail(&self, op_id: OpId) {
        self.set_status(op_id, OpStatus::Failed);
    }

    pub fn get(&self, op_id: OpId) -> Option<ProgressView> {
        self.lock().get(&op_id).map(|op| op.view.clone())
    }

    pub fn remove(&self, op_id: OpId) -> Option<ProgressView> {
        self.lock().remove(&op_id).map(|op| op.view)
    }

    /// 終端状態になってから `retention` を過ぎた操作を捨て、捨てた件数を返す
    ///
    /// 実行中の操作は残す。
    pub fn sweep(&self) -> usize {
        let cutoff = self.clock.now() - self.retention;
        let mut ops = self.lock();
        let before = ops.len();
        ops.retain(|_, op| op.finished_at.is_none_or(|at| at >= cutoff));
        let evicted = before - ops.len();
        if evicted > 0 {
            debug!(evicted, remaining = ops.len(), "evicted finished progress entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OpId, Tracked>> {
        self.ops.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// 1 つの操作に紐づいた ProgressSink
pub struct ProgressReporter {
    tracker: Arc<ProgressTracker>,
    op_id: OpId,
}

impl ProgressReporter {
    pub fn new(tracker: Arc<ProgressTracker>, op_id: OpId) -> Self {
        Self { tracker, op_id }
    }

    pub fn op_id(&self) -> OpId {
        self.op_id
    }
}

impl ProgressSink for ProgressReporter {
    fn set_status(&self, status: OpStatus) {
        self.tracker.set_status(self.op_id, status);
    }

    fn set_fraction(&self, fraction: f64) {
        self.tracker.set_fraction(self.op_id, fraction);
    }

    fn set_request_id(&self, request_id: String) {
        self.tracker.set_request_id(self.op_id, request_id);
    }
}
