//! AdmissionGate - 受付可否の判定
//!
//! # 判定順序
//! 1. ブラックリスト（期間中なら拒否）
//! 2. 不審な入力（検知したら不審イベントを記録して拒否）
//! 3. レート制限（超過したら不審イベントを記録して拒否）
//!
//! # Fail-open
//! ゲート内部の障害（ロックの poison など）では、リクエストを **通します**。
//! 障害は error ログに残します。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use super::{RateDecision, RateLimiter, ReputationTracker, ThreatDetector};
use crate::domain::RequestParams;
use crate::observability::AdmissionCounts;
use crate::ports::Clock;

/// 判定結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Blacklisted { retry_after: Duration },
    Suspicious { threats: Vec<&'static str> },
    RateLimited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

pub struct AdmissionGate {
    limiter: RateLimiter,
    reputation: ReputationTracker,
    detector: ThreatDetector,
    clock: Arc<dyn Clock>,
}

impl AdmissionGate {
    pub fn new(
        limiter: RateLimiter,
        reputation: ReputationTracker,
        detector: ThreatDetector,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            limiter,
            reputation,
            detector,
            clock,
        }
    }

    pub fn admit(&self, identifier: &str, params: &RequestParams) -> Admission {
        let now = self.clock.now();

        match self.reputation.blacklisted_until(identifier, now) {
            Ok(Some(until)) => {
                warn!(identifier, until = %until, "rejected blacklisted identifier");
                return Admission::Blacklisted {
                    retry_after: until_from(now, until),
                };
            }
            Ok(None) => {}
            Err(fault) => error!(identifier, %fault, "blacklist check failed, failing open"),
        }

        let threats = self.detector.scan(params);
        if !threats.is_empty() {
            warn!(identifier, ?threats, "suspicious input rejected");
            self.record(identifier, now);
            return Admission::Suspicious { threats };
        }

        match self.limiter.check(identifier, now) {
            Ok(RateDecision::Allowed) => Admission::Allowed,
            Ok(RateDecision::Limited { retry_after }) => {
                warn!(identifier, retry_after_secs = retry_after.as_secs(), "rate limit exceeded");
                self.record(identifier, now);
                Admission::RateLimited { retry_after }
            }
            Err(fault) => {
                error!(identifier, %fault, "rate limiter fault, failing open");
                Admission::Allowed
            }
        }
    }

    /// 外部（入力検証層など）が見つけた不審な振る舞いを報告する
    pub fn report_suspicious(&self, identifier: &str) {
        self.record(identifier, self.clock.now());
    }

    /// 期限切れのウィンドウ・イベント・ブラックリストを捨てる
    pub fn sweep(&self) {
        let now = self.clock.now();
        if let Err(fault) = self.limiter.sweep(now) {
            error!(%fault, "rate limiter sweep failed");
        }
        if let Err(fault) = self.reputation.sweep(now) {
            error!(%fault, "reputation sweep failed");
        }
    }

    pub fn counts(&self) -> AdmissionCounts {
        let (reputation_tracked, blacklisted) = self.reputation.counts(self.clock.now());
        AdmissionCounts {
            tracked_identifiers: self.limiter.tracked().max(reputation_tracked),
            blacklisted,
        }
    }

    fn record(&self, identifier: &str, now: DateTime<Utc>) {
        if let Err(fault) = self.reputation.record_suspicious(identifier, now) {
            error!(identifier, %fault, "failed to record suspicious event");
        }
    }

    #[cfg(test)]
    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

fn until_from(now: DateTime<Utc>, until: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or_default()
}
