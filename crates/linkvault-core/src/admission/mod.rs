//! Admission - 上流を守る受付ゲート
//!
//! - **RateLimiter**: 識別子ごとのスライディングウィンドウ
//! - **ReputationTracker**: 不審イベントの集計とブラックリスト
//! - **ThreatDetector**: 不審な入力のパターン検知
//! - **AdmissionGate**: 上の 3 つを決まった順序で組み合わせる

pub mod gate;
pub mod rate_limit;
pub mod reputation;
pub mod threat;

pub use self::gate::{Admission, AdmissionGate};
pub use self::rate_limit::{RateDecision, RateLimiter};
pub use self::reputation::ReputationTracker;
pub use self::threat::ThreatDetector;

/// ゲート内部の障害。AdmissionGate はこれを受けると fail-open する
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateFault {
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}
