//! App - アプリケーション層
//!
//! このモジュールは、domain / ports / store の部品を組み合わせて
//! アプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定からの構築とワイヤリング
//! - **Broker**: submit / redeem / link_status / progress の窓口
//! - **ReaperLoop**: 無効なリンクと成果物の定期回収
//! - **ProgressTracker**: 受付操作ごとの進捗
//! - **LinkStatusView**: リンク状態の問い合わせ結果

pub mod broker;
pub mod builder;
pub mod progress;
pub mod reaper_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::broker::{Broker, Submission};
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::progress::{ProgressReporter, ProgressTracker};
pub use self::reaper_loop::{ReaperExit, ReaperHandle, ReaperLoop};
pub use self::status::{InvalidReason, LinkStatusView};
