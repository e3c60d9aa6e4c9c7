//! Ports - 抽象化レイヤー
//!
//! 外部（時刻、ID 生成、上流のデータ取得サービス）へのインターフェースです。
//! コアのロジックはこれらの trait 越しにしか外部に触れないので、
//! テストでは FixedClock やスタブ Fetcher に差し替えられます。

pub mod clock;
pub mod fetcher;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::fetcher::{FetchError, FetchedArtifact, Fetcher, ProgressSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
