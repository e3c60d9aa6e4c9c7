//! Store - ローカルディスク上の永続化
//!
//! - **SnapshotFile**: LinkRegistry / ArtifactCache の状態ファイル（atomic replace）
//! - **ArtifactRoot**: 成果物ディレクトリと、その外を消さないための包含チェック

pub mod sandbox;
pub mod snapshot;

pub use self::sandbox::{ArtifactRoot, RemoveOutcome};
pub use self::snapshot::{LoadSource, Loaded, SnapshotError, SnapshotFile};
