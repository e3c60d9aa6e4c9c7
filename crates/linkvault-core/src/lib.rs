//! linkvault-core
//!
//! 取得に時間のかかる成果物を、キャッシュと期限付き共有リンクで配るための
//! ライフサイクル管理と受付制御のコアです。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, params, signature, tier, link, cache_entry, progress, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, Fetcher）
//! - **store**: ローカルディスクへの永続化（SnapshotFile, ArtifactRoot）
//! - **cache**: 署名 → 成果物のインデックス（ArtifactCache）
//! - **links**: 共有リンクのレジストリ（LinkRegistry）
//! - **admission**: レート制限・評判・不審入力の検知（AdmissionGate）
//! - **app**: ワイヤリングと窓口（AppBuilder, Broker, ReaperLoop）
//! - **config**: ポリシー定数と起動時設定（VaultConfig）
//! - **error**: 公開 API のエラー（VaultError）
//! - **observability**: 状態エンドポイント向けの集計ビュー

pub mod admission;
pub mod app;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod links;
pub mod observability;
pub mod ports;
pub mod store;

pub use crate::config::VaultConfig;
pub use crate::error::VaultError;
