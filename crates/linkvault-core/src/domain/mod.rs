//! Domain - ドメインモデル（ID、パラメータ、署名、リンク、キャッシュエントリ）
//!
//! ファイルシステムやロックを知らない純粋な型だけを置きます。
//! 例外は `ShareLink::state_at` / `CacheEntry::is_present` の存在確認で、
//! これは有効性の定義そのものにファイルの存在が含まれるためです。

pub mod cache_entry;
pub mod errors;
pub mod ids;
pub mod link;
pub mod params;
pub mod progress;
pub mod signature;
pub mod tier;

pub use cache_entry::CacheEntry;
pub use errors::ErrorKind;
pub use ids::{LinkId, OpId, ParseIdError};
pub use link::{LinkState, ShareLink};
pub use params::{ParamValue, RequestParams};
pub use progress::{OpStatus, ProgressView};
pub use signature::{Canonicalizer, DEFAULT_SIGNATURE_KEYS, Signature};
pub use tier::{ExpiryTier, TierTable, TierTableError};
