//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use std::sync::Arc;

use crate::domain::ids::{LinkId, OpId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator はリンク ID と操作 ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（リクエスト処理の各タスクから呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_link_id(&self) -> LinkId;

    fn generate_op_id(&self) -> OpId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から、ランダム部分は `rand::random`（CSPRNG）から取ります。
/// FixedClock を渡しても ID が衝突しないのはランダム部分のおかげです。
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_link_id(&self) -> LinkId {
        LinkId::from(self.next_ulid())
    }

    fn generate_op_id(&self) -> OpId {
        OpId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        let ids: HashSet<LinkId> = (0..1000).map(|_| id_gen.generate_link_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(Arc::new(FixedClock::new(fixed_time)));

        let id1 = id_gen.generate_link_id();
        let id2 = id_gen.generate_link_id();

        // FixedClock を使っても、ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        let timestamp1 = id1.as_ulid().timestamp_ms();
        let timestamp2 = id2.as_ulid().timestamp_ms();
        assert_eq!(timestamp1, timestamp2);
        assert_eq!(timestamp1, fixed_time.timestamp_millis() as u64);
    }

    #[test]
    fn op_ids_use_their_own_prefix() {
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        assert!(id_gen.generate_op_id().to_string().starts_with("op-"));
        assert!(id_gen.generate_link_id().to_string().starts_with("link-"));
    }
}
