//! Reputation - 不審なイベントの記録とブラックリスト
//!
//! レート制限違反や不審な入力を「不審イベント」として識別子ごとに記録し、
//! 直近 1 時間（`horizon`）の件数が閾値に達したら一定時間ブラックリストに入れます。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use super::GateFault;

#[derive(Debug, Default)]
struct ReputationRecord {
    events: VecDeque<DateTime<Utc>>,
    blacklisted_until: Option<DateTime<Utc>>,
}

impl ReputationRecord {
    fn prune(&mut self, now: DateTime<Utc>, horizon: Duration) {
        let cutoff = now - horizon;
        while self.events.front().is_some_and(|ts| *ts <= cutoff) {
            self.events.pop_front();
        }
        if self.blacklisted_until.is_some_and(|until| until <= now) {
            self.blacklisted_until = None;
        }
    }

    fn is_idle(&self) -> bool {
        self.events.is_empty() && self.blacklisted_until.is_none()
    }
}

pub struct ReputationTracker {
    records: Mutex<HashMap<String, ReputationRecord>>,
    threshold: u32,
    horizon: Duration,
    blacklist_for: Duration,
}

impl ReputationTracker {
    pub fn new(threshold: u32, horizon: Duration, blacklist_for: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            threshold,
            horizon,
            blacklist_for,
        }
    }

    /// ブラックリスト期間中なら解除時刻を返す
    pub fn blacklisted_until(
        &self,
        identifier: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, GateFault> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(identifier) else {
            return Ok(None);
        };
        record.prune(now, self.horizon);
        Ok(record.blacklisted_until)
    }

    /// 不審イベントを 1 件記録する。今回の記録でブラックリスト入りしたら true
    pub fn record_suspicious(&self, identifier: &str, now: DateTime<Utc>) -> Result<bool, GateFault> {
        let mut records = self.lock()?;
        let record = records.entry(identifier.to_string()).or_default();
        record.prune(now, self.horizon);
        record.events.push_back(now);

        if record.blacklisted_until.is_none() && record.events.len() >= self.threshold as usize {
            let until = now + self.blacklist_for;
            record.blacklisted_until = Some(until);
            warn!(
                identifier,
                events = record.events.len(),
                until = %until,
                "identifier blacklisted"
            );
            return Ok(true);
        }
        Ok(false)
    }

    pub fn suspicious_count(&self, identifier: &str, now: DateTime<Utc>) -> Result<usize, GateFault> {
        let mut records = self.lock()?;
        Ok(records
            .get_mut(identifier)
            .map(|record| {
                record.prune(now, self.horizon);
                record.events.len()
            })
            .unwrap_or(0))
    }

    /// 期限切れの情報を捨て、空になった識別子を削除する
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize, GateFault> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|_, record| {
            record.prune(now, self.horizon);
            !record.is_idle()
        });
        Ok(before - records.len())
    }

    /// (tracked identifiers, currently blacklisted)
    pub fn counts(&self, now: DateTime<Utc>) -> (usize, usize) {
        match self.records.lock() {
            Ok(records) => (
                records.len(),
                records
                    .values()
                    .filter(|r| r.blacklisted_until.is_some_and(|until| until > now))
                    .count(),
            ),
            Err(_) => (0, 0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, ReputationRecord>>, GateFault> {
        self.records
            .lock()
            .map_err(|_| GateFault::Poisoned("reputation tracker"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn tracker() -> ReputationTracker {
        ReputationTracker::new(3, Duration::hours(1), Duration::hours(1))
    }

    #[test]
    fn blacklists_when_threshold_reached() {
        let rep = tracker();
        assert!(!rep.record_suspicious("ip", t(0)).unwrap());
        assert!(!rep.record_suspicious("ip", t(1)).unwrap());
        assert!(rep.record_suspicious("ip", t(2)).unwrap());

        assert_eq!(rep.blacklisted_until("ip", t(3)).unwrap(), Some(t(2) + Duration::hours(1)));
        assert_eq!(rep.blacklisted_until("other", t(3)).unwrap(), None);
    }

    #[test]
    fn events_older_than_an_hour_do_not_count() {
        let rep = tracker();
        rep.record_suspicious("ip", t(0)).unwrap();
        rep.record_suspicious("ip", t(10)).unwrap();
        assert!(!rep.record_suspicious("ip", t(3600)).unwrap());
        assert_eq!(rep.suspicious_count("ip", t(3600)).unwrap(), 2);
    }

    #[test]
    fn blacklist_is_time_boxed() {
        let rep = tracker();
        for s in 0..3 {
            rep.record_suspicious("ip", t(s)).unwrap();
        }
        assert!(rep.blacklisted_until("ip", t(3600)).unwrap().is_some());
        assert_eq!(rep.blacklisted_until("ip", t(2 + 3600)).unwrap(), None);
    }

    #[test]
    fn sweep_forgets_quiet_identifiers() {
        let rep = tracker();
        rep.record_suspicious("quiet", t(0)).unwrap();
        for s in 0..3 {
            rep.record_suspicious("noisy", t(s)).unwrap();
        }

        assert_eq!(rep.sweep(t(3600)).unwrap(), 1);
        assert_eq!(rep.counts(t(3600)), (1, 1));
    }
}
