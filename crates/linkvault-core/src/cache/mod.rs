//! ArtifactCache - 署名 → 成果物のインデックス
//!
//! 同じリクエスト（同じ Signature）なら上流から取り直さずに、
//! 以前の成果物を使い回します。
//!
//! # 一貫性
//! - 独自の退避ポリシーは持たない。Reaper が実体ファイルを消すと
//!   そのエントリは次の lookup でミスになる
//! - ミスしたエントリはメモリ上からだけ取り除く（読み取り経路では書き込まない）。
//!   ディスク上のインデックスは次の insert で一緒に整理される

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::domain::{CacheEntry, Signature};
use crate::observability::CacheCounts;
use crate::ports::Clock;
use crate::store::{SnapshotError, SnapshotFile};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to persist cache index: {0}")]
    Persist(#[from] SnapshotError),
}

pub struct ArtifactCache {
    entries: Mutex<HashMap<Signature, CacheEntry>>,
    file: SnapshotFile,
    clock: Arc<dyn Clock>,
}

impl ArtifactCache {
    /// 状態ファイルから復元して開く
    pub fn open(file: SnapshotFile, clock: Arc<dyn Clock>) -> Self {
        let loaded = file.load::<BTreeMap<Signature, CacheEntry>>();
        debug!(entries = loaded.state.len(), source = ?loaded.source, "cache index loaded");
        Self {
            entries: Mutex::new(loaded.state.into_iter().collect()),
            file,
            clock,
        }
    }

    /// 実体ファイルが残っているエントリだけを返す
    ///
    /// ロックが poison されていてもエラーにはせず、ミスとして扱う。
    pub fn lookup(&self, signature: &Signature) -> Option<CacheEntry> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!(%signature, "cache lock poisoned, treating lookup as a miss");
                return None;
            }
        };

        let entry = entries.get(signature)?;
        if entry.is_present() {
            return Some(entry.clone());
        }

        debug!(%signature, path = %entry.artifact_path.display(), "cached artifact is gone");
        entries.remove(signature);
        None
    }

    /// エントリを記録（上書き）してインデックス全体を保存する
    ///
    /// 保存に失敗した場合はメモリ上の変更を元に戻してエラーを返す。
    pub fn insert(
        &self,
        signature: Signature,
        artifact_path: PathBuf,
        artifact_size_mb: f64,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(artifact_path, artifact_size_mb, self.clock.now());

        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let previous = entries.insert(signature.clone(), entry.clone());

        if let Err(e) = self.persist(&entries) {
            error!(%signature, error = %e, "failed to persist cache index");
            match previous {
                Some(prev) => entries.insert(signature, prev),
                None => entries.remove(&signature),
            };
            return Err(e.into());
        }
        Ok(entry)
    }

    pub fn counts(&self) -> CacheCounts {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        CacheCounts {
            entries: entries.len(),
        }
    }

    fn persist(&self, entries: &HashMap<Signature, CacheEntry>) -> Result<(), SnapshotError> {
        let ordered: BTreeMap<&Signature, &CacheEntry> = entries.iter().collect();
        self.file.save(&ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Canonicalizer, RequestParams};
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()))
    }

    fn sig(year: &str) -> Signature {
        Canonicalizer::default().sign(&RequestParams::new().with("year", vec![year]))
    }

    #[test]
    fn insert_then_lookup_hits_while_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.nc");
        fs::write(&artifact, b"data").unwrap();

        let cache = ArtifactCache::open(SnapshotFile::new(dir.path().join("index.json")), clock());
        assert!(cache.lookup(&sig("2024")).is_none());

        cache.insert(sig("2024"), artifact.clone(), 5.0).unwrap();
        let hit = cache.lookup(&sig("2024")).unwrap();
        assert_eq!(hit.artifact_path, artifact);
        assert_eq!(hit.filename, "a.nc");
        assert!(cache.lookup(&sig("2023")).is_none());
    }

    #[test]
    fn missing_file_is_a_silent_miss() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.nc");
        fs::write(&artifact, b"data").unwrap();

        let cache = ArtifactCache::open(SnapshotFile::new(dir.path().join("index.json")), clock());
        cache.insert(sig("2024"), artifact.clone(), 5.0).unwrap();
        fs::remove_file(&artifact).unwrap();

        assert!(cache.lookup(&sig("2024")).is_none());
        assert_eq!(cache.counts().entries, 0);
    }

    #[test]
    fn insert_persists_and_reopen_restores() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.nc");
        fs::write(&artifact, b"data").unwrap();
        let index = dir.path().join("index.json");

        {
            let cache = ArtifactCache::open(SnapshotFile::new(&index), clock());
            cache.insert(sig("2024"), artifact.clone(), 5.0).unwrap();
        }

        let json: serde_json::Value = serde_json::from_slice(&fs::read(&index).unwrap()).unwrap();
        let record = &json[sig("2024").as_str()];
        assert_eq!(record["filename"], "a.nc");
        assert_eq!(record["artifact_size_mb"], 5.0);

        let reopened = ArtifactCache::open(SnapshotFile::new(&index), clock());
        assert!(reopened.lookup(&sig("2024")).is_some());
    }

    #[test]
    fn insert_overwrites_previous_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.nc");
        let b = dir.path().join("b.nc");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let cache = ArtifactCache::open(SnapshotFile::new(dir.path().join("index.json")), clock());
        cache.insert(sig("2024"), a, 1.0).unwrap();
        cache.insert(sig("2024"), b.clone(), 2.0).unwrap();

        assert_eq!(cache.lookup(&sig("2024")).unwrap().artifact_path, b);
        assert_eq!(cache.counts().entries, 1);
    }

    #[test]
    fn persist_failure_rolls_back_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("a.nc");
        fs::write(&artifact, b"data").unwrap();

        // 親が通常ファイルなので状態ファイルを作れない
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let cache = ArtifactCache::open(SnapshotFile::new(blocker.join("index.json")), clock());

        let err = cache.insert(sig("2024"), artifact, 5.0).unwrap_err();
        assert!(matches!(err, CacheError::Persist(_)));
        assert!(cache.lookup(&sig("2024")).is_none());
    }
}
