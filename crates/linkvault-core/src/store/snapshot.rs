//! SnapshotFile - クラッシュ安全な状態ファイル
//!
//! # 保存（atomic replace）
//! 1. `<file>.tmp` に全内容を書いて fsync
//! 2. 既存の `<file>` があれば `<file>.bak` へ rename
//! 3. `<file>.tmp` を `<file>` へ rename
//! 4. `<file>.bak` を削除
//!
//! どの時点でプロセスが落ちても、`<file>` か `<file>.bak` のどちらかに
//! 完全な（旧または新の）状態が残ります。`.tmp` は読み込み時に一切信用しません。
//!
//! # 読み込み
//! - `<file>` が読めればそれを使う
//! - 無い / 壊れている場合は `<file>.bak` から復旧
//! - どちらも駄目なら空の状態で開始する。壊れていたファイルは
//!   `<file>.corrupt.<unixミリ秒>` に退避して、後から調べられるようにする
//!   （同名が既にあれば `.1`, `.2`, ... を付けて上書きしない）

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    fn io(op: &'static str, path: &Path, source: io::Error) -> Self {
        SnapshotError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// どこから状態を復元したか
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    Live,
    Backup,
    /// ファイルが一つも無かった（初回起動）
    Empty,
    /// 読めるファイルが無く、壊れたファイルを退避した
    Quarantined(Vec<PathBuf>),
}

#[derive(Debug)]
pub struct Loaded<T> {
    pub state: T,
    pub source: LoadSource,
}

enum ReadFailure {
    Missing,
    Unreadable(String),
}

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    live: PathBuf,
    staging: PathBuf,
    backup: PathBuf,
}

impl SnapshotFile {
    pub fn new(live: impl Into<PathBuf>) -> Self {
        let live = live.into();
        Self {
            staging: with_suffix(&live, "tmp"),
            backup: with_suffix(&live, "bak"),
            live,
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    pub fn save<T: Serialize>(&self, state: &T) -> Result<(), SnapshotError> {
        let bytes = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.live.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| SnapshotError::io("create dir", parent, e))?;
        }

        write_synced(&self.staging, &bytes)
            .map_err(|e| SnapshotError::io("write", &self.staging, e))?;

        if self.live.exists() {
            fs::rename(&self.live, &self.backup)
                .map_err(|e| SnapshotError::io("back up", &self.live, e))?;
        }

        fs::rename(&self.staging, &self.live)
            .map_err(|e| SnapshotError::io("promote", &self.staging, e))?;

        match fs::remove_file(&self.backup) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            // 新しい状態は既に live にある。残った .bak は次回の保存で上書きされる
            Err(e) => {
                warn!(path = %self.backup.display(), error = %e, "failed to remove snapshot backup");
                Ok(())
            }
        }
    }

    pub fn load<T: DeserializeOwned + Default>(&self) -> Loaded<T> {
        let live_failure = match read_state::<T>(&self.live) {
            Ok(state) => {
                return Loaded {
                    state,
                    source: LoadSource::Live,
                };
            }
            Err(failure) => failure,
        };

        let mut quarantined = Vec::new();
        if let ReadFailure::Unreadable(reason) = &live_failure {
            warn!(path = %self.live.display(), %reason, "state file unreadable, trying backup");
            quarantined.extend(self.quarantine(&self.live));
        }

        match read_state::<T>(&self.backup) {
            Ok(state) => {
                warn!(path = %self.backup.display(), "state recovered from backup");
                Loaded {
                    state,
                    source: LoadSource::Backup,
                }
            }
            Err(ReadFailure::Missing) if quarantined.is_empty() => {
                if matches!(live_failure, ReadFailure::Missing) {
                    info!(path = %self.live.display(), "no state file, starting empty");
                }
                Loaded {
                    state: T::default(),
                    source: LoadSource::Empty,
                }
            }
            Err(backup_failure) => {
                if let ReadFailure::Unreadable(reason) = backup_failure {
                    warn!(path = %self.backup.display(), %reason, "backup unreadable");
                    quarantined.extend(self.quarantine(&self.backup));
                }
                error!(
                    path = %self.live.display(),
                    quarantined = ?quarantined,
                    "no readable state, starting empty"
                );
                Loaded {
                    state: T::default(),
                    source: LoadSource::Quarantined(quarantined),
                }
            }
        }
    }

    fn quarantine(&self, path: &Path) -> Option<PathBuf> {
        let target = quarantine_target(path, chrono::Utc::now().timestamp_millis());
        match fs::rename(path, &target) {
            Ok(()) => {
                warn!(from = %path.display(), to = %target.display(), "quarantined unreadable state file");
                Some(target)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to quarantine unreadable state file");
                None
            }
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// 既存の退避ファイルと衝突しない名前を選ぶ
fn quarantine_target(path: &Path, stamp_millis: i64) -> PathBuf {
    let base = with_suffix(path, &format!("corrupt.{stamp_millis}"));
    let mut candidate = base.clone();
    let mut n = 1u32;
    while candidate.exists() {
        candidate = with_suffix(&base, &n.to_string());
        n += 1;
    }
    candidate
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn read_state<T: DeserializeOwned>(path: &Path) -> Result<T, ReadFailure> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ReadFailure::Missing),
        Err(e) => return Err(ReadFailure::Unreadable(e.to_string())),
    };
    serde_json::from_slice(&bytes).map_err(|e| ReadFailure::Unreadable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    type State = BTreeMap<String, u32>;

    fn state(pairs: &[(&str, u32)]) -> State {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        let loaded: Loaded<State> = file.load();
        assert!(loaded.state.is_empty());
        assert_eq!(loaded.source, LoadSource::Empty);
    }

    #[test]
    fn save_then_load_leaves_no_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));

        file.save(&state(&[("a", 1)])).unwrap();
        file.save(&state(&[("a", 2), ("b", 3)])).unwrap();

        let loaded: Loaded<State> = file.load();
        assert_eq!(loaded.state, state(&[("a", 2), ("b", 3)]));
        assert_eq!(loaded.source, LoadSource::Live);
        assert!(!file.staging_path().exists());
        assert!(!file.backup_path().exists());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("state/nested/links.json"));
        file.save(&state(&[("a", 1)])).unwrap();
        assert!(file.live_path().exists());
    }

    #[test]
    fn crash_after_staging_write_keeps_old_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        file.save(&state(&[("a", 1)])).unwrap();

        // 途中で落ちた .tmp（書きかけ）
        fs::write(file.staging_path(), b"{\"a\": 2, \"b\"").unwrap();

        let loaded: Loaded<State> = file.load();
        assert_eq!(loaded.state, state(&[("a", 1)]));
        assert_eq!(loaded.source, LoadSource::Live);
    }

    #[test]
    fn crash_between_backup_and_promote_recovers_old_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        file.save(&state(&[("a", 1)])).unwrap();

        // step 2 まで進んで落ちた: live は .bak に移動済み、.tmp は完成している
        fs::write(file.staging_path(), serde_json::to_vec(&state(&[("a", 2)])).unwrap()).unwrap();
        fs::rename(file.live_path(), file.backup_path()).unwrap();

        let loaded: Loaded<State> = file.load();
        assert_eq!(loaded.state, state(&[("a", 1)]));
        assert_eq!(loaded.source, LoadSource::Backup);
    }

    #[test]
    fn crash_before_backup_removal_loads_new_state() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        file.save(&state(&[("a", 2)])).unwrap();
        fs::write(file.backup_path(), serde_json::to_vec(&state(&[("a", 1)])).unwrap()).unwrap();

        let loaded: Loaded<State> = file.load();
        assert_eq!(loaded.state, state(&[("a", 2)]));

        // 次の保存で古い .bak は片付く
        file.save(&loaded.state).unwrap();
        assert!(!file.backup_path().exists());
    }

    #[test]
    fn corrupt_live_with_good_backup_recovers_and_keeps_trace() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        fs::write(file.backup_path(), serde_json::to_vec(&state(&[("a", 1)])).unwrap()).unwrap();
        fs::write(file.live_path(), b"not json").unwrap();

        let loaded: Loaded<State> = file.load();
        assert_eq!(loaded.state, state(&[("a", 1)]));
        assert_eq!(loaded.source, LoadSource::Backup);
        assert!(!file.live_path().exists());
        let corrupt: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt."))
            .collect();
        assert_eq!(corrupt.len(), 1);
    }

    #[test]
    fn corrupt_live_without_backup_starts_empty_and_quarantines() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        fs::write(file.live_path(), b"{truncated").unwrap();

        let loaded: Loaded<State> = file.load();
        assert!(loaded.state.is_empty());
        let LoadSource::Quarantined(paths) = loaded.source else {
            panic!("expected quarantine, got {:?}", loaded.source);
        };
        assert_eq!(paths.len(), 1);
        assert_eq!(fs::read(&paths[0]).unwrap(), b"{truncated");
        assert!(!file.live_path().exists());
    }

    #[test]
    fn repeated_corruption_within_one_tick_keeps_every_copy() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));

        let mut kept = Vec::new();
        for body in [&b"{first"[..], b"{second", b"{third"] {
            fs::write(file.live_path(), body).unwrap();
            let target = quarantine_target(file.live_path(), 1_700_000_000_000);
            fs::rename(file.live_path(), &target).unwrap();
            kept.push(target);
        }

        assert_eq!(kept[0], dir.path().join("links.json.corrupt.1700000000000"));
        assert_eq!(kept[1], dir.path().join("links.json.corrupt.1700000000000.1"));
        assert_eq!(kept[2], dir.path().join("links.json.corrupt.1700000000000.2"));
        assert_eq!(fs::read(&kept[0]).unwrap(), b"{first");
        assert_eq!(fs::read(&kept[2]).unwrap(), b"{third");
    }

    #[test]
    fn back_to_back_loads_of_corrupt_files_do_not_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));

        fs::write(file.live_path(), b"{one").unwrap();
        let _: Loaded<State> = file.load();
        fs::write(file.live_path(), b"{two").unwrap();
        let _: Loaded<State> = file.load();

        let corrupt = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt."))
            .count();
        assert_eq!(corrupt, 2);
    }

    #[test]
    fn wrong_shape_counts_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("links.json"));
        fs::write(file.live_path(), b"[1, 2, 3]").unwrap();

        let loaded: Loaded<State> = file.load();
        assert!(loaded.state.is_empty());
        assert!(matches!(loaded.source, LoadSource::Quarantined(_)));
    }
}
