//! ArtifactRoot - 成果物を置くディレクトリと、その外に出ないための確認
//!
//! 削除は「解決済みの絶対パスが root の内側にあるとき」だけ行います。
//! 状態ファイルが改ざんされて `../../etc/passwd` を指していても消しません。

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// remove の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    AlreadyGone,
    /// root の外を指していたので触らなかった
    OutsideRoot(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ArtifactRoot {
    root: PathBuf,
}

impl ArtifactRoot {
    /// ディレクトリを作成し、正規化した絶対パスを保持する
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        Ok(Self {
            root: path.canonicalize()?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn join(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// `candidate` を解決して root の内側なら絶対パスを返す
    ///
    /// 存在しないパスは `Ok(None)`。
    pub fn resolve(&self, candidate: &Path) -> io::Result<Option<Result<PathBuf, PathBuf>>> {
        match candidate.canonicalize() {
            Ok(resolved) if resolved.starts_with(&self.root) => Ok(Some(Ok(resolved))),
            Ok(resolved) => Ok(Some(Err(resolved))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, candidate: &Path) -> bool {
        matches!(self.resolve(candidate), Ok(Some(Ok(_))))
    }

    pub fn remove(&self, candidate: &Path) -> io::Result<RemoveOutcome> {
        let resolved = match self.resolve(candidate)? {
            None => return Ok(RemoveOutcome::AlreadyGone),
            Some(Err(outside)) => return Ok(RemoveOutcome::OutsideRoot(outside)),
            Some(Ok(inside)) => inside,
        };
        // root そのものは消さない
        if resolved == self.root {
            return Ok(RemoveOutcome::OutsideRoot(resolved));
        }
        match fs::remove_file(&resolved) {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RemoveOutcome::AlreadyGone),
            Err(e) => Err(e),
        }
    }
}
