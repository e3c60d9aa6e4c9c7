use std::time::Duration;

use thiserror::Error;

use crate::app::BuildError;
use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::domain::{ErrorKind, ParseIdError};
use crate::links::LinkError;
use crate::ports::FetchError;
use crate::store::SnapshotError;

/// 公開 API（Broker / App）が返すエラー
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("rate limit exceeded, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("identifier is blacklisted, retry after {}s", retry_after.as_secs())]
    Blacklisted { retry_after: Duration },

    #[error("suspicious input detected: {0:?}")]
    Suspicious(Vec<&'static str>),

    #[error("invalid link id: {0}")]
    InvalidLinkId(#[from] ParseIdError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::RateLimited { .. } | VaultError::Blacklisted { .. } => ErrorKind::RateLimit,
            VaultError::Suspicious(_) | VaultError::InvalidLinkId(_) | VaultError::Config(_) => {
                ErrorKind::Validation
            }
            VaultError::Link(e) => match e {
                LinkError::Persist(_) => ErrorKind::System,
                LinkError::NotFound(_)
                | LinkError::Expired(_)
                | LinkError::Exhausted(_)
                | LinkError::ArtifactMissing(_)
                | LinkError::NoSuchArtifact(_) => ErrorKind::Validation,
            },
            VaultError::Fetch(_) => ErrorKind::Resource,
            VaultError::Cache(_) | VaultError::Snapshot(_) | VaultError::Build(_) => ErrorKind::System,
        }
    }

    /// RateLimit 系なら待ち時間
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VaultError::RateLimited { retry_after } | VaultError::Blacklisted { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }
}
