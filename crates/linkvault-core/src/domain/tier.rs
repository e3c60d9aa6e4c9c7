//! ExpiryTier - 成果物のサイズ → リンクの有効期間
//!
//! 小さい成果物はすぐにダウンロードできるので短いリンク、大きいものは長めのリンクにします。
//! テーブルは構築時に検証するので、引く側は「上限が狭義単調増加」
//! 「最後の tier は上限なし」を前提にできます。

use serde::{Deserialize, Serialize};

/// One row of the tier table.
///
/// `max_size_mb = None` marks the unbounded tier, which must be last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiryTier {
    pub name: String,
    pub max_size_mb: Option<f64>,
    pub expiry_hours: u32,
}

impl ExpiryTier {
    pub fn bounded(name: &str, max_size_mb: f64, expiry_hours: u32) -> Self {
        Self {
            name: name.to_string(),
            max_size_mb: Some(max_size_mb),
            expiry_hours,
        }
    }

    pub fn unbounded(name: &str, expiry_hours: u32) -> Self {
        Self {
            name: name.to_string(),
            max_size_mb: None,
            expiry_hours,
        }
    }

    fn admits(&self, size_mb: f64) -> bool {
        self.max_size_mb.is_none_or(|max| size_mb <= max)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TierTableError {
    #[error("tier table is empty")]
    Empty,

    #[error("last tier '{0}' must be unbounded")]
    LastTierBounded(String),

    #[error("only the last tier may be unbounded, found '{0}' earlier")]
    UnboundedBeforeLast(String),

    #[error("tier '{0}' bound must be a finite number greater than the previous tier")]
    BoundNotIncreasing(String),

    #[error("tier '{0}' expiry must be positive and not shorter than the previous tier")]
    ExpiryNotMonotonic(String),
}

/// Validated, monotonic tier table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TierTable {
    tiers: Vec<ExpiryTier>,
}

impl TierTable {
    pub fn new(tiers: Vec<ExpiryTier>) -> Result<Self, TierTableError> {
        let Some(last) = tiers.last() else {
            return Err(TierTableError::Empty);
        };
        if last.max_size_mb.is_some() {
            return Err(TierTableError::LastTierBounded(last.name.clone()));
        }

        let mut prev_bound: Option<f64> = None;
        let mut prev_expiry = 0;
        for (i, tier) in tiers.iter().enumerate() {
            if tier.expiry_hours == 0 || tier.expiry_hours < prev_expiry {
                return Err(TierTableError::ExpiryNotMonotonic(tier.name.clone()));
            }
            prev_expiry = tier.expiry_hours;

            if i == tiers.len() - 1 {
                break;
            }
            let Some(bound) = tier.max_size_mb else {
                return Err(TierTableError::UnboundedBeforeLast(tier.name.clone()));
            };
            if !bound.is_finite() || prev_bound.is_some_and(|prev| bound <= prev) {
                return Err(TierTableError::BoundNotIncreasing(tier.name.clone()));
            }
            prev_bound = Some(bound);
        }

        Ok(Self { tiers })
    }

    /// Smallest tier whose bound is ≥ `size_mb`; the unbounded tier otherwise.
    pub fn tier_for(&self, size_mb: f64) -> &ExpiryTier {
        self.tiers
            .iter()
            .find(|tier| tier.admits(size_mb))
            .unwrap_or_else(|| &self.tiers[self.tiers.len() - 1])
    }

    pub fn expiry_hours(&self, size_mb: f64) -> u32 {
        self.tier_for(size_mb).expiry_hours
    }

    pub fn tiers(&self) -> &[ExpiryTier] {
        &self.tiers
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                ExpiryTier::bounded("tiny", 10.0, 2),
                ExpiryTier::bounded("small", 50.0, 4),
                ExpiryTier::bounded("medium", 200.0, 8),
                ExpiryTier::bounded("large", 500.0, 12),
                ExpiryTier::bounded("xlarge", 1000.0, 24),
                ExpiryTier::unbounded("huge", 48),
            ],
        }
    }
}

impl<'de> Deserialize<'de> for TierTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tiers = Vec::<ExpiryTier>::deserialize(deserializer)?;
        TierTable::new(tiers).map_err(serde::de::Error::custom)
    }
}
