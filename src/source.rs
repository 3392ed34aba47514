//! Input contributions.
//!
//! The engine consumes contributions through [`ContributionSource`], strictly
//! ordered by their [`SequenceKey`] and resumable after any key already seen.

use crate::error::{HeatTileError, Result};
use geo::LineString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a contribution in the input sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKey {
    /// Monotonic contribution id
    Id(i64),
    /// Unix timestamp in seconds
    Timestamp(i64),
}

impl SequenceKey {
    /// True when both keys are of the same kind and can be compared.
    pub fn same_kind(&self, other: &SequenceKey) -> bool {
        matches!(
            (self, other),
            (SequenceKey::Id(_), SequenceKey::Id(_))
                | (SequenceKey::Timestamp(_), SequenceKey::Timestamp(_))
        )
    }
}

impl fmt::Display for SequenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKey::Id(id) => write!(f, "#{}", id),
            SequenceKey::Timestamp(ts) => write!(f, "@{}", ts),
        }
    }
}

/// One GPS track with its attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub key: SequenceKey,
    pub geometry: LineString<f64>,
    pub user_id: String,
}

impl Contribution {
    pub fn new(key: SequenceKey, geometry: LineString<f64>, user_id: impl Into<String>) -> Self {
        Self {
            key,
            geometry,
            user_id: user_id.into(),
        }
    }
}

/// Ordered, resumable supply of contributions.
pub trait ContributionSource {
    /// Up to `limit` contributions with a key strictly greater than `after`
    /// (all of them when `after` is `None`), ascending by key.
    fn contributions_after(
        &mut self,
        after: Option<SequenceKey>,
        limit: usize,
    ) -> Result<Vec<Contribution>>;
}

impl<S: ContributionSource + ?Sized> ContributionSource for &mut S {
    fn contributions_after(
        &mut self,
        after: Option<SequenceKey>,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        (**self).contributions_after(after, limit)
    }
}

/// In-memory source over a fixed list of contributions.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    contributions: Vec<Contribution>,
}

impl VecSource {
    /// Fails unless keys are strictly ascending and of a single kind.
    pub fn new(contributions: Vec<Contribution>) -> Result<Self> {
        for pair in contributions.windows(2) {
            let (previous, next) = (pair[0].key, pair[1].key);
            if !previous.same_kind(&next) {
                return Err(HeatTileError::InvalidInput(format!(
                    "mixed sequence keys {} and {}",
                    previous, next
                )));
            }
            if next <= previous {
                return Err(HeatTileError::InvalidInput(format!(
                    "sequence key {} does not follow {}",
                    next, previous
                )));
            }
        }
        Ok(Self { contributions })
    }

    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }
}

impl ContributionSource for VecSource {
    fn contributions_after(
        &mut self,
        after: Option<SequenceKey>,
        limit: usize,
    ) -> Result<Vec<Contribution>> {
        let start = match after {
            Some(after) => self.contributions.partition_point(|c| c.key <= after),
            None => 0,
        };
        Ok(self.contributions[start..]
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}
