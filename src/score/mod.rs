// Similarity score normalization
// Every score leaving the storage layer uses the canonical cosine distance scale

#[cfg(test)]
mod tests;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identifier::BackendKind;
use crate::{Result, StoreError};

/// How a backend reports the closeness of two vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreConvention {
    /// Cosine similarity in [-1, 1], higher is closer
    CosineSimilarity,
    /// Cosine distance in [0, 2], lower is closer
    CosineDistance,
}

impl ScoreConvention {
    /// Native convention of a vector backend, `None` for document backends
    #[inline]
    pub fn for_backend(kind: BackendKind) -> Option<Self> {
        match kind {
            BackendKind::VectorQdrant => Some(ScoreConvention::CosineSimilarity),
            BackendKind::VectorLance | BackendKind::VectorPgvector | BackendKind::VectorOracle => {
                Some(ScoreConvention::CosineDistance)
            }
            BackendKind::DocSqlite | BackendKind::DocMongo | BackendKind::DocCosmos => None,
        }
    }
}

/// Canonical distance: 0 for identical vectors, 2 for opposite ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DistanceScore(Decimal);

impl DistanceScore {
    pub const ZERO: DistanceScore = DistanceScore(Decimal::ZERO);

    #[inline]
    pub fn value(self) -> Decimal {
        self.0
    }

    /// Lossy view for display and for APIs that want a float
    #[inline]
    pub fn as_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for DistanceScore {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Convert a backend-native score into a canonical distance.
///
/// Out-of-range values from non-conformant backends pass through unclamped.
pub fn to_distance(native: f64, convention: ScoreConvention) -> Result<DistanceScore> {
    // from_f64_retain keeps the exact binary value; the reported float is
    // then reduced to the precision backends actually emit.
    let value = Decimal::from_f64_retain(native)
        .ok_or(StoreError::InvalidScore(native))?
        .round_dp(12);

    let distance = match convention {
        ScoreConvention::CosineSimilarity => Decimal::ONE - value,
        ScoreConvention::CosineDistance => value,
    };

    Ok(DistanceScore(distance.normalize()))
}
