
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Result, StoreError};

/// Distance function used to score candidates during a similarity search.
///
/// Every metric is reported as a similarity where higher means closer, so
/// thresholds and ranking behave the same regardless of the metric chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    Euclidean,
}

impl SimilarityMetric {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Euclidean => "euclidean",
        }
    }

    /// Score `candidate` against `query`. Both slices must have the same length.
    #[inline]
    pub fn score(self, query: &[f32], candidate: &[f32]) -> Result<f32> {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(query, candidate),
            SimilarityMetric::Euclidean => {
                euclidean_distance(query, candidate).map(distance_to_similarity)
            }
        }
    }
}

impl fmt::Display for SimilarityMetric {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimilarityMetric {
    type Err = StoreError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "euclidean" => Ok(SimilarityMetric::Euclidean),
            other => Err(StoreError::validation(format!(
                "Unsupported similarity metric: '{}' (expected 'cosine' or 'euclidean')",
                other
            ))),
        }
    }
}

fn ensure_same_length(a: &[f32], b: &[f32]) -> Result<()> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "Vector dimensions do not match: {} vs {}",
            a.len(),
            b.len()
        )))
    }
}

// Accumulated in f64, where the square of any finite f32 neither overflows
// nor underflows.
fn dot_wide(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .fold(0.0_f64, |acc, (x, y)| f64::from(*x).mul_add(f64::from(*y), acc))
}

fn norm_wide(v: &[f32]) -> f64 {
    dot_wide(v, v).sqrt()
}

fn cosine_wide(a: &[f32], norm_a: f64, b: &[f32]) -> f32 {
    let norm_b = norm_wide(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let score = dot_wide(a, b) / norm_a / norm_b;
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0) as f32
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    dot_wide(a, b) as f32
}

#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    norm_wide(v) as f32
}

/// Cosine similarity clamped to `[0, 1]`.
///
/// A zero-norm vector on either side scores `0.0` rather than failing.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_length(a, b)?;
    Ok(cosine_wide(a, norm_wide(a), b))
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32> {
    ensure_same_length(a, b)?;

    let sum = a.iter().zip(b).fold(0.0_f64, |acc, (x, y)| {
        let diff = f64::from(*x) - f64::from(*y);
        diff.mul_add(diff, acc)
    });
    Ok(sum.sqrt() as f32)
}

/// Map a distance in `[0, inf)` onto a similarity in `(0, 1]`.
#[inline]
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Cosine similarity of `query` against each candidate, in candidate order.
#[inline]
pub fn batch_cosine_similarity(query: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
    let query_norm = norm_wide(query);

    candidates
        .iter()
        .map(|candidate| {
            ensure_same_length(query, candidate)?;
            Ok(cosine_wide(query, query_norm, candidate))
        })
        .collect()
}

/// Rescale `v` to unit L2 norm in place. Zero vectors are left untouched.
#[inline]
pub fn normalize_l2(v: &mut [f32]) {
    let norm = norm_wide(v);
    if norm > 0.0 && norm.is_finite() {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
}
