//! Nearest-neighbour matching of a query descriptor against enrolled profiles.

use crate::types::{Descriptor, Profile};
use thiserror::Error;

/// Maximum Euclidean distance (exclusive) at which two descriptors are
/// considered the same identity.
pub const DEFAULT_THRESHOLD: f32 = 0.55;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("descriptor dimension mismatch: query has {query}, candidate has {candidate}")]
    DimensionMismatch { query: usize, candidate: usize },
    #[error("no candidates to match against")]
    NoCandidates,
}

/// Euclidean distance between two equal-length descriptors.
pub fn euclidean_distance(a: &Descriptor, b: &Descriptor) -> Result<f32, MatchError> {
    if a.len() != b.len() {
        return Err(MatchError::DimensionMismatch {
            query: a.len(),
            candidate: b.len(),
        });
    }
    Ok(a.values
        .iter()
        .zip(b.values.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// Display confidence for a verification result, rounded to 0-100.
///
/// Accepted results are scaled against `threshold`; rejected ones against a
/// distance of 1.0, the no-face sentinel.
pub fn confidence_percent(distance: f32, threshold: f32, accepted: bool) -> u8 {
    let scale = if accepted { threshold } else { 1.0 };
    ((1.0 - distance / scale) * 100.0).clamp(0.0, 100.0).round() as u8
}

/// Result of matching a query against a candidate set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub min_distance: f32,
    /// Closest profile, only when `accepted`.
    pub matched_profile: Option<Profile>,
    pub accepted: bool,
    /// See [`confidence_percent`].
    pub confidence: u8,
}

/// Strategy for comparing a query descriptor against enrolled profiles.
pub trait Matcher: Send + Sync {
    fn compare(&self, query: &Descriptor, candidates: &[Profile]) -> Result<MatchOutcome, MatchError>;
}

/// Euclidean nearest-neighbour matcher with a fixed acceptance threshold.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl EuclideanMatcher {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Descriptor, candidates: &[Profile]) -> Result<MatchOutcome, MatchError> {
        if candidates.is_empty() {
            return Err(MatchError::NoCandidates);
        }

        let mut best_dist = f32::INFINITY;
        let mut best_idx = 0usize;

        // Strict `<` keeps the first candidate on ties.
        for (i, profile) in candidates.iter().enumerate() {
            let dist = euclidean_distance(query, &profile.descriptor)?;
            if dist < best_dist {
                best_dist = dist;
                best_idx = i;
            }
        }

        let accepted = best_dist < self.threshold;
        Ok(MatchOutcome {
            min_distance: best_dist,
            matched_profile: accepted.then(|| candidates[best_idx].clone()),
            accepted,
            confidence: confidence_percent(best_dist, self.threshold, accepted),
        })
    }
}
