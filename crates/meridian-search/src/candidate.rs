//! Candidates and ranking
//!
//! A search candidate is one account under active consideration: its hop
//! distance from the origin and three independently tracked sub-scores
//! (objective match, confidence, quality). A candidate enters the ranking
//! only once all three have reported.

use meridian_core::AccountId;
use std::cmp::Ordering;
use std::sync::Arc;

/// Combines a candidate's sub-scores into its ranked score.
pub type ScoreCombiner = Arc<dyn Fn(&CandidateScore) -> f64 + Send + Sync>;

/// A fully reported candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateScore {
    pub account: AccountId,
    /// Hop distance from the search origin.
    pub hops: u32,
    pub objective: f64,
    pub confidence: f64,
    pub quality: f64,
}

/// One published search result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub account: AccountId,
    pub score: f64,
    pub hops: u32,
}

/// The default combiner: the mean of the three sub-scores.
pub fn mean_combiner() -> ScoreCombiner {
    Arc::new(|c: &CandidateScore| (c.objective + c.confidence + c.quality) / 3.0)
}

/// Score, sort descending and truncate to `limit`.
///
/// Ties break on account id so the ranking is identical regardless of the
/// order in which sub-scores arrived.
pub fn rank(
    candidates: &[CandidateScore],
    combiner: &ScoreCombiner,
    limit: Option<usize>,
) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = candidates
        .iter()
        .map(|c| SearchResult {
            account: c.account,
            score: combiner(c),
            hops: c.hops,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.account.cmp(&b.account))
    });
    if let Some(n) = limit {
        results.truncate(n);
    }
    results
}
