use std::cmp::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SimilarityMatrix;

/// A time range that repeats elsewhere in the same video.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub similarity_score: f64,
}

impl Candidate {
    /// Returns `true` if the half-open ranges `[start, end)` intersect.
    #[inline]
    pub fn overlaps(&self, other: &Candidate) -> bool {
        self.start_time < other.end_time && self.end_time > other.start_time
    }
}

/// Parameters for [find_intro_candidates].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SearchParams {
    /// Minimum intro length, in seconds.
    pub min_intro_length: f64,
    /// Maximum intro length, in seconds.
    pub max_intro_length: f64,
    pub similarity_threshold: f64,
    /// Samples per second of the timeline being searched.
    pub sampling_rate: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            min_intro_length: super::DEFAULT_MIN_INTRO_LENGTH as f64,
            max_intro_length: super::DEFAULT_MAX_INTRO_LENGTH as f64,
            similarity_threshold: super::DEFAULT_SIMILARITY_THRESHOLD,
            sampling_rate: super::DEFAULT_SAMPLING_RATE,
        }
    }
}

impl SearchParams {
    pub fn new(
        min_intro_length: Duration,
        max_intro_length: Duration,
        similarity_threshold: f64,
        sampling_rate: f64,
    ) -> Self {
        Self {
            min_intro_length: min_intro_length.as_secs_f64(),
            max_intro_length: max_intro_length.as_secs_f64(),
            similarity_threshold,
            sampling_rate,
        }
    }

    fn min_samples(&self) -> usize {
        (self.min_intro_length * self.sampling_rate).floor().max(0.0) as usize
    }

    fn max_samples(&self) -> usize {
        (self.max_intro_length * self.sampling_rate).floor().max(0.0) as usize
    }
}

// Walks the diagonal starting at (i, j) and returns the last offset whose cell is still above
// the threshold. Stops at the first cell that is not.
fn extend_match(
    matrix: &SimilarityMatrix,
    i: usize,
    j: usize,
    limit: usize,
    threshold: f64,
) -> usize {
    let mut end_offset = 0;
    for k in 0..limit {
        if matrix.get(i + k, j + k) > threshold {
            end_offset = k;
        } else {
            break;
        }
    }
    end_offset
}

// Greedily keeps candidates (already ranked) that do not overlap anything kept so far.
pub(crate) fn retain_disjoint(ranked: Vec<Candidate>, cap: usize) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in ranked {
        if kept.len() >= cap {
            break;
        }
        if kept.iter().any(|k| candidate.overlaps(k)) {
            continue;
        }
        kept.push(candidate);
    }
    kept
}

/// Searches a self-similarity matrix for repeated sequences and returns up to
/// [MAX_CANDIDATES](super::MAX_CANDIDATES) non-overlapping intro candidates, best first.
///
/// For every pair of samples `(i, j)` that are far enough apart, the first
/// [LOOKAHEAD_SAMPLES](super::LOOKAHEAD_SAMPLES) cells of the diagonal starting at `(i, j)`
/// are averaged. Pairs whose average is above the threshold are extended along the
/// diagonal for as long as each cell stays above the threshold, and the resulting run
/// becomes a candidate if its duration is within the configured bounds.
///
/// Candidates are ranked by their lookahead average. Ties keep discovery order.
pub fn find_intro_candidates(
    matrix: &SimilarityMatrix,
    times: &[f64],
    params: &SearchParams,
) -> Vec<Candidate> {
    let span = tracing::span!(tracing::Level::TRACE, "find_intro_candidates");
    let _enter = span.enter();

    let n = times.len().min(matrix.len());
    let threshold = params.similarity_threshold;
    let (min_samples, max_samples) = (params.min_samples(), params.max_samples());

    let mut candidates = Vec::new();

    for i in 0..n {
        for j in (i + min_samples + 1)..n {
            // Timestamps are strictly increasing, so no later j can be in range either.
            if times[j] - times[i] > params.max_intro_length {
                break;
            }

            let window = super::LOOKAHEAD_SAMPLES.min(n - j);
            let sequence_similarity =
                (0..window).map(|k| matrix.get(i + k, j + k)).sum::<f64>() / window as f64;
            if sequence_similarity <= threshold {
                continue;
            }

            let limit = max_samples.min(n - j);
            let end_offset = extend_match(matrix, i, j, limit, threshold);

            let (start_time, end_time) = (times[i], times[i + end_offset]);
            let duration = end_time - start_time;
            if duration > 0.0
                && duration >= params.min_intro_length
                && duration <= params.max_intro_length
            {
                candidates.push(Candidate {
                    start_time,
                    end_time,
                    duration,
                    similarity_score: sequence_similarity,
                });
            }
        }
    }

    tracing::debug!(num_matches = candidates.len(), "finished diagonal search");

    // Stable sort, so equal scores keep discovery order (lower i, then lower j).
    candidates.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(Ordering::Equal)
    });

    let candidates = retain_disjoint(candidates, super::MAX_CANDIDATES);

    tracing::debug!(num_candidates = candidates.len(), "filtered overlapping matches");

    candidates
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::intro::Fingerprint;

    // Row `r` of a 32x32 Sylvester-Hadamard matrix in the low 32 bits. Any two distinct codes
    // differ in exactly 16 bits, i.e. have a similarity of 0.75.
    fn code(r: u32) -> Fingerprint {
        let mut bits = 0u64;
        for c in 0..32u32 {
            if (r & c).count_ones() % 2 == 1 {
                bits |= 1 << c;
            }
        }
        Fingerprint(bits)
    }

    // Builds a matrix and timestamps (0.5 samples/sec) from a list of code rows.
    fn timeline(rows: &[u32]) -> (SimilarityMatrix, Vec<f64>) {
        let fingerprints: Vec<_> = rows.iter().map(|r| code(*r)).collect();
        let times = (0..rows.len()).map(|k| k as f64 * 2.0).collect();
        (SimilarityMatrix::from_fingerprints(&fingerprints), times)
    }

    fn params(min: f64, max: f64) -> SearchParams {
        SearchParams {
            min_intro_length: min,
            max_intro_length: max,
            ..Default::default()
        }
    }

    fn assert_invariants(candidates: &[Candidate], params: &SearchParams) {
        assert!(candidates.len() <= crate::intro::MAX_CANDIDATES);
        for (idx, c) in candidates.iter().enumerate() {
            assert!(c.end_time > c.start_time);
            assert!(c.duration >= params.min_intro_length);
            assert!(c.duration <= params.max_intro_length);
            assert!((0.0..=1.0).contains(&c.similarity_score));
            for other in &candidates[idx + 1..] {
                assert!(!c.overlaps(other), "{:?} overlaps {:?}", c, other);
            }
        }
    }

    #[test]
    fn test_codes_are_equidistant() {
        for a in 0..32 {
            for b in 0..32 {
                let expected = if a == b { 1.0 } else { 0.75 };
                assert_eq!(code(a).similarity(&code(b)), expected);
            }
        }
    }

    #[test]
    fn test_repeated_block() {
        // Samples 0-9 repeat at 20-29, everything else is distinct.
        let rows: Vec<u32> = (0..10).chain(10..20).chain(0..10).chain(20..30).collect();
        let (matrix, times) = timeline(&rows);
        let params = params(2.0, 60.0);

        let candidates = find_intro_candidates(&matrix, &times, &params);
        assert_eq!(candidates.len(), 1);
        let c = candidates[0];
        assert_eq!(c.start_time, 0.0);
        assert_eq!(c.end_time, 18.0);
        assert_eq!(c.duration, 18.0);
        // 10 matching cells and 10 cells at 0.75 in the lookahead window.
        assert_eq!(c.similarity_score, 0.875);
        assert_invariants(&candidates, &params);
    }

    #[test]
    fn test_repeated_block_at_tail_scores_one() {
        // Samples 0-9 repeat at 30-39; the lookahead window is clipped to the repeat.
        let rows: Vec<u32> = (0..10).chain(10..30).chain(0..10).collect();
        let (matrix, times) = timeline(&rows);
        let params = params(2.0, 60.0);

        let candidates = find_intro_candidates(&matrix, &times, &params);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].start_time, 0.0);
        assert_eq!(candidates[0].end_time, 18.0);
        assert_eq!(candidates[0].similarity_score, 1.0);
    }

    #[test]
    fn test_min_length_above_run() {
        let rows: Vec<u32> = (0..10).chain(10..20).chain(0..10).chain(20..30).collect();
        let (matrix, times) = timeline(&rows);

        let candidates = find_intro_candidates(&matrix, &times, &params(20.0, 60.0));
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_gap_beyond_max_length_is_ignored() {
        // Same repeat as above, but the occurrences start 40s apart.
        let rows: Vec<u32> = (0..10).chain(10..20).chain(0..10).chain(20..30).collect();
        let (matrix, times) = timeline(&rows);

        let candidates = find_intro_candidates(&matrix, &times, &params(2.0, 30.0));
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_disjoint_matches_survive() {
        // X (0-4) repeats at 10-14, Y (20-24) repeats at 30-34.
        let rows: Vec<u32> = (0..5)
            .chain(10..15)
            .chain(0..5)
            .chain(15..20)
            .chain(5..10)
            .chain(20..25)
            .chain(5..10)
            .chain(25..30)
            .collect();
        let (matrix, times) = timeline(&rows);
        let params = SearchParams::default();

        let candidates = find_intro_candidates(&matrix, &times, &params);
        assert_eq!(candidates.len(), 2);

        assert_eq!((candidates[0].start_time, candidates[0].end_time), (40.0, 48.0));
        assert!((candidates[0].similarity_score - 0.875).abs() < 1e-12);
        assert_eq!((candidates[1].start_time, candidates[1].end_time), (0.0, 8.0));
        assert!((candidates[1].similarity_score - 0.8125).abs() < 1e-12);

        // The shorter runs inside each block (e.g. 2s-8s) were rejected as overlapping.
        assert!(!candidates
            .iter()
            .any(|c| c.start_time == 2.0 && c.end_time == 8.0));
        assert_invariants(&candidates, &params);
    }

    #[test]
    fn test_all_below_threshold() {
        let rows: Vec<u32> = (0..30).collect();
        let (matrix, times) = timeline(&rows);

        let candidates = find_intro_candidates(&matrix, &times, &SearchParams::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_static_scene() {
        // Every sample is identical, so nearly every pair matches.
        let rows = vec![0u32; 40];
        let (matrix, times) = timeline(&rows);
        let params = SearchParams::default();

        let candidates = find_intro_candidates(&matrix, &times, &params);
        assert_invariants(&candidates, &params);
        let ranges: Vec<_> = candidates
            .iter()
            .map(|c| (c.start_time, c.end_time))
            .collect();
        // Runs stop one sample short of the maximum length.
        assert_eq!(ranges, vec![(0.0, 28.0), (28.0, 56.0), (56.0, 74.0)]);
        assert!(candidates.iter().all(|c| c.duration <= 28.0));
    }

    #[test]
    fn test_short_timelines() {
        let params = SearchParams::default();
        for len in 0..3 {
            let rows = vec![0u32; len];
            let (matrix, times) = timeline(&rows);
            assert!(find_intro_candidates(&matrix, &times, &params).is_empty());
        }
    }

    #[test]
    fn test_retain_disjoint() {
        let candidate = |start: f64, end: f64, score: f64| Candidate {
            start_time: start,
            end_time: end,
            duration: end - start,
            similarity_score: score,
        };

        // Touching ranges do not overlap; a contained range does.
        let ranked = vec![
            candidate(0.0, 10.0, 0.9),
            candidate(10.0, 20.0, 0.9),
            candidate(2.0, 8.0, 0.85),
        ];
        let kept = retain_disjoint(ranked, 5);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].start_time, 10.0);

        let ranked: Vec<_> = (0..8)
            .map(|i| candidate(i as f64 * 10.0, i as f64 * 10.0 + 5.0, 0.9))
            .collect();
        let kept = retain_disjoint(ranked, crate::intro::MAX_CANDIDATES);
        assert_eq!(kept.len(), 5);
        assert_eq!(kept[4].start_time, 40.0);
    }
}
