//! Per-scan association of trackers with centroids.
//!
//! Candidates come from each tracker's gating window, narrowed with a range search
//! over the spectrum's sorted m/z values. A greedy pass over the candidates, best
//! first, then builds a one-to-one assignment.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use tracing::warn;

use crate::algorithm::search::mz_range;
use crate::data::peak::Centroid;
use crate::data::spectrum::Spectrum;
use crate::tracking::tracker::Track;

/// A candidate pairing of a tracker with a centroid, valid for one scan only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    /// Position of the tracker in the slice handed to the association step.
    pub tracker: usize,
    /// Position of the centroid in the spectrum.
    pub centroid: usize,
    pub distance: f64,
}

/// Accepted matches of one scan plus per-tracker and per-centroid claims.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Assignment {
    pub accepted: Vec<Match>,
    /// `tracker_claims[t]` is the centroid claimed by tracker `t`, if any.
    pub tracker_claims: Vec<Option<usize>>,
    pub centroid_claimed: Vec<bool>,
}

impl Assignment {
    fn empty(num_trackers: usize, num_centroids: usize) -> Self {
        Assignment {
            accepted: Vec::new(),
            tracker_claims: vec![None; num_trackers],
            centroid_claimed: vec![false; num_centroids],
        }
    }

    /// Centroid indices no tracker claimed.
    pub fn unclaimed_centroids(&self) -> impl Iterator<Item = usize> + '_ {
        self.centroid_claimed
            .iter()
            .enumerate()
            .filter(|(_, claimed)| !**claimed)
            .map(|(i, _)| i)
    }
}

/// Outcome counts of `apply_assignment`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub updated: usize,
    pub missed: usize,
    /// Updates that failed numerically and were counted as misses.
    pub unstable: usize,
}

fn tracker_candidates<T: Track>(tracker_index: usize, tracker: &T, spectrum: &Spectrum) -> Vec<Match> {
    let window = tracker.gating_window();
    let range = match mz_range(&spectrum.mz, window.mz_low, window.mz_high) {
        Some(range) => range,
        None => return Vec::new(),
    };

    range
        .filter_map(|i| {
            let (mz, intensity) = (spectrum.mz[i], spectrum.intensity[i]);
            if tracker.in_bounds(mz, intensity) {
                Some(Match { tracker: tracker_index, centroid: i, distance: tracker.normalized_distance(mz, intensity) })
            } else {
                None
            }
        })
        .collect()
}

/// Every (tracker, centroid) pair whose centroid lies inside the tracker's gating window.
///
/// Trackers are scanned in parallel; the result is ordered by tracker, then by centroid.
pub fn possible_matches<T: Track + Sync>(spectrum: &Spectrum, trackers: &[T]) -> Vec<Match> {
    if spectrum.is_empty() || trackers.is_empty() {
        return Vec::new();
    }
    trackers
        .par_iter()
        .enumerate()
        .flat_map_iter(|(i, tracker)| tracker_candidates(i, tracker, spectrum))
        .collect()
}

/// Resolves candidates into a one-to-one assignment.
///
/// # Arguments
///
/// * `matches` - Candidates as produced by `possible_matches`.
/// * `trackers` - The trackers the candidates index into.
/// * `num_centroids` - Number of centroids in the scan.
///
/// # Description
///
/// Candidates are stably sorted by distance, then by the m/z width of the tracker's gating
/// window (narrower first), then by hit count (larger first). Walking that order, a
/// candidate is accepted when neither its tracker nor its centroid has been claimed yet.
/// Remaining ties keep their input order, so the result is deterministic.
pub fn best_matches<T: Track>(mut matches: Vec<Match>, trackers: &[T], num_centroids: usize) -> Assignment {
    let widths: Vec<f64> = trackers.iter().map(|t| t.gating_window().mz_width()).collect();
    matches.sort_by_key(|m| {
        (
            OrderedFloat(m.distance),
            OrderedFloat(widths[m.tracker]),
            Reverse(trackers[m.tracker].hit_count()),
        )
    });

    let mut assignment = Assignment::empty(trackers.len(), num_centroids);
    for m in matches {
        if assignment.tracker_claims[m.tracker].is_some() || assignment.centroid_claimed[m.centroid] {
            continue;
        }
        assignment.tracker_claims[m.tracker] = Some(m.centroid);
        assignment.centroid_claimed[m.centroid] = true;
        assignment.accepted.push(m);
    }
    assignment
}

/// Candidate generation and greedy assignment for one scan.
pub fn assign<T: Track + Sync>(spectrum: &Spectrum, trackers: &[T]) -> Assignment {
    let matches = possible_matches(spectrum, trackers);
    best_matches(matches, trackers, spectrum.len())
}

/// Updates every tracker that won a centroid and misses every other one.
///
/// A tracker whose update fails numerically is missed instead, and its centroid is
/// released so it can seed a new tracker. `scan` is the spectrum's position in the run.
pub fn apply_assignment<T: Track>(
    trackers: &mut [T],
    assignment: &mut Assignment,
    spectrum: &Spectrum,
    scan: usize,
) -> ApplyOutcome {
    let mut outcome = ApplyOutcome::default();

    for (i, tracker) in trackers.iter_mut().enumerate() {
        let claimed = assignment.tracker_claims[i].and_then(|c| Centroid::from_spectrum(spectrum, scan, c));
        match claimed {
            Some(centroid) => match tracker.update(centroid, spectrum.time) {
                Ok(()) => outcome.updated += 1,
                Err(e) => {
                    warn!("scan {}: tracker {} update absorbed as miss: {}", scan, i, e);
                    tracker.missed();
                    assignment.tracker_claims[i] = None;
                    assignment.centroid_claimed[centroid.peak.index] = false;
                    outcome.unstable += 1;
                    outcome.missed += 1;
                }
            },
            None => {
                tracker.missed();
                outcome.missed += 1;
            }
        }
    }

    let claims = &assignment.tracker_claims;
    assignment.accepted.retain(|m| claims[m.tracker] == Some(m.centroid));
    outcome
}
