use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::data::peak::PeakRef;
use crate::data::spectrum::Spectrum;
use crate::tracking::tracker::{Tracker, TrackerId};

/// A pure ion chromatogram: the centroids one tracker claimed, in scan order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChromatographicFeature {
    pub id: TrackerId,
    pub peaks: Vec<PeakRef>,
    pub time: Vec<f64>,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
    /// Final m/z estimate of the tracker.
    pub mz_estimate: f64,
}

impl ChromatographicFeature {
    /// Resolves the claimed peaks of `tracker` against the run it was built from.
    ///
    /// Returns `None` if any claimed peak does not exist in `spectra`.
    pub fn from_tracker(tracker: &Tracker, spectra: &[Spectrum]) -> Option<Self> {
        let n = tracker.peaks().len();
        let mut time = Vec::with_capacity(n);
        let mut mz = Vec::with_capacity(n);
        let mut intensity = Vec::with_capacity(n);

        for peak in tracker.peaks() {
            let centroid = peak.resolve(spectra)?;
            time.push(spectra[peak.scan].time);
            mz.push(centroid.mz);
            intensity.push(centroid.intensity);
        }

        Some(ChromatographicFeature {
            id: tracker.id(),
            peaks: tracker.peaks().to_vec(),
            time,
            mz,
            intensity,
            mz_estimate: tracker.mz_estimate(),
        })
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    /// (time, m/z, intensity) triples in temporal order.
    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        itertools::izip!(self.time.iter().copied(), self.mz.iter().copied(), self.intensity.iter().copied())
    }

    /// Time and intensity of the most intense point.
    pub fn apex(&self) -> Option<(f64, f64)> {
        self.time
            .iter()
            .copied()
            .zip(self.intensity.iter().copied())
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    pub fn intensity_weighted_mz(&self) -> Option<f64> {
        let total: f64 = self.intensity.iter().sum();
        if self.is_empty() || total <= 0.0 {
            return None;
        }
        let weighted: f64 = self.mz.iter().zip(self.intensity.iter()).map(|(m, i)| m * i).sum();
        Some(weighted / total)
    }

    /// Trapezoidal area of intensity over time; gaps are interpolated linearly.
    pub fn area(&self) -> f64 {
        self.time
            .iter()
            .zip(self.intensity.iter())
            .tuple_windows()
            .map(|((t0, i0), (t1, i1))| (t1 - t0) * (i0 + i1) * 0.5)
            .sum()
    }
}
