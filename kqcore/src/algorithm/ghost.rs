use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::algorithm::search::mz_range;
use crate::data::spectrum::Spectrum;
use crate::error::{KalmanQuantError, Result};

/// Noise parameters shared by every tracker of a run.
///
/// # Description
///
/// The seed comes from a representative "ghost" trace: a known chromatographic
/// peak whose spread in m/z and intensity sets the measurement and process noise
/// for all trackers. New trackers use the values verbatim:
///
/// * m/z measurement noise and initial m/z variance: `mz_variance`
/// * intensity process noise (times identity) and initial intensity variance: `intensity_variance`
/// * intensity measurement noise: `max_intensity_scale`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseSeed {
    pub mz_variance: f64,
    pub intensity_variance: f64,
    pub max_intensity_scale: f64,
}

impl NoiseSeed {
    pub fn new(mz_variance: f64, intensity_variance: f64, max_intensity_scale: f64) -> Self {
        NoiseSeed { mz_variance, intensity_variance, max_intensity_scale }
    }

    /// Estimates a seed from the centroids of a ghost trace.
    ///
    /// # Arguments
    ///
    /// * `mz` - m/z values of the ghost trace, one per scan.
    /// * `intensity` - intensities of the same centroids.
    ///
    /// # Returns
    ///
    /// Sample variance of `mz`, sample variance of `intensity` and the square root of the
    /// largest intensity.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use kqcore::algorithm::ghost::NoiseSeed;
    /// let seed = NoiseSeed::from_ghost_trace(&[500.0, 500.002, 499.998], &[100.0, 400.0, 100.0]).unwrap();
    /// assert!((seed.max_intensity_scale - 20.0).abs() < 1e-12);
    /// assert!((seed.intensity_variance - 30000.0).abs() < 1e-6);
    /// ```
    pub fn from_ghost_trace(mz: &[f64], intensity: &[f64]) -> Result<Self> {
        if mz.len() != intensity.len() {
            return Err(KalmanQuantError::Configuration(format!(
                "ghost trace has {} m/z values but {} intensities",
                mz.len(),
                intensity.len()
            )));
        }
        if mz.len() < 2 {
            return Err(KalmanQuantError::Configuration(
                "ghost trace needs at least two centroids".to_string(),
            ));
        }

        let max_intensity = intensity.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let seed = NoiseSeed {
            mz_variance: mz.iter().variance(),
            intensity_variance: intensity.iter().variance(),
            max_intensity_scale: max_intensity.sqrt(),
        };
        seed.validate()?;
        Ok(seed)
    }

    /// Follows the most intense centroid of `spectra[scan]` through the run and
    /// estimates the seed from that trace, see [`follow_ghost`].
    pub fn from_ghost_scan(spectra: &[Spectrum], scan: usize, mz_tolerance: f64) -> Result<Self> {
        let trace = follow_ghost(spectra, scan, mz_tolerance)?;
        NoiseSeed::from_ghost_trace(&trace.mz, &trace.intensity)
    }

    /// All three values must be finite and strictly positive, otherwise the
    /// measurement noise cannot be inverted.
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("mz_variance", self.mz_variance),
            ("intensity_variance", self.intensity_variance),
            ("max_intensity_scale", self.max_intensity_scale),
        ];
        for (name, value) in values {
            if !value.is_finite() || value <= 0.0 {
                return Err(KalmanQuantError::Configuration(format!(
                    "noise seed {} must be finite and positive, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/// One ion followed across consecutive scans.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GhostTrace {
    pub scans: Vec<usize>,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl GhostTrace {
    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }
}

/// Most intense centroid within `mz_tolerance` of `reference`.
fn closest_ion(spectrum: &Spectrum, reference: f64, mz_tolerance: f64) -> Option<(f64, f64)> {
    let range = mz_range(&spectrum.mz, reference - mz_tolerance, reference + mz_tolerance)?;
    range
        .filter_map(|i| spectrum.centroid(i))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Collects the ghost trace around `spectra[scan]`.
///
/// # Arguments
///
/// * `spectra` - The run, each spectrum sorted by m/z.
/// * `scan` - Scan whose most intense centroid starts the trace.
/// * `mz_tolerance` - Largest m/z step between neighbouring scans of the trace.
///
/// # Description
///
/// Walks backwards and then forwards from `scan`. In every neighbouring scan the most
/// intense centroid within `mz_tolerance` of the previous trace point is taken; the
/// walk in a direction ends at the first scan without one.
pub fn follow_ghost(spectra: &[Spectrum], scan: usize, mz_tolerance: f64) -> Result<GhostTrace> {
    if !mz_tolerance.is_finite() || mz_tolerance < 0.0 {
        return Err(KalmanQuantError::Configuration(format!(
            "ghost m/z tolerance must be finite and non-negative, got {}",
            mz_tolerance
        )));
    }
    let start = spectra.get(scan).ok_or_else(|| {
        KalmanQuantError::Configuration(format!("ghost scan {} is out of range ({} spectra)", scan, spectra.len()))
    })?;
    let apex = (0..start.len())
        .filter_map(|i| start.centroid(i))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or_else(|| KalmanQuantError::Configuration(format!("ghost scan {} has no centroids", scan)))?;

    let mut before = Vec::new();
    let mut reference = apex.0;
    for s in (0..scan).rev() {
        match closest_ion(&spectra[s], reference, mz_tolerance) {
            Some(ion) => {
                reference = ion.0;
                before.push((s, ion));
            }
            None => break,
        }
    }

    let mut after = Vec::new();
    reference = apex.0;
    for (s, spectrum) in spectra.iter().enumerate().skip(scan + 1) {
        match closest_ion(spectrum, reference, mz_tolerance) {
            Some(ion) => {
                reference = ion.0;
                after.push((s, ion));
            }
            None => break,
        }
    }

    let mut trace = GhostTrace::default();
    let points = before.into_iter().rev().chain(std::iter::once((scan, apex))).chain(after);
    for (s, (mz, intensity)) in points {
        trace.scans.push(s);
        trace.mz.push(mz);
        trace.intensity.push(intensity);
    }
    Ok(trace)
}
