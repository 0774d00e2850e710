use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{KalmanQuantError, Result};

/// A centroided scan: m/z values sorted ascending, their intensities, and the scan time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub time: f64,
    pub mz: Vec<f64>,
    pub intensity: Vec<f64>,
}

impl Spectrum {
    /// Constructs a new `Spectrum` from centroids already sorted by m/z.
    ///
    /// # Arguments
    ///
    /// * `time` - The scan (retention) time.
    /// * `mz` - A vector of m/z values, ascending.
    /// * `intensity` - A vector of intensity values corresponding to the m/z values.
    ///
    /// Nothing is checked here, call [`Spectrum::validate`] before tracking.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use kqcore::data::spectrum::Spectrum;
    /// let spectrum = Spectrum::new(1.5, vec![100.0, 200.0], vec![10.0, 20.0]);
    /// assert_eq!(spectrum.len(), 2);
    /// assert_eq!(spectrum.centroid(1), Some((200.0, 20.0)));
    /// ```
    pub fn new(time: f64, mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        Spectrum { time, mz, intensity }
    }

    /// Constructs a `Spectrum` from centroids in arbitrary order, sorting them by m/z.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use kqcore::data::spectrum::Spectrum;
    /// let spectrum = Spectrum::from_unsorted(0.0, vec![200.0, 100.0], vec![20.0, 10.0]);
    /// assert_eq!(spectrum.mz, vec![100.0, 200.0]);
    /// assert_eq!(spectrum.intensity, vec![10.0, 20.0]);
    /// ```
    pub fn from_unsorted(time: f64, mz: Vec<f64>, intensity: Vec<f64>) -> Self {
        let (mz, intensity): (Vec<f64>, Vec<f64>) = mz
            .into_iter()
            .zip(intensity)
            .sorted_by(|a, b| a.0.total_cmp(&b.0))
            .unzip();
        Spectrum { time, mz, intensity }
    }

    pub fn empty(time: f64) -> Self {
        Spectrum { time, mz: Vec::new(), intensity: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.mz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mz.is_empty()
    }

    /// The (m/z, intensity) pair at `index`.
    pub fn centroid(&self, index: usize) -> Option<(f64, f64)> {
        Some((*self.mz.get(index)?, *self.intensity.get(index)?))
    }

    pub fn max_intensity(&self) -> Option<f64> {
        self.intensity.iter().copied().reduce(f64::max)
    }

    /// Checks the per-scan input contract; `scan` is only used to label the error.
    pub fn validate(&self, scan: usize) -> Result<()> {
        if !self.time.is_finite() {
            return Err(KalmanQuantError::input(scan, "scan time is not finite"));
        }
        if self.mz.len() != self.intensity.len() {
            return Err(KalmanQuantError::input(
                scan,
                format!("{} m/z values but {} intensities", self.mz.len(), self.intensity.len()),
            ));
        }
        if let Some(i) = (0..self.len()).find(|&i| !self.mz[i].is_finite() || !self.intensity[i].is_finite()) {
            return Err(KalmanQuantError::input(scan, format!("non-finite centroid {}", i)));
        }
        if let Some((i, (a, b))) = self.mz.iter().tuple_windows().enumerate().find(|(_, (a, b))| b < a) {
            return Err(KalmanQuantError::input(
                scan,
                format!("m/z not ascending at centroid {}: {} > {}", i + 1, a, b),
            ));
        }
        Ok(())
    }
}

/// Validates every spectrum of a run and requires strictly increasing scan times.
pub fn validate_run(spectra: &[Spectrum]) -> Result<()> {
    for (scan, spectrum) in spectra.iter().enumerate() {
        spectrum.validate(scan)?;
    }
    if let Some((scan, (a, b))) = spectra
        .iter()
        .tuple_windows()
        .enumerate()
        .find(|(_, (a, b))| b.time <= a.time)
    {
        return Err(KalmanQuantError::input(
            scan + 1,
            format!("scan time {} does not increase past {}", b.time, a.time),
        ));
    }
    Ok(())
}
