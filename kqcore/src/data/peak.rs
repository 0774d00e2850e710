use serde::{Deserialize, Serialize};

use crate::data::spectrum::Spectrum;

/// Handle to one centroid of a run: the spectrum's position in the run and the
/// centroid's position inside that spectrum.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeakRef {
    pub scan: usize,
    pub index: usize,
}

impl PeakRef {
    pub fn new(scan: usize, index: usize) -> Self {
        PeakRef { scan, index }
    }

    /// Looks the centroid up in `spectra`; `None` if the handle points outside the run.
    pub fn resolve(&self, spectra: &[Spectrum]) -> Option<Centroid> {
        let (mz, intensity) = spectra.get(self.scan)?.centroid(self.index)?;
        Some(Centroid { peak: *self, mz, intensity })
    }
}

/// A resolved centroid together with its handle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub peak: PeakRef,
    pub mz: f64,
    pub intensity: f64,
}

impl Centroid {
    pub fn new(peak: PeakRef, mz: f64, intensity: f64) -> Self {
        Centroid { peak, mz, intensity }
    }

    /// The centroid at `index` of `spectrum`, which sits at position `scan` in its run.
    pub fn from_spectrum(spectrum: &Spectrum, scan: usize, index: usize) -> Option<Self> {
        let (mz, intensity) = spectrum.centroid(index)?;
        Some(Centroid { peak: PeakRef::new(scan, index), mz, intensity })
    }
}
