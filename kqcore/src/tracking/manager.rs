use rayon::prelude::*;
use tracing::{debug, info};

use crate::algorithm::ghost::NoiseSeed;
use crate::data::peak::Centroid;
use crate::data::spectrum::{validate_run, Spectrum};
use crate::error::Result;
use crate::tracking::association::{apply_assignment, assign};
use crate::tracking::feature::ChromatographicFeature;
use crate::tracking::parameters::{TrackerModel, TrackingParameters};
use crate::tracking::tracker::{Track, Tracker, TrackerId, TrackerStatus};

/// What happened to the tracker population during one scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub predicted: usize,
    pub updated: usize,
    pub missed: usize,
    pub unstable: usize,
    pub retired_features: usize,
    pub retired_noise: usize,
    pub spawned: usize,
}

/// Drives trackers through a run, one scan at a time.
///
/// # Description
///
/// Trackers still in play live contiguously in `active`, ordered by id. Every tracker
/// ever spawned owns a slot in `arena` indexed by its `TrackerId`; the slot is filled
/// when the tracker retires. Outside code only ever refers to trackers by id.
#[derive(Clone, Debug)]
pub struct TrackerManager {
    parameters: TrackingParameters,
    model: TrackerModel,
    seed: NoiseSeed,
    active: Vec<Tracker>,
    arena: Vec<Option<Tracker>>,
    features: Vec<TrackerId>,
    noise: Vec<TrackerId>,
    scans: usize,
}

impl TrackerManager {
    pub fn new(parameters: TrackingParameters, model: TrackerModel, seed: NoiseSeed) -> Self {
        TrackerManager {
            parameters,
            model,
            seed,
            active: Vec::new(),
            arena: Vec::new(),
            features: Vec::new(),
            noise: Vec::new(),
            scans: 0,
        }
    }

    pub fn parameters(&self) -> &TrackingParameters {
        &self.parameters
    }

    pub fn model(&self) -> &TrackerModel {
        &self.model
    }

    pub fn seed(&self) -> &NoiseSeed {
        &self.seed
    }

    /// Trackers still in play, ordered by id.
    pub fn active(&self) -> &[Tracker] {
        &self.active
    }

    pub fn features(&self) -> &[TrackerId] {
        &self.features
    }

    pub fn noise(&self) -> &[TrackerId] {
        &self.noise
    }

    /// Number of trackers spawned so far.
    pub fn spawned(&self) -> usize {
        self.arena.len()
    }

    pub fn scans_processed(&self) -> usize {
        self.scans
    }

    pub fn tracker(&self, id: TrackerId) -> Option<&Tracker> {
        match self.arena.get(id.0)? {
            Some(retired) => Some(retired),
            None => self
                .active
                .binary_search_by_key(&id, |t| t.id())
                .ok()
                .map(|i| &self.active[i]),
        }
    }

    /// Advances the run by one spectrum.
    ///
    /// # Arguments
    ///
    /// * `scan` - Position of `spectrum` in the run, recorded in every claimed peak.
    /// * `spectrum` - The next spectrum; its time must exceed that of the previous one.
    ///
    /// # Description
    ///
    /// Predicts every active tracker to the scan time, gates and greedily assigns
    /// centroids, updates the winners and misses everybody else, retires trackers whose
    /// miss budget is used up and finally spawns one tracker per unclaimed centroid.
    pub fn process_scan(&mut self, scan: usize, spectrum: &Spectrum) -> ScanSummary {
        let mut summary = ScanSummary { predicted: self.active.len(), ..ScanSummary::default() };

        self.active.par_iter_mut().for_each(|t| t.predict(spectrum.time));

        let mut assignment = assign(spectrum, &self.active);
        let outcome = apply_assignment(&mut self.active, &mut assignment, spectrum, scan);
        summary.updated = outcome.updated;
        summary.missed = outcome.missed;
        summary.unstable = outcome.unstable;

        let (features, noise) = self.sweep(false);
        summary.retired_features = features;
        summary.retired_noise = noise;

        for index in assignment.unclaimed_centroids() {
            if let Some(centroid) = Centroid::from_spectrum(spectrum, scan, index) {
                let id = TrackerId(self.arena.len());
                self.arena.push(None);
                self.active.push(Tracker::spawn(id, centroid, spectrum.time, self.seed, self.model));
                summary.spawned += 1;
            }
        }

        self.scans += 1;
        debug!(
            "scan {} (t = {}): {} predicted, {} updated, {} missed ({} unstable), {} features / {} noise retired, {} spawned",
            scan,
            spectrum.time,
            summary.predicted,
            summary.updated,
            summary.missed,
            summary.unstable,
            summary.retired_features,
            summary.retired_noise,
            summary.spawned,
        );
        summary
    }

    /// Lifecycle sweep, the only place tracker status is decided.
    ///
    /// With `force` every active tracker retires by size alone; otherwise trackers
    /// within their miss budget stay active. Returns (features, noise) retired.
    fn sweep(&mut self, force: bool) -> (usize, usize) {
        let TrackingParameters { max_misses, min_size } = self.parameters;
        let mut kept = Vec::with_capacity(self.active.len());
        let (mut features, mut noise) = (0, 0);

        for mut tracker in std::mem::take(&mut self.active) {
            let status = if force {
                tracker.retirement_status(min_size)
            } else {
                tracker.classify(min_size, max_misses)
            };
            match status {
                TrackerStatus::Active => {
                    kept.push(tracker);
                    continue;
                }
                TrackerStatus::RetiredFeature => {
                    self.features.push(tracker.id());
                    features += 1;
                }
                TrackerStatus::RetiredNoise => {
                    self.noise.push(tracker.id());
                    noise += 1;
                }
            }
            tracker.retire(status);
            let slot = tracker.id().0;
            self.arena[slot] = Some(tracker);
        }

        self.active = kept;
        (features, noise)
    }

    /// Retires every remaining tracker by size, without charging a final miss.
    pub fn finish(mut self) -> Extraction {
        let (features, noise) = self.sweep(true);
        debug!("final flush: {} features / {} noise", features, noise);

        let trackers: Vec<Tracker> = self.arena.into_iter().flatten().collect();
        info!(
            "{} scans, {} trackers: {} features, {} noise",
            self.scans,
            trackers.len(),
            self.features.len(),
            self.noise.len(),
        );
        Extraction { trackers, features: self.features, noise: self.noise }
    }

    /// Validates `spectra` and tracks them from start to finish.
    ///
    /// Validation happens before the first scan; any violation aborts the run.
    pub fn run(mut self, spectra: &[Spectrum]) -> Result<Extraction> {
        self.parameters.validate()?;
        self.model.validate()?;
        self.seed.validate()?;
        validate_run(spectra)?;

        for (scan, spectrum) in spectra.iter().enumerate() {
            self.process_scan(scan, spectrum);
        }
        Ok(self.finish())
    }
}

/// Tracks a whole run with the default motion model.
///
/// # Arguments
///
/// * `spectra` - The run, strictly increasing in time, each spectrum sorted by m/z.
/// * `max_misses` - Consecutive misses a tracker survives.
/// * `min_size` - Claimed centroids needed for a retired tracker to count as a feature.
/// * `seed` - Noise parameters for every new tracker.
///
/// # Example
///
/// ```rust
/// # use kqcore::algorithm::ghost::NoiseSeed;
/// # use kqcore::data::spectrum::Spectrum;
/// # use kqcore::tracking::manager::process_run;
/// # use kqcore::tracking::tracker::Track;
/// let spectra: Vec<Spectrum> = (0..6)
///     .map(|i| Spectrum::new(i as f64, vec![500.0], vec![100.0 + 10.0 * i as f64]))
///     .collect();
/// let extraction = process_run(&spectra, 2, 4, NoiseSeed::new(1e-4, 1e5, 10.0)).unwrap();
/// assert_eq!(extraction.feature_count(), 1);
/// assert_eq!(extraction.features().next().unwrap().hit_count(), 6);
/// ```
pub fn process_run(spectra: &[Spectrum], max_misses: usize, min_size: usize, seed: NoiseSeed) -> Result<Extraction> {
    TrackerManager::new(TrackingParameters::new(max_misses, min_size), TrackerModel::default(), seed).run(spectra)
}

/// Every tracker of a finished run, partitioned into features and noise.
#[derive(Clone, Debug)]
pub struct Extraction {
    trackers: Vec<Tracker>,
    features: Vec<TrackerId>,
    noise: Vec<TrackerId>,
}

impl Extraction {
    pub fn tracker(&self, id: TrackerId) -> Option<&Tracker> {
        self.trackers.get(id.0)
    }

    /// All trackers in spawn order.
    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    /// Feature trackers in retirement order.
    pub fn features(&self) -> impl Iterator<Item = &Tracker> + '_ {
        self.features.iter().map(move |id| &self.trackers[id.0])
    }

    pub fn noise(&self) -> impl Iterator<Item = &Tracker> + '_ {
        self.noise.iter().map(move |id| &self.trackers[id.0])
    }

    pub fn feature_ids(&self) -> &[TrackerId] {
        &self.features
    }

    pub fn noise_ids(&self) -> &[TrackerId] {
        &self.noise
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    pub fn noise_count(&self) -> usize {
        self.noise.len()
    }

    /// Resolves every feature against the run it came from.
    pub fn to_features(&self, spectra: &[Spectrum]) -> Vec<ChromatographicFeature> {
        self.features()
            .filter_map(|t| ChromatographicFeature::from_tracker(t, spectra))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::peak::PeakRef;
    use crate::error::KalmanQuantError;

    fn seed() -> NoiseSeed {
        NoiseSeed::new(1e-4, 1e5, 10.0)
    }

    fn manager() -> TrackerManager {
        TrackerManager::new(TrackingParameters::new(2, 4), TrackerModel::default(), seed())
    }

    fn single(time: f64, mz: f64, intensity: f64) -> Spectrum {
        Spectrum::new(time, vec![mz], vec![intensity])
    }

    #[test]
    fn test_spawn_on_unclaimed_centroids() {
        let mut tm = manager();
        let summary = tm.process_scan(0, &Spectrum::new(0.0, vec![300.0, 500.0], vec![50.0, 60.0]));

        assert_eq!(summary.spawned, 2);
        assert_eq!(summary.predicted, 0);
        assert_eq!(tm.active().len(), 2);
        let t = tm.tracker(TrackerId(1)).unwrap();
        assert_eq!(t.peaks(), &[PeakRef::new(0, 1)]);
        assert_eq!(t.hit_count(), 1);
        assert_eq!(t.last_time(), 0.0);
        assert_eq!(t.mz_estimate(), 500.0);
    }

    #[test]
    fn test_claimed_centroid_does_not_spawn() {
        let mut tm = manager();
        tm.process_scan(0, &single(0.0, 500.0, 100.0));
        let summary = tm.process_scan(1, &Spectrum::new(1.0, vec![500.001, 900.0], vec![110.0, 5.0]));

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.spawned, 1);
        assert_eq!(tm.spawned(), 2);
        assert_eq!(tm.tracker(TrackerId(0)).unwrap().hit_count(), 2);
    }

    #[test]
    fn test_miss_then_recover() {
        let mut tm = manager();
        tm.process_scan(0, &single(0.0, 500.0, 100.0));
        tm.process_scan(1, &single(1.0, 500.0, 100.0));
        tm.process_scan(2, &Spectrum::empty(2.0));
        tm.process_scan(3, &Spectrum::empty(3.0));

        let t = tm.tracker(TrackerId(0)).unwrap();
        assert_eq!(t.misses(), 2);
        assert_eq!(t.status(), TrackerStatus::Active);

        let summary = tm.process_scan(4, &single(4.0, 500.0, 100.0));
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.spawned, 0);
        let t = tm.tracker(TrackerId(0)).unwrap();
        assert_eq!(t.misses(), 0);
        assert_eq!(t.hit_count(), 3);
        assert_eq!(t.status(), TrackerStatus::Active);
        assert_eq!(tm.active().len(), 1);
    }

    #[test]
    fn test_failed_update_misses_but_keeps_tracker() {
        // without m/z velocity variance or process noise the predicted m/z covariance is singular
        let model = TrackerModel { mz_process_noise: 0.0, mz_velocity_variance: 0.0, ..TrackerModel::default() };
        assert!(model.validate().is_ok());
        let mut tm = TrackerManager::new(TrackingParameters::new(2, 4), model, seed());

        tm.process_scan(0, &single(0.0, 500.0, 100.0));
        let summary = tm.process_scan(1, &single(1.0, 500.001, 110.0));

        assert_eq!(summary.updated, 0);
        assert_eq!(summary.missed, 1);
        assert_eq!(summary.unstable, 1);
        assert_eq!(summary.retired_features + summary.retired_noise, 0);
        // the released centroid seeds a second tracker
        assert_eq!(summary.spawned, 1);

        let t = tm.tracker(TrackerId(0)).unwrap();
        assert_eq!(t.status(), TrackerStatus::Active);
        assert_eq!(t.misses(), 1);
        assert_eq!(t.hit_count(), 1);
        assert_eq!(tm.active().len(), 2);
        assert_eq!(tm.active()[0].id(), TrackerId(0));
        assert_eq!(tm.tracker(TrackerId(1)).unwrap().peaks(), &[PeakRef::new(1, 0)]);
    }

    #[test]
    fn test_retirement_classification() {
        // a three-point and a five-point trace, far apart in m/z
        let mut spectra = Vec::new();
        for i in 0..5 {
            let (mz, intensity) = if i < 3 {
                (vec![300.0, 700.0], vec![50.0, 80.0])
            } else {
                (vec![700.0], vec![80.0])
            };
            spectra.push(Spectrum::new(i as f64, mz, intensity));
        }
        for i in 5..8 {
            spectra.push(Spectrum::empty(i as f64));
        }

        let mut tm = manager();
        let mut summaries = Vec::new();
        for (scan, s) in spectra.iter().enumerate() {
            summaries.push(tm.process_scan(scan, s));
        }

        // 300 misses scans 3, 4, 5 and retires on the third miss
        assert_eq!(summaries[5].retired_noise, 1);
        // 700 misses scans 5, 6, 7
        assert_eq!(summaries[7].retired_features, 1);

        let extraction = tm.finish();
        assert_eq!(extraction.noise_count(), 1);
        assert_eq!(extraction.feature_count(), 1);

        let noise = extraction.noise().next().unwrap();
        assert_eq!(noise.hit_count(), 3);
        assert_eq!(noise.status(), TrackerStatus::RetiredNoise);
        let feature = extraction.features().next().unwrap();
        assert_eq!(feature.hit_count(), 5);
        assert_eq!(feature.status(), TrackerStatus::RetiredFeature);
        assert_eq!(feature.misses(), 3);
    }

    #[test]
    fn test_finish_flushes_without_extra_miss() {
        let mut tm = manager();
        for scan in 0..4 {
            tm.process_scan(scan, &single(scan as f64, 500.0, 100.0));
        }
        tm.process_scan(4, &single(4.0, 800.0, 10.0));

        let extraction = tm.finish();
        assert_eq!(extraction.feature_count(), 1);
        assert_eq!(extraction.noise_count(), 1);
        let feature = extraction.tracker(TrackerId(0)).unwrap();
        assert_eq!(feature.misses(), 1);
        assert_eq!(feature.hit_count(), 4);
        assert_eq!(extraction.tracker(TrackerId(1)).unwrap().status(), TrackerStatus::RetiredNoise);
    }

    #[test]
    fn test_every_tracker_ends_in_one_bucket() {
        let spectra: Vec<Spectrum> = (0..12)
            .map(|i| {
                let t = i as f64;
                Spectrum::new(t, vec![200.0 + 7.0 * t, 400.0, 650.0 + (i % 3) as f64], vec![10.0, 200.0, 30.0])
            })
            .collect();
        let extraction = manager().run(&spectra).unwrap();

        let total = extraction.feature_count() + extraction.noise_count();
        assert_eq!(total, extraction.trackers().len());
        let mut ids: Vec<TrackerId> = extraction.feature_ids().iter().chain(extraction.noise_ids()).copied().collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(extraction.trackers().iter().all(|t| t.status().is_retired()));
    }

    #[test]
    fn test_run_rejects_invalid_input() {
        let spectra = vec![single(1.0, 500.0, 1.0), single(0.5, 500.0, 1.0)];
        match manager().run(&spectra) {
            Err(KalmanQuantError::InputValidation { scan, .. }) => assert_eq!(scan, 1),
            other => panic!("unexpected result: {:?}", other),
        }

        let bad_seed = TrackerManager::new(TrackingParameters::default(), TrackerModel::default(), NoiseSeed::new(0.0, 1.0, 1.0));
        assert!(matches!(bad_seed.run(&[]), Err(KalmanQuantError::Configuration(_))));
    }

    #[test]
    fn test_empty_run() {
        let extraction = manager().run(&[]).unwrap();
        assert_eq!(extraction.feature_count(), 0);
        assert_eq!(extraction.noise_count(), 0);
    }
}
