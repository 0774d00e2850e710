use std::fmt;
use std::fmt::{Display, Formatter};

use nalgebra::{Matrix2, RowVector2, Vector2};
use serde::{Deserialize, Serialize};

use crate::algorithm::ghost::NoiseSeed;
use crate::data::peak::{Centroid, PeakRef};
use crate::error::{Axis, KalmanQuantError, Result};
use crate::tracking::parameters::TrackerModel;

/// Lifecycle state of a tracker. Retired states are final.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerStatus {
    #[default]
    Active,
    RetiredNoise,
    RetiredFeature,
}

impl TrackerStatus {
    pub fn is_retired(&self) -> bool {
        !matches!(self, TrackerStatus::Active)
    }
}

impl Display for TrackerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TrackerStatus::Active => write!(f, "Active"),
            TrackerStatus::RetiredNoise => write!(f, "RetiredNoise"),
            TrackerStatus::RetiredFeature => write!(f, "RetiredFeature"),
        }
    }
}

/// Stable identifier of a tracker within one run, assigned in spawn order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackerId(pub usize);

impl Display for TrackerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Region around a prediction in which a centroid may be claimed. Bounds are inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GatingWindow {
    pub mz_low: f64,
    pub mz_high: f64,
    pub intensity_low: f64,
    pub intensity_high: f64,
}

impl GatingWindow {
    pub fn contains(&self, mz: f64, intensity: f64) -> bool {
        self.mz_low <= mz && mz <= self.mz_high && self.intensity_low <= intensity && intensity <= self.intensity_high
    }

    pub fn mz_width(&self) -> f64 {
        self.mz_high - self.mz_low
    }
}

/// What the association step needs from a tracker.
///
/// `Tracker` is the production implementation; anything else implementing it can be
/// driven through `possible_matches`, `best_matches` and `apply_assignment`.
pub trait Track {
    /// Advances the estimate to `current_time`.
    fn predict(&mut self, current_time: f64);

    fn gating_window(&self) -> GatingWindow;

    /// Score used to rank candidate centroids, lower is better.
    fn normalized_distance(&self, mz: f64, intensity: f64) -> f64;

    fn in_bounds(&self, mz: f64, intensity: f64) -> bool {
        self.gating_window().contains(mz, intensity)
    }

    /// Claims `centroid`; on error the tracker is left untouched.
    fn update(&mut self, centroid: Centroid, observed_time: f64) -> Result<()>;

    fn missed(&mut self);

    /// Number of centroids claimed so far.
    fn hit_count(&self) -> usize;
}

// observation model, position only
fn observation() -> RowVector2<f64> {
    RowVector2::new(1.0, 0.0)
}

fn symmetrize(p: Matrix2<f64>) -> Matrix2<f64> {
    (p + p.transpose()) * 0.5
}

/// Constant-velocity Kalman filter for one axis: state [position, velocity].
#[derive(Clone, Debug, PartialEq)]
struct AxisFilter {
    x: Vector2<f64>,
    p: Matrix2<f64>,
    q: Matrix2<f64>,
    r: f64,
}

impl AxisFilter {
    fn new(position: f64, position_variance: f64, velocity_variance: f64, q: Matrix2<f64>, r: f64) -> Self {
        AxisFilter {
            x: Vector2::new(position, 0.0),
            p: Matrix2::new(position_variance, 0.0, 0.0, velocity_variance),
            q,
            r,
        }
    }

    fn predict(&mut self, dt: f64) {
        let f = Matrix2::new(1.0, dt, 0.0, 1.0);
        self.p = symmetrize(f * self.p * f.transpose() + self.q);
        self.x = f * self.x;
    }

    /// Information-form innovation; returns the new (state, covariance) without committing.
    fn innovate(&self, measurement: f64, axis: Axis) -> Result<(Vector2<f64>, Matrix2<f64>)> {
        let h = observation();
        let r_inv = 1.0 / self.r;

        let p_inv = self
            .p
            .try_inverse()
            .ok_or(KalmanQuantError::NumericInstability { axis })?;
        let information = p_inv + h.transpose() * h * r_inv;
        let p_new = information
            .try_inverse()
            .map(symmetrize)
            .ok_or(KalmanQuantError::NumericInstability { axis })?;

        let residual = (h * self.x)[0] - measurement;
        let x_new = self.x - p_new * h.transpose() * (r_inv * residual);

        let finite = x_new.iter().chain(p_new.iter()).all(|v| v.is_finite());
        if !finite || p_new[(0, 0)] < 0.0 || p_new[(1, 1)] < 0.0 {
            return Err(KalmanQuantError::NumericInstability { axis });
        }
        Ok((x_new, p_new))
    }

    fn margin(&self) -> f64 {
        // variance scaled by 3 under the root, not three standard deviations
        (3.0 * self.p[(0, 0)]).sqrt()
    }

    fn position(&self) -> f64 {
        self.x[0]
    }

    fn deviation(&self, value: f64) -> f64 {
        let d = value - self.x[0];
        d * d / self.p[(0, 0)].sqrt()
    }
}

/// Kalman tracker following one candidate feature through m/z and intensity.
#[derive(Clone, Debug)]
pub struct Tracker {
    id: TrackerId,
    mz: AxisFilter,
    intensity: AxisFilter,
    last_time: f64,
    peaks: Vec<PeakRef>,
    misses: usize,
    status: TrackerStatus,
}

impl Tracker {
    /// Starts a tracker on an unclaimed centroid.
    ///
    /// # Arguments
    ///
    /// * `id` - Identifier handed out by the owning manager.
    /// * `centroid` - The seeding centroid, which becomes the first claimed peak.
    /// * `time` - Scan time of the seeding centroid.
    /// * `seed` - Run-wide noise parameters.
    /// * `model` - Run-wide motion-model constants.
    ///
    /// # Description
    ///
    /// Both axes start at the observed value with zero velocity. The m/z axis gets
    /// `P = diag(mz_variance, mz_velocity_variance)`, `Q = mz_process_noise * I` and
    /// `R = mz_variance`; the intensity axis gets
    /// `P = diag(intensity_variance, intensity_velocity_variance)`,
    /// `Q = intensity_variance * I` and `R = max_intensity_scale`.
    pub fn spawn(id: TrackerId, centroid: Centroid, time: f64, seed: NoiseSeed, model: TrackerModel) -> Self {
        let mz = AxisFilter::new(
            centroid.mz,
            seed.mz_variance,
            model.mz_velocity_variance,
            Matrix2::identity() * model.mz_process_noise,
            seed.mz_variance,
        );
        let intensity = AxisFilter::new(
            centroid.intensity,
            seed.intensity_variance,
            model.intensity_velocity_variance,
            Matrix2::identity() * seed.intensity_variance,
            seed.max_intensity_scale,
        );
        Tracker {
            id,
            mz,
            intensity,
            last_time: time,
            peaks: vec![centroid.peak],
            misses: 0,
            status: TrackerStatus::Active,
        }
    }

    /// Status this tracker should have under the given thresholds.
    pub fn classify(&self, min_size: usize, max_misses: usize) -> TrackerStatus {
        if self.misses <= max_misses {
            TrackerStatus::Active
        } else {
            self.retirement_status(min_size)
        }
    }

    /// Status the tracker retires with, regardless of its miss count.
    pub fn retirement_status(&self, min_size: usize) -> TrackerStatus {
        if self.peaks.len() >= min_size {
            TrackerStatus::RetiredFeature
        } else {
            TrackerStatus::RetiredNoise
        }
    }

    /// Records a retirement. A retired tracker keeps its first retired status.
    pub(crate) fn retire(&mut self, status: TrackerStatus) {
        debug_assert!(status.is_retired());
        if self.status == TrackerStatus::Active {
            self.status = status;
        }
    }

    pub fn id(&self) -> TrackerId {
        self.id
    }

    pub fn status(&self) -> TrackerStatus {
        self.status
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Claimed peaks in temporal order, the seeding centroid first.
    pub fn peaks(&self) -> &[PeakRef] {
        &self.peaks
    }

    pub fn last_time(&self) -> f64 {
        self.last_time
    }

    pub fn mz_estimate(&self) -> f64 {
        self.mz.position()
    }

    pub fn mz_velocity(&self) -> f64 {
        self.mz.x[1]
    }

    pub fn intensity_estimate(&self) -> f64 {
        self.intensity.position()
    }

    pub fn intensity_velocity(&self) -> f64 {
        self.intensity.x[1]
    }

    pub fn mz_covariance(&self) -> Matrix2<f64> {
        self.mz.p
    }

    pub fn intensity_covariance(&self) -> Matrix2<f64> {
        self.intensity.p
    }
}

impl Track for Tracker {
    /// `dt` is the absolute distance to the last observation; `dt == 0` only adds `Q`.
    fn predict(&mut self, current_time: f64) {
        let dt = (current_time - self.last_time).abs();
        self.mz.predict(dt);
        self.intensity.predict(dt);
    }

    fn gating_window(&self) -> GatingWindow {
        let mz_margin = self.mz.margin();
        let intensity_margin = self.intensity.margin();
        GatingWindow {
            mz_low: self.mz.position() - mz_margin,
            mz_high: self.mz.position() + mz_margin,
            intensity_low: self.intensity.position() - intensity_margin,
            intensity_high: self.intensity.position() + intensity_margin,
        }
    }

    /// Squared deviation over standard deviation, summed over both axes.
    fn normalized_distance(&self, mz: f64, intensity: f64) -> f64 {
        self.mz.deviation(mz) + self.intensity.deviation(intensity)
    }

    fn update(&mut self, centroid: Centroid, observed_time: f64) -> Result<()> {
        let (mz_x, mz_p) = self.mz.innovate(centroid.mz, Axis::Mz)?;
        let (int_x, int_p) = self.intensity.innovate(centroid.intensity, Axis::Intensity)?;

        self.mz.x = mz_x;
        self.mz.p = mz_p;
        self.intensity.x = int_x;
        self.intensity.p = int_p;
        self.peaks.push(centroid.peak);
        self.misses = 0;
        self.last_time = observed_time;
        Ok(())
    }

    fn missed(&mut self) {
        self.misses += 1;
    }

    fn hit_count(&self) -> usize {
        self.peaks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_seed() -> NoiseSeed {
        NoiseSeed::new(0.01, 1.0, 1.0)
    }

    fn unit_model() -> TrackerModel {
        TrackerModel {
            mz_process_noise: 0.01,
            mz_velocity_variance: 1.0,
            intensity_velocity_variance: 1.0,
        }
    }

    fn tracker_at(mz: f64, intensity: f64, time: f64) -> Tracker {
        Tracker::spawn(TrackerId(0), Centroid::new(PeakRef::new(0, 0), mz, intensity), time, unit_seed(), unit_model())
    }

    #[test]
    fn test_spawn() {
        let seed = NoiseSeed::new(5.0e-7, 4.9e7, 176.0);
        let t = Tracker::spawn(TrackerId(0), Centroid::new(PeakRef::new(3, 1), 794.15, 66.6), 3.0, seed, TrackerModel::default());

        assert_eq!(t.hit_count(), 1);
        assert_eq!(t.peaks(), &[PeakRef::new(3, 1)]);
        assert_eq!(t.status(), TrackerStatus::Active);
        assert_eq!(t.mz_estimate(), 794.15);
        assert_eq!(t.mz_velocity(), 0.0);
        assert_eq!(t.mz_covariance(), Matrix2::new(5.0e-7, 0.0, 0.0, 10.0));
        assert_eq!(t.intensity_covariance(), Matrix2::new(4.9e7, 0.0, 0.0, 1e-3));
        assert_eq!(t.mz.q, Matrix2::identity() * 1e-4);
        assert_eq!(t.intensity.q, Matrix2::identity() * 4.9e7);
        assert_eq!(t.mz.r, 5.0e-7);
        assert_eq!(t.intensity.r, 176.0);
    }

    #[test]
    fn test_predict_zero_dt_adds_process_noise_only() {
        let mut t = tracker_at(500.0, 100.0, 2.0);
        t.intensity.x = Vector2::new(100.0, 5.0);
        let p_mz = t.mz_covariance();
        let p_int = t.intensity_covariance();

        t.predict(2.0);

        assert_eq!(t.mz_estimate(), 500.0);
        assert_eq!(t.intensity_estimate(), 100.0);
        assert_eq!(t.intensity_velocity(), 5.0);
        assert_eq!(t.mz_covariance(), p_mz + t.mz.q);
        assert_eq!(t.intensity_covariance(), p_int + t.intensity.q);
        assert_eq!(t.last_time(), 2.0);
    }

    #[test]
    fn test_predict_moves_with_velocity() {
        let mut t = tracker_at(500.0, 100.0, 1.0);
        t.intensity.x = Vector2::new(100.0, 10.0);

        t.predict(4.0);
        assert_relative_eq!(t.intensity_estimate(), 130.0);
        // P' = F P F^T + Q with F = [[1, 3], [0, 1]] and P = Q = I
        assert_relative_eq!(t.intensity_covariance()[(0, 0)], 1.0 + 9.0 + 1.0);
        assert_relative_eq!(t.intensity_covariance()[(0, 1)], 3.0);
        assert_relative_eq!(t.intensity_covariance()[(1, 1)], 2.0);

        // a time before the last observation is treated by its distance
        let mut back = tracker_at(500.0, 100.0, 4.0);
        back.intensity.x = Vector2::new(100.0, 10.0);
        back.predict(1.0);
        assert_relative_eq!(back.intensity_estimate(), 130.0);
        // last observed time is left alone
        assert_eq!(t.last_time(), 1.0);
    }

    #[test]
    fn test_gating_window() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.predict(1.0);
        let w = t.gating_window();
        let mz_margin = (3.0 * t.mz_covariance()[(0, 0)]).sqrt();
        let int_margin = (3.0 * t.intensity_covariance()[(0, 0)]).sqrt();
        assert_relative_eq!(w.mz_low, 500.0 - mz_margin);
        assert_relative_eq!(w.mz_high, 500.0 + mz_margin);
        assert_relative_eq!(w.intensity_low, 100.0 - int_margin);
        assert_relative_eq!(w.intensity_high, 100.0 + int_margin);
        // P_int[0,0] = 1 + 1 + 1 after one step
        assert_relative_eq!(int_margin, 3.0);
        // about 1.73 standard deviations, so a 2 sigma deviation is already outside
        let int_sigma = t.intensity_covariance()[(0, 0)].sqrt();
        assert!(!t.in_bounds(500.0, 100.0 + 2.0 * int_sigma));

        assert!(t.in_bounds(500.0, 103.0));
        assert!(!t.in_bounds(500.0, 103.5));
        assert!(!t.in_bounds(500.0 + mz_margin * 1.01, 100.0));
    }

    #[test]
    fn test_normalized_distance() {
        let t = tracker_at(500.0, 100.0, 0.0);
        // sqrt(P_mz[0,0]) = 0.1, sqrt(P_int[0,0]) = 1
        assert_relative_eq!(t.normalized_distance(500.0, 100.0), 0.0);
        assert_relative_eq!(t.normalized_distance(500.1, 100.0), 0.1, epsilon = 1e-9);
        assert_relative_eq!(t.normalized_distance(500.0, 98.0), 4.0);
        assert_relative_eq!(t.normalized_distance(499.9, 102.0), 4.1, epsilon = 1e-9);
    }

    #[test]
    fn test_update_information_form() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.predict(1.0);
        // intensity: P = [[3, 1], [1, 2]], R = 1
        t.update(Centroid::new(PeakRef::new(1, 0), 500.0, 104.0), 1.0).unwrap();

        assert_relative_eq!(t.intensity_estimate(), 103.0, epsilon = 1e-9);
        assert_relative_eq!(t.intensity_velocity(), 1.0, epsilon = 1e-9);
        let p = t.intensity_covariance();
        assert_relative_eq!(p[(0, 0)], 0.75, epsilon = 1e-12);
        assert_relative_eq!(p[(0, 1)], 0.25, epsilon = 1e-12);
        assert_relative_eq!(p[(1, 0)], 0.25, epsilon = 1e-12);
        assert_relative_eq!(p[(1, 1)], 1.75, epsilon = 1e-12);

        assert_eq!(t.hit_count(), 2);
        assert_eq!(t.peaks()[1], PeakRef::new(1, 0));
        assert_eq!(t.last_time(), 1.0);
    }

    #[test]
    fn test_update_lowers_diagonal_covariance() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.predict(1.0);
        let before_mz = t.mz_covariance();
        let before_int = t.intensity_covariance();

        t.update(Centroid::new(PeakRef::new(1, 0), 500.01, 101.0), 1.0).unwrap();

        let after_mz = t.mz_covariance();
        let after_int = t.intensity_covariance();
        for i in 0..2 {
            assert!(after_mz[(i, i)] < before_mz[(i, i)]);
            assert!(after_int[(i, i)] < before_int[(i, i)]);
            assert!(after_mz[(i, i)] >= 0.0);
        }
        assert_eq!(after_mz, after_mz.transpose());
        assert_eq!(after_int, after_int.transpose());
    }

    #[test]
    fn test_update_resets_misses() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.missed();
        t.missed();
        assert_eq!(t.misses(), 2);
        t.predict(3.0);
        t.update(Centroid::new(PeakRef::new(3, 0), 500.0, 100.0), 3.0).unwrap();
        assert_eq!(t.misses(), 0);
    }

    #[test]
    fn test_failed_update_leaves_tracker_unchanged() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.predict(1.0);
        let mz_before = t.mz.clone();
        let int_before = t.intensity.clone();

        // the m/z axis would succeed, the intensity axis cannot
        let result = t.update(Centroid::new(PeakRef::new(1, 0), 500.0, f64::NAN), 1.0);
        match result {
            Err(KalmanQuantError::NumericInstability { axis }) => assert_eq!(axis, Axis::Intensity),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(t.mz, mz_before);
        assert_eq!(t.intensity, int_before);
        assert_eq!(t.hit_count(), 1);
        assert_eq!(t.last_time(), 0.0);
    }

    #[test]
    fn test_zero_measurement_noise_is_unstable() {
        let seed = NoiseSeed::new(0.01, 1.0, 0.0);
        let mut t = Tracker::spawn(TrackerId(0), Centroid::new(PeakRef::new(0, 0), 500.0, 100.0), 0.0, seed, unit_model());
        t.predict(1.0);
        assert!(t.update(Centroid::new(PeakRef::new(1, 0), 500.0, 100.0), 1.0).is_err());
        assert_eq!(t.hit_count(), 1);
    }

    #[test]
    fn test_missed_does_not_touch_state() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.predict(1.0);
        let p = t.mz_covariance();
        t.missed();
        assert_eq!(t.misses(), 1);
        assert_eq!(t.mz_covariance(), p);
        assert_eq!(t.mz_estimate(), 500.0);
    }

    #[test]
    fn test_classify() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        for scan in 1..4 {
            t.predict(scan as f64);
            t.update(Centroid::new(PeakRef::new(scan, 0), 500.0, 100.0), scan as f64).unwrap();
        }
        assert_eq!(t.hit_count(), 4);

        t.missed();
        t.missed();
        assert_eq!(t.classify(4, 2), TrackerStatus::Active);
        t.missed();
        assert_eq!(t.classify(4, 2), TrackerStatus::RetiredFeature);
        assert_eq!(t.classify(5, 2), TrackerStatus::RetiredNoise);
        assert_eq!(t.classify(5, 3), TrackerStatus::Active);

        assert_eq!(t.retirement_status(4), TrackerStatus::RetiredFeature);
        assert_eq!(t.retirement_status(5), TrackerStatus::RetiredNoise);
    }

    #[test]
    fn test_retire_is_write_once() {
        let mut t = tracker_at(500.0, 100.0, 0.0);
        t.retire(TrackerStatus::RetiredNoise);
        t.retire(TrackerStatus::RetiredFeature);
        assert_eq!(t.status(), TrackerStatus::RetiredNoise);
    }

    #[test]
    fn test_status_default_is_active() {
        assert_eq!(TrackerStatus::default(), TrackerStatus::Active);
        assert!(!TrackerStatus::default().is_retired());
        assert!(TrackerStatus::RetiredFeature.is_retired());
    }
}
