use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Which state axis of a tracker an error refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Mz,
    Intensity,
}

impl Display for Axis {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Mz => write!(f, "m/z"),
            Axis::Intensity => write!(f, "intensity"),
        }
    }
}

/// Errors raised while validating or tracking a run.
#[derive(Debug, Error)]
pub enum KalmanQuantError {
    /// The run violates the input contract; fatal, raised before any scan is processed.
    #[error("invalid input at scan {scan}: {reason}")]
    InputValidation { scan: usize, reason: String },

    /// A covariance inversion was singular or produced non-finite values.
    #[error("numeric instability in {axis} update")]
    NumericInstability { axis: Axis },

    /// Parameters or noise seed that cannot drive a tracker.
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl KalmanQuantError {
    pub fn input(scan: usize, reason: impl Into<String>) -> Self {
        KalmanQuantError::InputValidation { scan, reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, KalmanQuantError>;
