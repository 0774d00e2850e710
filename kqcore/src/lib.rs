// data module
pub mod data {
    pub mod spectrum;
    pub mod peak;
}

// algorithm module
pub mod algorithm {
    pub mod search;
    pub mod ghost;
}

// tracking module
pub mod tracking {
    pub mod parameters;
    pub mod tracker;
    pub mod association;
    pub mod manager;
    pub mod feature;
}

pub mod error;

// Re-export commonly used types
pub use algorithm::ghost::NoiseSeed;
pub use data::spectrum::Spectrum;
pub use error::{KalmanQuantError, Result};
pub use tracking::manager::{process_run, Extraction, TrackerManager};
pub use tracking::parameters::{TrackerModel, TrackingParameters};
pub use tracking::tracker::{Track, Tracker, TrackerId, TrackerStatus};
