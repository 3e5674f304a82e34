//! Leave-one-sensor-out ensemble anomaly detection for turbine telemetry.
//!
//! Train one sequence model per monitored tag, each blind to that tag's
//! window history but asked to reconstruct the full current sensor vector.
//! At runtime the per-model reconstruction errors both flag an anomaly and
//! point at the sensor behind it.
//!
//! ```no_run
//! use ndarray::Array3;
//! use turbine_anomaly::{score, EnsembleConfig, TagSet, Trainer};
//!
//! # fn main() -> turbine_anomaly::Result<()> {
//! let tags = TagSet::from_names(["SD1A", "TC19", "PT8"])?;
//! let samples = Array3::<f64>::zeros((100, 300, 3));
//! let outcome = Trainer::new(EnsembleConfig::default())?.train(&tags, samples.view())?;
//! let ensemble = outcome.into_complete()?;
//! let verdict = score(&ensemble, samples.index_axis(ndarray::Axis(0), 0))?;
//! println!("{} {}", verdict.healthy_model, verdict.confidence);
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "python")]
use pyo3::prelude::*;

pub mod config;
pub mod ensemble;
pub mod error;
pub mod models;
pub mod series;
pub mod tags;
pub mod telemetry;
pub mod utils;
pub mod window;

#[cfg(feature = "python")]
mod python;

pub use config::{EnsembleConfig, TrainingConfig};
pub use ensemble::scorer::{reconstruction_errors, verdict_from_errors};
pub use ensemble::trainer::train;
pub use ensemble::{
    score, AnomalyScorer, AnomalyVerdict, Ensemble, ErrorVector, ModelVariant, Trainer,
    TrainingOutcome,
};
pub use error::{AnomalyError, Result, TrainingFailure};
pub use models::{CancelToken, SequenceModel, TemporalRegressor, TrainingReport};
pub use series::{MemorySeries, Reading, SeriesSource, TimeBound, WideFrame};
pub use tags::{FallbackTags, NumericKind, StaticTags, TagDocument, TagSet, TagSource, TagSpec};
pub use utils::scaler::StandardScaler;
pub use window::{WindowBuilder, WindowSet};

/// A Python module implemented in Rust.
#[cfg(feature = "python")]
#[pymodule]
fn turbine_anomaly(_py: Python, m: &PyModule) -> PyResult<()> {
    telemetry::init_logging("info");

    // Ensemble:
    m.add_class::<python::PyEnsemble>()?;

    // Tags:
    m.add_function(wrap_pyfunction!(python::load_tags, m)?)?;
    Ok(())
}
