//! Python bindings. Built with the `python` feature.

use std::collections::{BTreeMap, HashMap};

use ndarray::Axis;
use numpy::{PyReadonlyArray2, PyReadonlyArray3};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::config::{EnsembleConfig, TrainingConfig};
use crate::ensemble::{AnomalyScorer, Trainer};
use crate::error::AnomalyError;
use crate::tags::{FallbackTags, StaticTags, TagDocument, TagSet, TagSource};

impl From<AnomalyError> for PyErr {
    fn from(err: AnomalyError) -> PyErr {
        match err {
            AnomalyError::Io(e) => PyIOError::new_err(e.to_string()),
            other => PyValueError::new_err(other.to_string()),
        }
    }
}

/// Python-exposed wrapper around a trained ensemble.
#[pyclass(name = "Ensemble")]
pub struct PyEnsemble {
    scorer: AnomalyScorer,
    failures: BTreeMap<String, String>,
}

#[pymethods]
impl PyEnsemble {
    #[staticmethod]
    #[pyo3(signature = (
        tags,
        tensor,
        epochs = 100,
        batch_size = 32,
        learning_rate = 1e-3,
        validation_split = 0.2,
        patience = 10,
        hidden_units = None,
        seed = 42,
        threads = 0
    ))]
    #[allow(clippy::too_many_arguments)]
    /// Train one model per tag, each blind to that tag's history.
    ///
    /// # Arguments
    /// * `tags` - Tag names, in the column order of `tensor`.
    /// * `tensor` - Windows shaped `[samples, T, P]`; T becomes the ensemble window length.
    /// * `epochs` - Maximum passes over the training split. Defaults to 100.
    /// * `batch_size` - Mini-batch size. Defaults to 32.
    /// * `learning_rate` - Adam step size. Defaults to 1e-3.
    /// * `validation_split` - Trailing fraction of samples held out. Defaults to 0.2.
    /// * `patience` - Epochs without validation improvement before stopping; 0 disables. Defaults to 10.
    /// * `hidden_units` - Hidden layer widths. Defaults to [16].
    /// * `seed` - Base seed for weight init and shuffling. Defaults to 42.
    /// * `threads` - Worker threads, 0 for every core. Defaults to 0.
    fn train(
        py: Python<'_>,
        tags: Vec<String>,
        tensor: PyReadonlyArray3<'_, f64>,
        epochs: usize,
        batch_size: usize,
        learning_rate: f64,
        validation_split: f64,
        patience: usize,
        hidden_units: Option<Vec<usize>>,
        seed: u64,
        threads: usize,
    ) -> PyResult<Self> {
        let tag_set = TagSet::from_names(tags)?;
        let samples = tensor.as_array().to_owned();
        let defaults = TrainingConfig::default();
        let config = EnsembleConfig {
            timesteps: samples.len_of(Axis(1)),
            training: TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                validation_split,
                patience,
                hidden_units: hidden_units.unwrap_or(defaults.hidden_units),
                seed,
                threads,
            },
        };

        let outcome = py.allow_threads(|| Trainer::new(config)?.train(&tag_set, samples.view()))?;
        let failures = outcome
            .failures
            .iter()
            .map(|(tag, failure)| (tag.clone(), failure.to_string()))
            .collect();

        Ok(PyEnsemble {
            scorer: AnomalyScorer::new(outcome.ensemble),
            failures,
        })
    }

    /// Score the current window.
    ///
    /// # Arguments
    /// * `window` - Latest readings shaped `[T, P]`, columns in tag order.
    ///
    /// Returns `(healthy_model, confidence, errors)`, errors keyed by excluded tag.
    fn score(&self, window: PyReadonlyArray2<'_, f64>) -> PyResult<(String, f64, HashMap<String, f64>)> {
        let verdict = self.scorer.score(window.as_array())?;
        let errors = verdict
            .errors
            .iter()
            .map(|(tag, error)| (tag.to_string(), error))
            .collect();
        Ok((verdict.healthy_model, verdict.confidence, errors))
    }

    #[getter]
    fn tags(&self) -> Vec<String> {
        self.scorer
            .ensemble()
            .tags()
            .names()
            .map(str::to_string)
            .collect()
    }

    #[getter]
    fn timesteps(&self) -> usize {
        self.scorer.ensemble().timesteps()
    }

    /// Tags whose variant failed to train, with the reason.
    #[getter]
    fn failures(&self) -> HashMap<String, String> {
        self.failures.clone().into_iter().collect()
    }

    fn is_complete(&self) -> bool {
        self.scorer.ensemble().is_complete()
    }
}

/// Monitored tags from a YAML tag file, or the built-in turbine list.
#[pyfunction]
#[pyo3(signature = (path = None))]
pub fn load_tags(path: Option<String>) -> PyResult<Vec<String>> {
    let tags = match path {
        Some(path) => {
            FallbackTags::new(TagDocument::file(path), StaticTags::turbine()).list_monitored_tags()?
        }
        None => StaticTags::turbine().list_monitored_tags()?,
    };
    Ok(tags.names().map(str::to_string).collect())
}
