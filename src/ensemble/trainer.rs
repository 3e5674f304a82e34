use std::collections::BTreeMap;

use ndarray::{ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use tracing::{info, info_span, warn};

use crate::config::EnsembleConfig;
use crate::ensemble::{Ensemble, ModelVariant};
use crate::error::{AnomalyError, Result, TrainingFailure};
use crate::models::{CancelToken, SequenceModel, TemporalRegressor, TrainingReport};
use crate::tags::TagSet;
use crate::window::{last_step_targets, partial_batch, WindowBuilder};

/// Golden-ratio increment, spreads per-variant seeds apart.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Trains one variant per tag, in parallel.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: EnsembleConfig,
    cancel: CancelToken,
}

/// Result of an ensemble fit: the variants that trained and why the rest did not.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub ensemble: Ensemble,
    pub failures: BTreeMap<String, TrainingFailure>,
}

impl TrainingOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.ensemble.is_complete()
    }

    /// The ensemble, or an error naming every tag without a variant.
    pub fn into_complete(self) -> Result<Ensemble> {
        if self.ensemble.is_complete() {
            Ok(self.ensemble)
        } else {
            Err(AnomalyError::IncompleteEnsemble {
                missing: self.ensemble.missing(),
            })
        }
    }

    pub fn reports(&self) -> impl Iterator<Item = (&str, &TrainingReport)> + '_ {
        self.ensemble.variants().map(|v| (v.excluded(), v.report()))
    }
}

impl Trainer {
    pub fn new(config: EnsembleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Trainer {
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Share an abort flag with the caller.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Window a gap-free `[L, P]` series, then [`train`](Self::train).
    pub fn train_series(
        &self,
        tags: &TagSet,
        series: ArrayView2<'_, f64>,
    ) -> Result<TrainingOutcome> {
        let windows = WindowBuilder::new(self.config.timesteps)?.build(series)?;
        self.train(tags, windows.windows())
    }

    /// Fit every variant on `[samples, T, P]` windows.
    ///
    /// Data and shape errors fail the whole call; a variant that fails to
    /// fit is recorded in [`TrainingOutcome::failures`] and its siblings
    /// still train.
    pub fn train(&self, tags: &TagSet, samples: ArrayView3<'_, f64>) -> Result<TrainingOutcome> {
        let (count, timesteps, sensors) = samples.dim();
        if tags.len() < 2 {
            return Err(AnomalyError::invalid_config(
                "leave-one-out training needs at least 2 tags",
            ));
        }
        if timesteps != self.config.timesteps || sensors != tags.len() {
            return Err(AnomalyError::shape(
                format!("[samples, {}, {}]", self.config.timesteps, tags.len()),
                format!("[{count}, {timesteps}, {sensors}]"),
            ));
        }
        if count == 0 {
            return Err(AnomalyError::InsufficientData {
                rows: 0,
                timesteps,
            });
        }

        let _span = info_span!("train_ensemble", sensors, samples = count, timesteps).entered();
        let targets = last_step_targets(samples);
        let threads = self.config.training.worker_threads();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| AnomalyError::invalid_config(format!("worker pool: {e}")))?;
        info!(threads, "training ensemble");

        let results = pool.install(|| {
            (0..sensors)
                .into_par_iter()
                .map(|index| self.train_variant(tags, index, samples, targets.view()))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut variants = Vec::with_capacity(sensors);
        let mut failures = BTreeMap::new();
        for (tag, result) in results {
            match result {
                Ok(variant) => variants.push(variant),
                Err(failure) => {
                    warn!(tag = %tag, error = %failure, "variant training failed");
                    failures.insert(tag, failure);
                }
            }
        }

        info!(
            trained = variants.len(),
            failed = failures.len(),
            "ensemble training finished"
        );
        let ensemble = Ensemble::partial(tags.clone(), timesteps, variants)?;
        Ok(TrainingOutcome { ensemble, failures })
    }

    fn train_variant(
        &self,
        tags: &TagSet,
        index: usize,
        samples: ArrayView3<'_, f64>,
        targets: ArrayView2<'_, f64>,
    ) -> Result<(String, std::result::Result<ModelVariant, TrainingFailure>)> {
        let tag = match tags.name(index) {
            Some(name) => name.to_string(),
            None => {
                return Err(AnomalyError::shape(
                    format!("index < {}", tags.len()),
                    format!("index {index}"),
                ))
            }
        };
        let sensors = tags.len();
        let training = &self.config.training;

        let inputs = partial_batch(samples, index)?;
        let seed = training
            .seed
            .wrapping_add((index as u64 + 1).wrapping_mul(SEED_STRIDE));
        let mut model = TemporalRegressor::new(sensors - 1, sensors, &training.hidden_units, seed);

        info!(tag = %tag, index, "training variant");
        let result = model
            .fit(inputs.view(), targets, training, &self.cancel)
            .map(|report| {
                info!(
                    tag = %tag,
                    epochs = report.epochs_run,
                    loss = report.final_train_loss,
                    val_loss = ?report.best_validation_loss,
                    "variant trained"
                );
                ModelVariant::new(tag.clone(), index, samples.len_of(Axis(1)), model, report)
            });
        Ok((tag, result))
    }
}

/// Train with a fresh [`Trainer`] and its own cancel token.
pub fn train(
    config: EnsembleConfig,
    tags: &TagSet,
    samples: ArrayView3<'_, f64>,
) -> Result<TrainingOutcome> {
    Trainer::new(config)?.train(tags, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use ndarray::Array3;

    fn quick_config(timesteps: usize) -> EnsembleConfig {
        EnsembleConfig {
            timesteps,
            training: TrainingConfig {
                epochs: 3,
                batch_size: 8,
                hidden_units: vec![4],
                threads: 2,
                ..TrainingConfig::default()
            },
        }
    }

    fn tensor(samples: usize, timesteps: usize, sensors: usize) -> Array3<f64> {
        Array3::from_shape_fn((samples, timesteps, sensors), |(n, t, p)| {
            ((n * 7 + t * 3 + p) % 11) as f64 / 11.0
        })
    }

    #[test]
    fn test_one_variant_per_tag() {
        let tags = TagSet::from_names(["A", "B", "C", "D"]).unwrap();
        let samples = tensor(30, 5, 4);
        let outcome = Trainer::new(quick_config(5))
            .unwrap()
            .train(&tags, samples.view())
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.ensemble.len(), 4);
        for (tag, report) in outcome.reports() {
            assert!(tags.contains(tag));
            assert_eq!(report.samples, 30);
        }
        let variant = outcome.ensemble.variant("C").unwrap();
        assert_eq!(variant.excluded_index(), 2);
        assert_eq!(variant.input_shape(), (5, 3));
        assert_eq!(variant.output_width(), 4);
    }

    #[test]
    fn test_shape_errors() {
        let tags = TagSet::from_names(["A", "B", "C"]).unwrap();
        let trainer = Trainer::new(quick_config(5)).unwrap();

        let err = trainer.train(&tags, tensor(10, 4, 3).view()).unwrap_err();
        assert!(matches!(err, AnomalyError::ShapeMismatch { .. }));

        let err = trainer.train(&tags, tensor(10, 5, 2).view()).unwrap_err();
        assert!(matches!(err, AnomalyError::ShapeMismatch { .. }));

        let err = trainer.train(&tags, tensor(0, 5, 3).view()).unwrap_err();
        assert!(matches!(err, AnomalyError::InsufficientData { .. }));

        let single = TagSet::from_names(["A"]).unwrap();
        let err = trainer.train(&single, tensor(10, 5, 1).view()).unwrap_err();
        assert!(matches!(err, AnomalyError::InvalidConfig(_)));
    }

    #[test]
    fn test_cancelled_training_reports_every_variant() {
        let tags = TagSet::from_names(["A", "B", "C"]).unwrap();
        let token = CancelToken::new();
        let trainer = Trainer::new(quick_config(5))
            .unwrap()
            .with_cancel_token(token.clone());
        token.cancel();

        let outcome = trainer.train(&tags, tensor(20, 5, 3).view()).unwrap();
        assert!(outcome.ensemble.is_empty());
        assert_eq!(outcome.failures.len(), 3);
        assert!(outcome.failures.values().all(|f| *f == TrainingFailure::Aborted));
        assert!(outcome.into_complete().is_err());
    }
}
