//! The leave-one-sensor-out ensemble.
//!
//! One [`ModelVariant`] per monitored tag; the variant keyed by tag `e` never
//! sees column `e` of its input window but predicts the full sensor vector.

pub mod scorer;
pub mod trainer;

use std::collections::BTreeMap;

use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};
use crate::models::{SequenceModel, TemporalRegressor, TrainingReport};
use crate::tags::TagSet;
use crate::window::partial_window;

pub use scorer::{score, AnomalyScorer, AnomalyVerdict, ErrorVector};
pub use trainer::{Trainer, TrainingOutcome};

/// A trained model that excludes one sensor from its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVariant {
    excluded: String,
    excluded_index: usize,
    timesteps: usize,
    model: TemporalRegressor,
    report: TrainingReport,
}

impl ModelVariant {
    pub fn new(
        excluded: impl Into<String>,
        excluded_index: usize,
        timesteps: usize,
        model: TemporalRegressor,
        report: TrainingReport,
    ) -> Self {
        ModelVariant {
            excluded: excluded.into(),
            excluded_index,
            timesteps,
            model,
            report,
        }
    }

    pub fn excluded(&self) -> &str {
        &self.excluded
    }

    pub fn excluded_index(&self) -> usize {
        self.excluded_index
    }

    /// `[T, P-1]`.
    pub fn input_shape(&self) -> (usize, usize) {
        (self.timesteps, self.model.input_width())
    }

    /// `P`.
    pub fn output_width(&self) -> usize {
        self.model.output_width()
    }

    pub fn model(&self) -> &TemporalRegressor {
        &self.model
    }

    pub fn report(&self) -> &TrainingReport {
        &self.report
    }

    /// Predict the full sensor vector from a full `[T, P]` window.
    pub fn predict(&self, window: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        let partial = partial_window(window, self.excluded_index)?;
        if partial.dim() != self.input_shape() {
            return Err(AnomalyError::shape(
                format!("{:?}", self.input_shape()),
                format!("{:?}", partial.dim()),
            ));
        }
        Ok(self.model.infer(partial.view()))
    }
}

#[derive(Deserialize)]
struct RawEnsemble {
    tags: TagSet,
    timesteps: usize,
    variants: BTreeMap<String, ModelVariant>,
}

/// Trained variants keyed by excluded tag. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnsemble")]
pub struct Ensemble {
    tags: TagSet,
    timesteps: usize,
    variants: BTreeMap<String, ModelVariant>,
}

impl Ensemble {
    /// A complete ensemble: exactly one variant per tag.
    pub fn new(tags: TagSet, timesteps: usize, variants: Vec<ModelVariant>) -> Result<Self> {
        let ensemble = Self::partial(tags, timesteps, variants)?;
        let missing = ensemble.missing();
        if !missing.is_empty() {
            return Err(AnomalyError::IncompleteEnsemble { missing });
        }
        Ok(ensemble)
    }

    /// An ensemble that may lack variants for some tags, e.g. after
    /// per-variant training failures.
    pub fn partial(tags: TagSet, timesteps: usize, variants: Vec<ModelVariant>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for variant in variants {
            check_variant(&tags, timesteps, &variant)?;
            if map.contains_key(&variant.excluded) {
                return Err(AnomalyError::configuration(format!(
                    "two variants exclude '{}'",
                    variant.excluded
                )));
            }
            map.insert(variant.excluded.clone(), variant);
        }
        Ok(Ensemble {
            tags,
            timesteps,
            variants: map,
        })
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Number of sensors P.
    pub fn sensors(&self) -> usize {
        self.tags.len()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.variants.len() == self.tags.len()
    }

    /// Tags with no trained variant, in tag order.
    pub fn missing(&self) -> Vec<String> {
        self.tags
            .names()
            .filter(|name| !self.variants.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    pub fn variant(&self, tag: &str) -> Option<&ModelVariant> {
        self.variants.get(tag)
    }

    /// Trained variants in tag order.
    pub fn variants(&self) -> impl Iterator<Item = &ModelVariant> + '_ {
        self.tags.names().filter_map(|name| self.variants.get(name))
    }
}

impl TryFrom<RawEnsemble> for Ensemble {
    type Error = AnomalyError;

    fn try_from(raw: RawEnsemble) -> Result<Self> {
        for (key, variant) in &raw.variants {
            if key != &variant.excluded {
                return Err(AnomalyError::configuration(format!(
                    "variant stored under '{key}' excludes '{}'",
                    variant.excluded
                )));
            }
        }
        Ensemble::partial(raw.tags, raw.timesteps, raw.variants.into_values().collect())
    }
}

fn check_variant(tags: &TagSet, timesteps: usize, variant: &ModelVariant) -> Result<()> {
    match tags.index_of(&variant.excluded) {
        Some(index) if index == variant.excluded_index => {}
        Some(index) => {
            return Err(AnomalyError::configuration(format!(
                "variant '{}' excludes column {}, tag is at column {index}",
                variant.excluded, variant.excluded_index
            )))
        }
        None => {
            return Err(AnomalyError::configuration(format!(
                "variant excludes unknown tag '{}'",
                variant.excluded
            )))
        }
    }

    let sensors = tags.len();
    let expected_input = (timesteps, sensors.saturating_sub(1));
    if variant.input_shape() != expected_input || variant.output_width() != sensors {
        return Err(AnomalyError::shape(
            format!("input {expected_input:?}, output {sensors}"),
            format!(
                "input {:?}, output {}",
                variant.input_shape(),
                variant.output_width()
            ),
        ));
    }
    variant.model.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> TrainingReport {
        TrainingReport {
            samples: 0,
            train_samples: 0,
            validation_samples: 0,
            epochs_run: 0,
            final_train_loss: 0.0,
            best_validation_loss: None,
            stopped_early: false,
        }
    }

    fn variant(tag: &str, index: usize, timesteps: usize, sensors: usize) -> ModelVariant {
        let model = TemporalRegressor::new(sensors - 1, sensors, &[], index as u64);
        ModelVariant::new(tag, index, timesteps, model, report())
    }

    #[test]
    fn test_complete_ensemble_requires_every_tag() {
        let tags = TagSet::from_names(["A", "B", "C"]).unwrap();
        let variants = vec![variant("A", 0, 5, 3), variant("C", 2, 5, 3)];

        let err = Ensemble::new(tags.clone(), 5, variants.clone()).unwrap_err();
        match err {
            AnomalyError::IncompleteEnsemble { missing } => assert_eq!(missing, vec!["B"]),
            other => panic!("unexpected {other:?}"),
        }

        let partial = Ensemble::partial(tags, 5, variants).unwrap();
        assert!(!partial.is_complete());
        let order: Vec<&str> = partial.variants().map(ModelVariant::excluded).collect();
        assert_eq!(order, vec!["A", "C"]);
    }

    #[test]
    fn test_rejects_inconsistent_variants() {
        let tags = TagSet::from_names(["A", "B"]).unwrap();
        // wrong column
        assert!(Ensemble::partial(tags.clone(), 5, vec![variant("A", 1, 5, 2)]).is_err());
        // unknown tag
        assert!(Ensemble::partial(tags.clone(), 5, vec![variant("Z", 0, 5, 2)]).is_err());
        // wrong window length
        assert!(Ensemble::partial(tags.clone(), 5, vec![variant("A", 0, 4, 2)]).is_err());
        // wrong sensor count
        assert!(Ensemble::partial(tags.clone(), 5, vec![variant("A", 0, 5, 3)]).is_err());
        // duplicate
        assert!(
            Ensemble::partial(tags, 5, vec![variant("A", 0, 5, 2), variant("A", 0, 5, 2)]).is_err()
        );
    }

    #[test]
    fn test_serde_round_trip_keeps_invariants() {
        let tags = TagSet::from_names(["A", "B"]).unwrap();
        let ensemble =
            Ensemble::new(tags, 4, vec![variant("A", 0, 4, 2), variant("B", 1, 4, 2)]).unwrap();

        let json = serde_json::to_string(&ensemble).unwrap();
        let back: Ensemble = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ensemble);

        let tampered = json.replacen("\"timesteps\":4", "\"timesteps\":9", 1);
        assert!(serde_json::from_str::<Ensemble>(&tampered).is_err());
    }

    #[test]
    fn test_inconsistent_model_state_is_rejected_on_load() {
        let tags = TagSet::from_names(["A", "B", "C"]).unwrap();
        let variants = vec![variant("A", 0, 4, 3), variant("B", 1, 4, 3), variant("C", 2, 4, 3)];
        let ensemble = Ensemble::new(tags, 4, variants).unwrap();
        let value = serde_json::to_value(&ensemble).unwrap();
        assert!(serde_json::from_value::<Ensemble>(value.clone()).is_ok());

        let short = serde_json::json!({ "v": 1, "dim": [2], "data": [0.0, 0.0] });
        let mut narrow_scaler = value.clone();
        narrow_scaler["variants"]["A"]["model"]["features"]["mean"] = short.clone();
        narrow_scaler["variants"]["A"]["model"]["features"]["sum_squares"] = short;
        match serde_json::from_value::<Ensemble>(narrow_scaler) {
            Err(err) => assert!(err.to_string().contains("shape mismatch"), "{err}"),
            Ok(_) => panic!("narrow scaler accepted"),
        }

        let mut broken_layer = value;
        broken_layer["variants"]["B"]["model"]["net"]["layers"][0]["bias"] =
            serde_json::json!({ "v": 1, "dim": [1], "data": [0.0] });
        assert!(serde_json::from_value::<Ensemble>(broken_layer).is_err());
    }
}
