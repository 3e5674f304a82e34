//! Per-variant reconstruction error and the anomaly verdict derived from it.
//!
//! # Reading the verdict
//!
//! `healthy_model` names the excluded tag whose variant reconstructs the
//! current state best, i.e. the sensor whose history the ensemble can most
//! easily do without. The name comes from the legacy detector and should not
//! be read as a diagnosis: it is neither a health certificate for that
//! sensor nor the faulty one. A variant blind to a faulty sensor cannot see
//! the fault, so under a single-sensor fault that variant tends to show the
//! largest error; [`AnomalyVerdict::suspect_ranking`] orders tags that way.
//! `confidence` is the mean error of the other variants divided by the best
//! error, unchanged from the legacy arithmetic: well above 1 means one
//! variant fits far better than the rest, near 1 means none stands out.

use std::collections::BTreeMap;

use ndarray::ArrayView2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ensemble::Ensemble;
use crate::error::{AnomalyError, Result};
use crate::window::ensure_finite;

/// Reconstruction error per excluded tag, in tag order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorVector {
    entries: Vec<(String, f64)>,
}

impl ErrorVector {
    pub fn new(entries: Vec<(String, f64)>) -> Self {
        ErrorVector { entries }
    }

    pub fn get(&self, tag: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == tag)
            .map(|(_, error)| *error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(name, error)| (name.as_str(), *error))
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.entries.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    /// Excluded tag of the best-fitting variant. See the module docs.
    pub healthy_model: String,
    pub confidence: f64,
    pub errors: ErrorVector,
}

impl AnomalyVerdict {
    pub fn is_anomalous(&self, threshold: f64) -> bool {
        self.confidence > threshold
    }

    pub fn min_error(&self) -> f64 {
        self.errors.get(&self.healthy_model).unwrap_or(0.0)
    }

    /// Tags by descending reconstruction error.
    pub fn suspect_ranking(&self) -> Vec<(&str, f64)> {
        let mut ranking: Vec<(&str, f64)> = self.errors.iter().collect();
        ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranking
    }
}

/// Owns a trained ensemble and scores windows against it.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    ensemble: Ensemble,
}

impl AnomalyScorer {
    pub fn new(ensemble: Ensemble) -> Self {
        AnomalyScorer { ensemble }
    }

    pub fn ensemble(&self) -> &Ensemble {
        &self.ensemble
    }

    pub fn into_inner(self) -> Ensemble {
        self.ensemble
    }

    pub fn errors(&self, window: ArrayView2<'_, f64>) -> Result<ErrorVector> {
        reconstruction_errors(&self.ensemble, window)
    }

    pub fn score(&self, window: ArrayView2<'_, f64>) -> Result<AnomalyVerdict> {
        score(&self.ensemble, window)
    }
}

/// MSE between each variant's prediction and the window's last row.
pub fn reconstruction_errors(ensemble: &Ensemble, window: ArrayView2<'_, f64>) -> Result<ErrorVector> {
    let expected = (ensemble.timesteps(), ensemble.sensors());
    if window.dim() != expected {
        return Err(AnomalyError::shape(
            format!("{expected:?}"),
            format!("{:?}", window.dim()),
        ));
    }
    ensure_finite(window.iter(), "current window")?;
    if ensemble.is_empty() {
        return Err(AnomalyError::IncompleteEnsemble {
            missing: ensemble.missing(),
        });
    }

    let target = window.row(window.nrows() - 1);
    let variants: Vec<_> = ensemble.variants().collect();
    let entries = variants
        .par_iter()
        .map(|variant| {
            let prediction = variant.predict(window)?;
            let error = (&prediction - &target).mapv(|d| d * d).mean().unwrap_or(0.0);
            Ok((variant.excluded().to_string(), error))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ErrorVector::new(entries))
}

/// Score one `[T, P]` window.
pub fn score(ensemble: &Ensemble, window: ArrayView2<'_, f64>) -> Result<AnomalyVerdict> {
    let errors = reconstruction_errors(ensemble, window)?;
    let verdict = verdict_from_errors(errors)?;
    debug!(
        healthy_model = %verdict.healthy_model,
        confidence = verdict.confidence,
        "window scored"
    );
    Ok(verdict)
}

/// Argmin and confidence over an error vector. Ties go to the earlier tag.
///
/// A best error of zero, or one so small that the ratio overflows, is a
/// [`AnomalyError::DegenerateError`].
pub fn verdict_from_errors(errors: ErrorVector) -> Result<AnomalyVerdict> {
    if errors.iter().any(|(_, e)| !e.is_finite() || e < 0.0) {
        return Err(AnomalyError::NonFinite("reconstruction error".to_string()));
    }

    let mut best: Option<(usize, f64)> = None;
    for (i, (_, error)) in errors.iter().enumerate() {
        if best.map_or(true, |(_, lowest)| error < lowest) {
            best = Some((i, error));
        }
    }
    let Some((best_index, min_error)) = best else {
        return Err(AnomalyError::IncompleteEnsemble {
            missing: Vec::new(),
        });
    };
    let healthy_model = errors.entries[best_index].0.clone();

    if min_error == 0.0 {
        return Err(AnomalyError::DegenerateError {
            tag: healthy_model,
            errors: errors.to_map(),
        });
    }

    let others: Vec<f64> = errors
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != best_index)
        .map(|(_, (_, error))| error)
        .collect();
    let confidence = if others.is_empty() {
        1.0
    } else {
        others.iter().sum::<f64>() / others.len() as f64 / min_error
    };
    if !confidence.is_finite() {
        return Err(AnomalyError::DegenerateError {
            tag: healthy_model,
            errors: errors.to_map(),
        });
    }

    Ok(AnomalyVerdict {
        healthy_model,
        confidence,
        errors,
    })
}
