use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::error::TrainingFailure;

/// A learner mapping one `[T, C]` window to a `[P]` sensor vector.
pub trait SequenceModel {
    /// Channels per timestep the model consumes (C).
    fn input_width(&self) -> usize;

    /// Length of the predicted vector (P).
    fn output_width(&self) -> usize;

    /// Fit `[N, T, C]` inputs to `[N, P]` targets. On error the model is left unchanged.
    fn fit(
        &mut self,
        inputs: ArrayView3<'_, f64>,
        targets: ArrayView2<'_, f64>,
        config: &TrainingConfig,
        cancel: &CancelToken,
    ) -> Result<TrainingReport, TrainingFailure>;

    /// Predict a batch: `[N, T, C]` to `[N, P]`.
    fn infer_batch(&self, windows: ArrayView3<'_, f64>) -> Array2<f64>;

    /// Default: a batch of one.
    fn infer(&self, window: ArrayView2<'_, f64>) -> Array1<f64> {
        let batch = window.insert_axis(Axis(0));
        self.infer_batch(batch).index_axis_move(Axis(0), 0)
    }
}

/// Summary of one fit. Losses are mean squared errors on standardized targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub samples: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub epochs_run: usize,
    pub final_train_loss: f64,
    pub best_validation_loss: Option<f64>,
    pub stopped_early: bool,
}

/// Shared abort flag. Cancelling makes in-flight and pending fits return
/// [`TrainingFailure::Aborted`]; finished models are untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        assert!(!worker.is_cancelled());
        token.cancel();
        assert!(worker.is_cancelled());
    }
}
