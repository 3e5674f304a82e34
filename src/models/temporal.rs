use linfa::prelude::*;
use linfa::Dataset;
use ndarray::{Array2, ArrayView2, ArrayView3, Axis, Ix2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::TrainingConfig;
use crate::error::TrainingFailure;
use crate::models::encoder::TemporalEncoder;
use crate::models::network::{mse, mse_with_grad, Mlp};
use crate::models::optim::Adam;
use crate::models::sequence::{CancelToken, SequenceModel, TrainingReport};
use crate::utils::scaler::StandardScaler;

const SHUFFLE_SALT: u64 = 0x5DEE_CE66_D1CE_F00D;

/// Window regressor: temporal summary features, then a small dense network.
///
/// Features and targets are standardized with statistics of the training
/// split; predictions are returned in the original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalRegressor {
    encoder: TemporalEncoder,
    output_width: usize,
    hidden: Vec<usize>,
    seed: u64,
    net: Mlp,
    features: StandardScaler,
    targets: StandardScaler,
}

impl TemporalRegressor {
    pub fn new(input_width: usize, output_width: usize, hidden: &[usize], seed: u64) -> Self {
        let encoder = TemporalEncoder::new(input_width);
        let mut rng = StdRng::seed_from_u64(seed);
        let net = Mlp::new(encoder.width(), hidden, output_width, &mut rng);
        TemporalRegressor {
            encoder,
            output_width,
            hidden: hidden.to_vec(),
            seed,
            net,
            features: StandardScaler::new(encoder.width()),
            targets: StandardScaler::new(output_width),
        }
    }

    /// Scaler widths and layer shapes agree with the encoder and output width.
    pub fn validate(&self) -> crate::error::Result<()> {
        let width = self.encoder.width();
        self.features.check_width_state(width)?;
        self.targets.check_width_state(self.output_width)?;
        self.net.check_dimensions(width, self.output_width)
    }

    pub fn network(&self) -> &Mlp {
        &self.net
    }

    fn standardized(&self, features: ArrayView2<'_, f64>) -> Array2<f64> {
        self.features.scale_rows(features)
    }
}

impl SequenceModel for TemporalRegressor {
    fn input_width(&self) -> usize {
        self.encoder.channels()
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn fit(
        &mut self,
        inputs: ArrayView3<'_, f64>,
        targets: ArrayView2<'_, f64>,
        config: &TrainingConfig,
        cancel: &CancelToken,
    ) -> Result<TrainingReport, TrainingFailure> {
        debug_assert_eq!(inputs.len_of(Axis(2)), self.encoder.channels());
        debug_assert_eq!(targets.ncols(), self.output_width);

        let samples = inputs.len_of(Axis(0));
        if samples == 0 || targets.nrows() != samples {
            return Err(TrainingFailure::EmptyTrainingSet);
        }

        // Keras-style split: the trailing fraction is held out, no shuffling.
        let dataset: Dataset<f64, f64, Ix2> =
            Dataset::new(self.encoder.encode_batch(inputs), targets.to_owned());
        let (train, valid) = dataset.split_with_ratio(1.0 - config.validation_split as f32);
        let train_samples = train.nsamples();
        let validation_samples = valid.nsamples();
        if train_samples == 0 {
            return Err(TrainingFailure::EmptyTrainingSet);
        }

        let feature_scaler = StandardScaler::fit(train.records().view())
            .map_err(|_| TrainingFailure::NonFiniteInput)?;
        let target_scaler = StandardScaler::fit(train.targets().view())
            .map_err(|_| TrainingFailure::NonFiniteInput)?;
        if valid.records().iter().chain(valid.targets().iter()).any(|v| !v.is_finite()) {
            return Err(TrainingFailure::NonFiniteInput);
        }

        let x_train = feature_scaler.scale_rows(train.records().view());
        let y_train = target_scaler.scale_rows(train.targets().view());
        let x_valid = feature_scaler.scale_rows(valid.records().view());
        let y_valid = target_scaler.scale_rows(valid.targets().view());

        let mut init_rng = StdRng::seed_from_u64(self.seed);
        let mut net = Mlp::new(self.encoder.width(), &self.hidden, self.output_width, &mut init_rng);
        let mut adam = Adam::new(&net, config.learning_rate);
        let mut shuffle_rng = StdRng::seed_from_u64(self.seed ^ SHUFFLE_SALT);

        let mut order: Vec<usize> = (0..train_samples).collect();
        let mut best: Option<(f64, Mlp)> = None;
        let mut waited = 0;
        let mut epochs_run = 0;
        let mut final_train_loss = f64::NAN;
        let mut stopped_early = false;

        for epoch in 1..=config.epochs {
            order.shuffle(&mut shuffle_rng);
            let mut epoch_loss = 0.0;

            for batch in order.chunks(config.batch_size) {
                if cancel.is_cancelled() {
                    return Err(TrainingFailure::Aborted);
                }
                let x = x_train.select(Axis(0), batch);
                let y = y_train.select(Axis(0), batch);

                let cache = net.forward(x.view());
                let (loss, grad) = mse_with_grad(cache.output(), y.view());
                let grads = net.backward(&cache, grad);
                adam.apply(&mut net, &grads);
                epoch_loss += loss * batch.len() as f64;
            }

            epoch_loss /= train_samples as f64;
            epochs_run = epoch;
            final_train_loss = epoch_loss;
            if !epoch_loss.is_finite() {
                return Err(TrainingFailure::Diverged { epoch });
            }

            if validation_samples == 0 {
                trace!(epoch, loss = epoch_loss, "epoch done");
                continue;
            }

            let val_loss = mse(&net.predict(x_valid.view()), y_valid.view());
            if !val_loss.is_finite() {
                return Err(TrainingFailure::Diverged { epoch });
            }
            trace!(epoch, loss = epoch_loss, val_loss, "epoch done");

            let improved = best
                .as_ref()
                .map_or(true, |(best_loss, _)| val_loss < *best_loss);
            if improved {
                best = Some((val_loss, net.clone()));
                waited = 0;
            } else {
                waited += 1;
                if config.patience > 0 && waited >= config.patience {
                    stopped_early = true;
                    break;
                }
            }
        }

        let best_validation_loss = match best {
            Some((loss, best_net)) => {
                net = best_net;
                Some(loss)
            }
            None => None,
        };

        self.net = net;
        self.features = feature_scaler;
        self.targets = target_scaler;

        Ok(TrainingReport {
            samples,
            train_samples,
            validation_samples,
            epochs_run,
            final_train_loss,
            best_validation_loss,
            stopped_early,
        })
    }

    fn infer_batch(&self, windows: ArrayView3<'_, f64>) -> Array2<f64> {
        let features = self.encoder.encode_batch(windows);
        let scaled = self.net.predict(self.standardized(features.view()).view());
        self.targets.unscale_rows(scaled.view())
    }
}
