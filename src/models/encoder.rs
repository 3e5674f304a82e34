use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

/// Features extracted per channel.
pub const FEATURES_PER_CHANNEL: usize = 3;

/// Summarizes a `[T, C]` window as `[last; mean; slope]` per channel.
///
/// Output layout is `[last_0..last_C, mean_0..mean_C, slope_0..slope_C]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporalEncoder {
    channels: usize,
}

impl TemporalEncoder {
    pub fn new(channels: usize) -> Self {
        TemporalEncoder { channels }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn width(&self) -> usize {
        self.channels * FEATURES_PER_CHANNEL
    }

    pub fn encode(&self, window: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut features = Array1::zeros(self.width());
        self.encode_into(window, features.view_mut());
        features
    }

    /// `[N, T, C]` to `[N, 3C]`.
    pub fn encode_batch(&self, windows: ArrayView3<'_, f64>) -> Array2<f64> {
        let mut features = Array2::zeros((windows.len_of(Axis(0)), self.width()));
        for (window, row) in windows.outer_iter().zip(features.outer_iter_mut()) {
            self.encode_into(window, row);
        }
        features
    }

    fn encode_into(&self, window: ArrayView2<'_, f64>, mut out: ndarray::ArrayViewMut1<'_, f64>) {
        let c = self.channels;
        for (channel, column) in window.axis_iter(Axis(1)).enumerate().take(c) {
            out[channel] = column[column.len() - 1];
            out[c + channel] = column.mean().unwrap_or(0.0);
            out[2 * c + channel] = slope(column);
        }
    }
}

/// Least-squares slope per timestep. Zero for a single-step window.
fn slope(column: ArrayView1<'_, f64>) -> f64 {
    let n = column.len();
    if n < 2 {
        return 0.0;
    }
    let t_mean = (n - 1) as f64 / 2.0;
    let x_mean = column.mean().unwrap_or(0.0);
    let mut num = 0.0;
    let mut den = 0.0;
    for (t, &x) in column.iter().enumerate() {
        let dt = t as f64 - t_mean;
        num += dt * (x - x_mean);
        den += dt * dt;
    }
    num / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_encode_last_mean_slope() {
        let window = array![[1.0, 5.0], [3.0, 5.0], [5.0, 5.0]];
        let features = TemporalEncoder::new(2).encode(window.view());
        assert_eq!(features, array![5.0, 5.0, 3.0, 5.0, 2.0, 0.0]);
    }

    #[test]
    fn test_single_step_has_zero_slope() {
        let window = array![[4.0, -1.0]];
        let features = TemporalEncoder::new(2).encode(window.view());
        assert_eq!(features, array![4.0, -1.0, 4.0, -1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_batch_matches_single() {
        let windows = Array3::from_shape_fn((4, 3, 2), |(n, t, c)| (n * t + c) as f64);
        let encoder = TemporalEncoder::new(2);
        let batch = encoder.encode_batch(windows.view());
        for (i, window) in windows.outer_iter().enumerate() {
            assert_eq!(batch.row(i), encoder.encode(window));
        }
    }
}
