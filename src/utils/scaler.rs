use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};

/// Per-sensor z-score scaling with running (Welford) mean and variance.
///
/// Columns with zero variance are divided by 1 so constant sensors map to 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    num_items: usize,
    mean: Array1<f64>,
    sum_squares: Array1<f64>,
}

impl StandardScaler {
    pub fn new(num_sensors: usize) -> Self {
        StandardScaler {
            num_items: 0,
            mean: Array1::zeros(num_sensors),
            sum_squares: Array1::zeros(num_sensors),
        }
    }

    /// Fit on a `[rows, sensors]` series.
    pub fn fit(series: ArrayView2<'_, f64>) -> Result<Self> {
        if series.nrows() == 0 {
            return Err(AnomalyError::InsufficientData {
                rows: 0,
                timesteps: 1,
            });
        }
        let mut scaler = StandardScaler::new(series.ncols());
        for row in series.outer_iter() {
            scaler.update(row)?;
        }
        Ok(scaler)
    }

    /// Incorporate one sensor vector.
    pub fn update(&mut self, x: ArrayView1<'_, f64>) -> Result<()> {
        if x.len() != self.mean.len() {
            return Err(AnomalyError::shape(
                format!("[{}]", self.mean.len()),
                format!("[{}]", x.len()),
            ));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(AnomalyError::NonFinite("scaler input".to_string()));
        }

        self.num_items += 1;
        let n = self.num_items as f64;
        for (i, &item) in x.iter().enumerate() {
            let old_mean = self.mean[i];
            self.mean[i] += (item - old_mean) / n;
            self.sum_squares[i] += (item - old_mean) * (item - self.mean[i]);
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    /// Both statistics cover exactly `width` sensors.
    pub(crate) fn check_width_state(&self, width: usize) -> Result<()> {
        if self.mean.len() != width || self.sum_squares.len() != width {
            return Err(AnomalyError::shape(
                format!("scaler over {width} columns"),
                format!(
                    "mean of {}, sum of squares of {}",
                    self.mean.len(),
                    self.sum_squares.len()
                ),
            ));
        }
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.num_items
    }

    pub fn mean(&self) -> ArrayView1<'_, f64> {
        self.mean.view()
    }

    /// Population standard deviation, with zeros replaced by 1.
    pub fn scale(&self) -> Array1<f64> {
        let n = self.num_items.max(1) as f64;
        self.sum_squares.mapv(|ss| {
            let std = (ss / n).sqrt();
            if std <= f64::EPSILON {
                1.0
            } else {
                std
            }
        })
    }

    pub fn transform(&self, series: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(series.ncols())?;
        Ok(self.scale_rows(series))
    }

    pub fn inverse_transform(&self, series: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        self.check_width(series.ncols())?;
        Ok(self.unscale_rows(series))
    }

    /// `transform` without the width check; callers guarantee the shape.
    pub(crate) fn scale_rows(&self, series: ArrayView2<'_, f64>) -> Array2<f64> {
        (&series - &self.mean) / &self.scale()
    }

    pub(crate) fn unscale_rows(&self, series: ArrayView2<'_, f64>) -> Array2<f64> {
        &series * &self.scale() + &self.mean
    }

    /// Scale a `[samples, T, sensors]` window tensor.
    pub fn transform_windows(&self, windows: ArrayView3<'_, f64>) -> Result<Array3<f64>> {
        self.check_width(windows.len_of(Axis(2)))?;
        Ok((&windows - &self.mean) / &self.scale())
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width != self.mean.len() {
            return Err(AnomalyError::shape(
                format!("{} sensors", self.mean.len()),
                format!("{width} sensors"),
            ));
        }
        Ok(())
    }
}
