//! Sliding windows and leave-one-sensor-out views of them.
//!
//! A window is `[T, P]`; its target is its own last row. A partial window
//! drops one sensor column and is always paired with the full target.

use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{AnomalyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBuilder {
    timesteps: usize,
}

impl WindowBuilder {
    pub fn new(timesteps: usize) -> Result<Self> {
        if timesteps == 0 {
            return Err(AnomalyError::invalid_config("window length must be positive"));
        }
        Ok(WindowBuilder { timesteps })
    }

    pub fn timesteps(&self) -> usize {
        self.timesteps
    }

    /// Every stride-1 window of a gap-free `[L, P]` series: `L - T + 1` of them.
    pub fn build(&self, series: ArrayView2<'_, f64>) -> Result<WindowSet> {
        let (rows, sensors) = series.dim();
        if sensors == 0 {
            return Err(AnomalyError::shape("at least one sensor column", "0 columns"));
        }
        if rows < self.timesteps {
            return Err(AnomalyError::InsufficientData {
                rows,
                timesteps: self.timesteps,
            });
        }
        ensure_finite(series.iter(), "series")?;

        let count = rows - self.timesteps + 1;
        let mut windows = Array3::zeros((count, self.timesteps, sensors));
        for (i, mut slot) in windows.outer_iter_mut().enumerate() {
            slot.assign(&series.slice(s![i..i + self.timesteps, ..]));
        }
        let targets = last_step_targets(windows.view());

        Ok(WindowSet { windows, targets })
    }
}

/// Windows `[N, T, P]` with their last-row targets `[N, P]`.
#[derive(Debug, Clone)]
pub struct WindowSet {
    windows: Array3<f64>,
    targets: Array2<f64>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.windows.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn windows(&self) -> ArrayView3<'_, f64> {
        self.windows.view()
    }

    pub fn targets(&self) -> ArrayView2<'_, f64> {
        self.targets.view()
    }

    pub fn window(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.len()).then(|| self.windows.index_axis(Axis(0), index))
    }

    pub fn into_windows(self) -> Array3<f64> {
        self.windows
    }
}

/// Copy of `window` without column `excluded`: `[T, P]` to `[T, P-1]`.
pub fn partial_window(window: ArrayView2<'_, f64>, excluded: usize) -> Result<Array2<f64>> {
    check_column(window.ncols(), excluded)?;
    let keep: Vec<usize> = (0..window.ncols()).filter(|&c| c != excluded).collect();
    Ok(window.select(Axis(1), &keep))
}

/// Reinsert a constant column at `excluded`: `[T, P-1]` back to `[T, P]`.
pub fn restore_column(partial: ArrayView2<'_, f64>, excluded: usize, fill: f64) -> Result<Array2<f64>> {
    let (rows, cols) = partial.dim();
    check_column(cols + 1, excluded)?;
    let mut full = Array2::from_elem((rows, cols + 1), fill);
    full.slice_mut(s![.., ..excluded])
        .assign(&partial.slice(s![.., ..excluded]));
    full.slice_mut(s![.., excluded + 1..])
        .assign(&partial.slice(s![.., excluded..]));
    Ok(full)
}

/// `[N, T, P]` to `[N, T, P-1]` without sensor `excluded`.
pub fn partial_batch(windows: ArrayView3<'_, f64>, excluded: usize) -> Result<Array3<f64>> {
    let sensors = windows.len_of(Axis(2));
    check_column(sensors, excluded)?;
    let keep: Vec<usize> = (0..sensors).filter(|&c| c != excluded).collect();
    Ok(windows.select(Axis(2), &keep))
}

/// The full last-timestep vector of every window: `[N, T, P]` to `[N, P]`.
pub fn last_step_targets(windows: ArrayView3<'_, f64>) -> Array2<f64> {
    let last = windows.len_of(Axis(1)).saturating_sub(1);
    windows.index_axis(Axis(1), last).to_owned()
}

pub(crate) fn ensure_finite<'a, I>(values: I, what: &str) -> Result<()>
where
    I: IntoIterator<Item = &'a f64>,
{
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(AnomalyError::NonFinite(what.to_string()));
    }
    Ok(())
}

fn check_column(sensors: usize, excluded: usize) -> Result<()> {
    if sensors < 2 {
        return Err(AnomalyError::shape(
            "at least 2 sensors to leave one out",
            format!("{sensors} sensors"),
        ));
    }
    if excluded >= sensors {
        return Err(AnomalyError::shape(
            format!("sensor index < {sensors}"),
            format!("index {excluded}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    fn ramp(rows: usize, sensors: usize) -> Array2<f64> {
        Array::from_shape_fn((rows, sensors), |(r, c)| (r * 10 + c) as f64)
    }

    #[test]
    fn test_window_count_and_targets() {
        let series = ramp(6, 3);
        let set = WindowBuilder::new(4).unwrap().build(series.view()).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.windows().dim(), (3, 4, 3));
        assert_eq!(set.targets().row(0), series.row(3));
        assert_eq!(set.targets().row(2), series.row(5));
        assert_eq!(set.window(1).unwrap().row(0), series.row(1));
        assert!(set.window(3).is_none());
    }

    #[test]
    fn test_short_series_is_insufficient() {
        let series = ramp(299, 2);
        let err = WindowBuilder::new(300).unwrap().build(series.view()).unwrap_err();
        assert!(matches!(
            err,
            AnomalyError::InsufficientData {
                rows: 299,
                timesteps: 300
            }
        ));
    }

    #[test]
    fn test_zero_timesteps_rejected() {
        assert!(WindowBuilder::new(0).is_err());
    }

    #[test]
    fn test_nan_in_series_rejected() {
        let mut series = ramp(5, 2);
        series[[2, 1]] = f64::NAN;
        let err = WindowBuilder::new(2).unwrap().build(series.view()).unwrap_err();
        assert!(matches!(err, AnomalyError::NonFinite(_)));
    }

    #[test]
    fn test_partial_window_drops_one_column() {
        let window = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let partial = partial_window(window.view(), 1).unwrap();
        assert_eq!(partial, array![[1.0, 3.0], [4.0, 6.0]]);

        let restored = restore_column(partial.view(), 1, 0.0).unwrap();
        assert_eq!(restored, array![[1.0, 0.0, 3.0], [4.0, 0.0, 6.0]]);

        assert!(partial_window(window.view(), 3).is_err());
    }

    #[test]
    fn test_single_timestep_window() {
        let window = array![[1.0, 2.0, 3.0]];
        let partial = partial_window(window.view(), 0).unwrap();
        assert_eq!(partial.dim(), (1, 2));

        let set = WindowBuilder::new(1).unwrap().build(window.view()).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.targets().row(0), window.row(0));
    }

    #[test]
    fn test_partial_batch_keeps_full_targets() {
        let set = WindowBuilder::new(2).unwrap().build(ramp(4, 3).view()).unwrap();
        let partial = partial_batch(set.windows(), 2).unwrap();
        let targets = last_step_targets(set.windows());

        assert_eq!(partial.dim(), (3, 2, 2));
        assert_eq!(targets.dim(), (3, 3));
        assert_eq!(targets[[0, 2]], 12.0);
    }
}
