//! In-memory data containers for recorded and loaded spectra.
//!
//! [`Matrix`] is a minimal row-major container used for the pre-allocated
//! measurement buffers: rows are frames, columns are spectral samples.
//! [`Dataset`] is the transposed view the fit workbench operates on: rows are
//! spectral-axis points and each column is one time slice.

use serde::{Deserialize, Serialize};

/// Row-major 2-D matrix of `f64` with NaN as the "missing" sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Allocate a matrix filled with NaN.
    pub fn filled_with_nan(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![f64::NAN; rows * cols],
        }
    }

    /// Build from a list of equally sized rows.
    ///
    /// Panics in debug builds when row lengths differ.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            debug_assert_eq!(row.len(), n_cols);
            data.extend(row);
        }
        Self {
            rows: n_rows,
            cols: n_cols,
            data,
        }
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Borrow one row.
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    /// Overwrite one row.
    pub fn set_row(&mut self, r: usize, values: &[f64]) {
        debug_assert_eq!(values.len(), self.cols);
        self.data[r * self.cols..(r + 1) * self.cols].copy_from_slice(values);
    }

    /// Copy one column out.
    pub fn column(&self, c: usize) -> Vec<f64> {
        (0..self.rows).map(|r| self.data[r * self.cols + c]).collect()
    }

    /// Single cell access.
    pub fn get(&self, r: usize, c: usize) -> f64 {
        self.data[r * self.cols + c]
    }

    /// Re-fill every cell with NaN.
    pub fn reset_to_nan(&mut self) {
        self.data.fill(f64::NAN);
    }

    /// True when every cell of row `r` is NaN.
    pub fn row_is_missing(&self, r: usize) -> bool {
        self.row(r).iter().all(|v| v.is_nan())
    }

    /// A copy keeping only the first `n` rows.
    pub fn truncated(&self, n: usize) -> Self {
        let n = n.min(self.rows);
        Self {
            rows: n,
            cols: self.cols,
            data: self.data[..n * self.cols].to_vec(),
        }
    }
}

/// One completed time-resolved measurement: raw and normalized frames plus
/// the elapsed-time vector, all sized `total_frames x array_size` at
/// creation and trimmed of unfilled trailing rows before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSeries {
    /// Raw frames, one row per recorded frame.
    pub raw: Matrix,
    /// Dark/bright-normalized frames, same shape as `raw`.
    pub normalized: Matrix,
    /// Elapsed seconds per recorded frame, rebased so `times[0] == 0`.
    pub times: Vec<f64>,
}

impl MeasurementSeries {
    /// Number of rows actually filled (leading non-missing rows).
    pub fn recorded_rows(&self) -> usize {
        self.times.iter().take_while(|t| !t.is_nan()).count()
    }

    /// Copy with unfilled trailing rows dropped.
    pub fn trimmed(&self) -> Self {
        let n = self.recorded_rows();
        Self {
            raw: self.raw.truncated(n),
            normalized: self.normalized.truncated(n),
            times: self.times[..n].to_vec(),
        }
    }
}

/// A 2-D dataset for the fit workbench: `axis` along rows, one column per
/// time slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Independent variable (wavelength in nm, or scattering vector).
    pub axis: Vec<f64>,
    /// Time (or frame label) of each column.
    pub times: Vec<f64>,
    /// `axis.len() x times.len()` matrix, one column per time slice.
    pub values: Matrix,
}

impl Dataset {
    /// Number of time slices.
    pub fn n_columns(&self) -> usize {
        self.times.len()
    }

    /// Extract one time slice as a dense vector.
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.values.column(index)
    }

    /// Build a dataset from a recorded series and its spectral axis.
    ///
    /// The series stores one row per frame; the dataset is its transpose.
    /// Unfilled trailing frames are dropped. `use_raw` selects the raw
    /// matrix instead of the normalized one.
    pub fn from_series(axis: Vec<f64>, series: &MeasurementSeries, use_raw: bool) -> Self {
        let series = series.trimmed();
        let frames = if use_raw { &series.raw } else { &series.normalized };
        let n_axis = axis.len();
        let n_slices = frames.rows();

        let mut values = Matrix::filled_with_nan(n_axis, n_slices);
        for (slice, time_row) in (0..n_slices).map(|r| (r, frames.row(r))) {
            for (i, v) in time_row.iter().enumerate() {
                if i < n_axis {
                    let row_start = i * n_slices;
                    values.data[row_start + slice] = *v;
                }
            }
        }

        Self {
            axis,
            times: series.times,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_rows_and_columns() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.column(2), vec![3.0, 6.0]);
        assert_eq!(m.get(0, 1), 2.0);
    }

    #[test]
    fn nan_fill_and_reset() {
        let mut m = Matrix::filled_with_nan(2, 2);
        assert!(m.row_is_missing(0));
        m.set_row(0, &[1.0, 2.0]);
        assert!(!m.row_is_missing(0));
        m.reset_to_nan();
        assert!(m.row_is_missing(0));
    }

    #[test]
    fn series_trims_unfilled_rows() {
        let mut raw = Matrix::filled_with_nan(4, 2);
        let mut normalized = Matrix::filled_with_nan(4, 2);
        raw.set_row(0, &[1.0, 2.0]);
        raw.set_row(1, &[3.0, 4.0]);
        normalized.set_row(0, &[0.1, 0.2]);
        normalized.set_row(1, &[0.3, 0.4]);
        let series = MeasurementSeries {
            raw,
            normalized,
            times: vec![0.0, 0.5, f64::NAN, f64::NAN],
        };

        assert_eq!(series.recorded_rows(), 2);
        let trimmed = series.trimmed();
        assert_eq!(trimmed.raw.rows(), 2);
        assert_eq!(trimmed.times, vec![0.0, 0.5]);
    }

    #[test]
    fn dataset_is_series_transpose() {
        let raw = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        let series = MeasurementSeries {
            normalized: raw.clone(),
            raw,
            times: vec![0.0, 1.0],
        };
        let dataset = Dataset::from_series(vec![500.0, 600.0, 700.0], &series, true);

        assert_eq!(dataset.n_columns(), 2);
        // Column 0 is the first frame, laid out along the spectral axis.
        assert_eq!(dataset.column(0), vec![1.0, 2.0, 3.0]);
        assert_eq!(dataset.column(1), vec![4.0, 5.0, 6.0]);
    }
}
