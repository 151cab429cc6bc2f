//! Parallel batch-fit engine.
//!
//! [`fit_range`] dispatches one fit task per column of the dataset and
//! aggregates the results as they arrive, in whatever order the workers
//! finish. All tasks are issued up front, but a semaphore sized to the
//! machine's parallelism bounds how many occupy blocking-pool threads at a
//! time. Completion is detected by count, never by pool exhaustion: the
//! batch is done exactly when every column in the range has been merged.
//! A single column's failure is recorded in the table, not propagated.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::dataset::Dataset;
use crate::error::{AppResult, SpectraError};
use crate::fit::model::{FitModelSpec, MixtureModel};
use crate::fit::solver;

/// Fitted parameters of one column.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Column (time slice) index in the dataset.
    pub column: usize,
    /// Qualified parameter name to fitted value.
    pub values: BTreeMap<String, f64>,
    /// Goodness of fit.
    pub r_squared: f64,
}

/// Per-column outcome: a fit or a recorded failure.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnOutcome {
    /// The column converged.
    Fitted(FitResult),
    /// The column failed; the message says why.
    Failed(String),
}

/// Progress event, one per merged column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FitProgress {
    /// Column just merged.
    pub column: usize,
    /// Columns merged so far.
    pub completed: usize,
    /// Columns in the batch.
    pub total: usize,
}

/// Ordered batch result: one outcome per column, ascending by index.
#[derive(Debug, Clone, Default)]
pub struct FitTable {
    columns: BTreeMap<usize, ColumnOutcome>,
}

impl FitTable {
    /// Merge one arriving outcome. Keyed by column index, so arrival order
    /// is irrelevant; a duplicate column keeps the first outcome.
    pub fn merge(&mut self, column: usize, outcome: ColumnOutcome) {
        self.columns.entry(column).or_insert(outcome);
    }

    /// Columns merged so far.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether nothing has been merged.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Outcome of one column.
    pub fn get(&self, column: usize) -> Option<&ColumnOutcome> {
        self.columns.get(&column)
    }

    /// Iterate outcomes in ascending column order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &ColumnOutcome)> {
        self.columns.iter().map(|(c, o)| (*c, o))
    }

    /// Successfully fitted columns only, ascending.
    pub fn fitted(&self) -> impl Iterator<Item = &FitResult> {
        self.columns.values().filter_map(|o| match o {
            ColumnOutcome::Fitted(result) => Some(result),
            ColumnOutcome::Failed(_) => None,
        })
    }

    /// Number of recorded failures.
    pub fn failed_count(&self) -> usize {
        self.columns
            .values()
            .filter(|o| matches!(o, ColumnOutcome::Failed(_)))
            .count()
    }
}

/// Concurrent fits allowed at a time: one per hardware thread.
fn worker_permits() -> usize {
    std::thread::available_parallelism().map_or(1, usize::from)
}

/// Fit the mixture model independently to every column in `[start, end]`.
///
/// At most one fit per hardware thread runs at a time; results merge in
/// arrival order into a column-indexed table. The table is returned exactly
/// once, when the merged count equals the batch size.
pub async fn fit_range(
    dataset: Arc<Dataset>,
    start: usize,
    end: usize,
    spec: &FitModelSpec,
    progress: Option<mpsc::UnboundedSender<FitProgress>>,
) -> AppResult<FitTable> {
    fit_range_bounded(dataset, start, end, spec, progress, worker_permits()).await
}

/// [`fit_range`] with an explicit bound on concurrent fits.
async fn fit_range_bounded(
    dataset: Arc<Dataset>,
    start: usize,
    end: usize,
    spec: &FitModelSpec,
    progress: Option<mpsc::UnboundedSender<FitProgress>>,
    max_in_flight: usize,
) -> AppResult<FitTable> {
    if start > end {
        return Err(SpectraError::Fit(format!(
            "invalid column range {start}..={end}"
        )));
    }
    if end >= dataset.n_columns() {
        return Err(SpectraError::Fit(format!(
            "column {end} out of range, dataset has {} columns",
            dataset.n_columns()
        )));
    }
    let total = end - start + 1;
    info!(start, end, total, "batch fit dispatched");

    let semaphore = Arc::new(Semaphore::new(max_in_flight.max(1)));
    let (tx, mut rx) = mpsc::unbounded_channel();
    for column in start..=end {
        let dataset = Arc::clone(&dataset);
        let spec = spec.clone();
        let tx = tx.clone();
        let semaphore = Arc::clone(&semaphore);
        tokio::spawn(async move {
            // Holds a permit for the duration of the blocking fit, so at
            // most `max_in_flight` columns occupy blocking threads at once.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let outcome =
                match tokio::task::spawn_blocking(move || fit_column(&dataset, column, &spec))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => ColumnOutcome::Failed(format!("fit task panicked: {err}")),
                };
            let _ = tx.send((column, outcome));
        });
    }
    drop(tx);

    let mut table = FitTable::default();
    while let Some((column, outcome)) = rx.recv().await {
        if let ColumnOutcome::Failed(reason) = &outcome {
            warn!(column, reason, "column fit failed");
        }
        table.merge(column, outcome);
        debug!(column, merged = table.len(), total, "column merged");
        if let Some(tx) = &progress {
            let _ = tx.send(FitProgress {
                column,
                completed: table.len(),
                total,
            });
        }
        if table.len() == total {
            break;
        }
    }

    if table.len() < total {
        return Err(SpectraError::Fit(format!(
            "fit workers exited after {} of {total} columns",
            table.len()
        )));
    }
    info!(total, failed = table.failed_count(), "batch fit complete");
    Ok(table)
}

/// Fit one column; errors become a recorded failure, never a panic.
fn fit_column(dataset: &Dataset, column: usize, spec: &FitModelSpec) -> ColumnOutcome {
    let x = &dataset.axis;
    let y = dataset.column(column);

    let fitted = MixtureModel::compile(spec, x, &y)
        .and_then(|model| solver::fit(&model, x, &y).map(|outcome| (model, outcome)));
    match fitted {
        Ok((model, outcome)) => {
            let values = model
                .parameter_names()
                .into_iter()
                .zip(outcome.values)
                .collect();
            ColumnOutcome::Fitted(FitResult {
                column,
                values,
                r_squared: outcome.r_squared,
            })
        }
        Err(err) => ColumnOutcome::Failed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Matrix;
    use crate::fit::model::{ModelKind, ModelTerm, PeakShape};

    fn gaussian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
        amplitude / (sigma * (2.0 * std::f64::consts::PI).sqrt())
            * (-(x - center).powi(2) / (2.0 * sigma * sigma)).exp()
    }

    fn gaussian_spec() -> FitModelSpec {
        FitModelSpec {
            terms: vec![ModelTerm {
                prefix: "g1_".into(),
                kind: ModelKind::Peak(PeakShape::Gaussian),
                initial: BTreeMap::new(),
                center_fixed: false,
            }],
        }
    }

    /// 10-column dataset: column `c` is a Gaussian centered at `500 + 10c`.
    fn gaussian_dataset() -> Dataset {
        let axis: Vec<f64> = (0..300).map(|i| 400.0 + i as f64).collect();
        let n_cols = 10;
        let mut values = Matrix::filled_with_nan(axis.len(), n_cols);
        for (r, &x) in axis.iter().enumerate() {
            let row: Vec<f64> = (0..n_cols)
                .map(|c| gaussian(x, 5_000.0, 500.0 + 10.0 * c as f64, 12.0))
                .collect();
            values.set_row(r, &row);
        }
        Dataset {
            axis,
            times: (0..n_cols).map(|c| c as f64).collect(),
            values,
        }
    }

    #[test]
    fn table_orders_columns_regardless_of_arrival() {
        let mut table = FitTable::default();
        for column in [7usize, 2, 9, 0, 4] {
            table.merge(column, ColumnOutcome::Failed("placeholder".into()));
        }
        let order: Vec<usize> = table.iter().map(|(c, _)| c).collect();
        assert_eq!(order, vec![0, 2, 4, 7, 9]);
    }

    #[test]
    fn duplicate_merge_keeps_the_first_outcome() {
        let mut table = FitTable::default();
        table.merge(3, ColumnOutcome::Failed("first".into()));
        table.merge(3, ColumnOutcome::Failed("second".into()));
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get(3),
            Some(&ColumnOutcome::Failed("first".into()))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn recovers_known_gaussians_across_all_columns() {
        let dataset = Arc::new(gaussian_dataset());
        let table = fit_range(Arc::clone(&dataset), 0, 9, &gaussian_spec(), None)
            .await
            .expect("batch");

        assert_eq!(table.len(), 10);
        assert_eq!(table.failed_count(), 0);
        let columns: Vec<usize> = table.iter().map(|(c, _)| c).collect();
        assert_eq!(columns, (0..10).collect::<Vec<_>>());

        for result in table.fitted() {
            assert!(result.r_squared > 0.99, "column {}", result.column);
            let center = result.values["g1_center"];
            let expected = 500.0 + 10.0 * result.column as f64;
            assert!((center - expected).abs() < 0.5, "column {}", result.column);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_column_failure_does_not_abort_the_batch() {
        let mut dataset = gaussian_dataset();
        // Poison column 5 with NaN.
        for r in 0..dataset.axis.len() {
            let mut row = dataset.values.row(r).to_vec();
            row[5] = f64::NAN;
            dataset.values.set_row(r, &row);
        }

        let table = fit_range(Arc::new(dataset), 0, 9, &gaussian_spec(), None)
            .await
            .expect("batch");
        assert_eq!(table.len(), 10);
        assert_eq!(table.failed_count(), 1);
        assert!(matches!(table.get(5), Some(ColumnOutcome::Failed(_))));
        assert!(matches!(table.get(4), Some(ColumnOutcome::Fitted(_))));
    }

    #[tokio::test]
    async fn progress_is_reported_per_column() {
        let dataset = Arc::new(gaussian_dataset());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = fit_range(dataset, 2, 5, &gaussian_spec(), Some(tx))
            .await
            .expect("batch");
        assert_eq!(table.len(), 4);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        // Completed counts grow monotonically even if columns arrive
        // out of order.
        let completed: Vec<usize> = events.iter().map(|e| e.completed).collect();
        assert_eq!(completed, vec![1, 2, 3, 4]);
        assert!(events.iter().all(|e| e.total == 4));
        assert!(events.iter().all(|e| (2..=5).contains(&e.column)));
    }

    #[tokio::test]
    async fn in_flight_bound_serializes_column_completion() {
        // On a current-thread runtime tasks enqueue on the fair semaphore
        // in dispatch order, so a single permit hands columns to the
        // blocking pool one at a time and completions arrive ascending.
        let dataset = Arc::new(gaussian_dataset());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let table = fit_range_bounded(dataset, 0, 9, &gaussian_spec(), Some(tx), 1)
            .await
            .expect("batch");
        assert_eq!(table.len(), 10);

        let mut columns = Vec::new();
        while let Ok(event) = rx.try_recv() {
            columns.push(event.column);
        }
        assert_eq!(columns, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn out_of_range_request_is_rejected() {
        let dataset = Arc::new(gaussian_dataset());
        let result = fit_range(dataset, 0, 10, &gaussian_spec(), None).await;
        assert!(matches!(result, Err(SpectraError::Fit(_))));
    }
}
