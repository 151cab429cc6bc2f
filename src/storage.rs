//! CSV persistence for measurement series and fit tables.
//!
//! Series files carry the metadata block as `# `-prefixed pretty-JSON header
//! lines, followed by one CSV row per spectral-axis point: the wavelength,
//! the dark/bright references when applied, and one column per recorded time
//! slice. Fit tables are one row per time slice, one column per qualified
//! parameter plus the goodness of fit.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::{Dataset, Matrix, MeasurementSeries};
use crate::error::{AppResult, SpectraError};
use crate::fit::engine::{ColumnOutcome, FitTable};
use crate::fit::model::FitModelSpec;
use crate::metadata::Metadata;
use crate::spectra_math::NormalizationState;

/// File name for one series: `<sample>_<timestamp>.csv`.
pub fn series_file_name(sample: &str) -> String {
    let stem = if sample.is_empty() { "series" } else { sample };
    format!("{}_{}.csv", stem, chrono::Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Persist a recorded series under `dir`, creating it if needed.
///
/// The normalized matrix is written; the applied references travel along as
/// their own columns so the raw signal stays recoverable.
pub fn save_series(
    dir: &Path,
    metadata: &Metadata,
    wavelengths: &[f64],
    series: &MeasurementSeries,
    normalization: &NormalizationState,
) -> AppResult<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    let path = dir.join(series_file_name(&metadata.sample));
    let series = series.trimmed();

    let mut file = BufWriter::new(File::create(&path)?);
    let json = serde_json::to_string_pretty(metadata)
        .map_err(|e| SpectraError::Storage(e.to_string()))?;
    for line in json.lines() {
        writeln!(file, "# {line}")?;
    }

    let mut writer = csv::Writer::from_writer(file);
    let mut header = vec!["wavelength_nm".to_string()];
    if normalization.has_dark() {
        header.push("dark".to_string());
    }
    if normalization.has_bright() {
        header.push("bright".to_string());
    }
    for t in &series.times {
        header.push(format!("{t:.6}"));
    }
    writer.write_record(&header)?;

    for (i, wavelength) in wavelengths.iter().enumerate() {
        let mut record = vec![wavelength.to_string()];
        if normalization.has_dark() {
            record.push(normalization.dark()[i].to_string());
        }
        if normalization.has_bright() {
            record.push(normalization.bright()[i].to_string());
        }
        for r in 0..series.normalized.rows() {
            record.push(series.normalized.get(r, i).to_string());
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), slices = series.times.len(), "series saved");
    Ok(path)
}

/// Load a series file back as a fit-ready dataset, with its metadata block
/// when one is present.
pub fn load_series(path: &Path) -> AppResult<(Option<Metadata>, Dataset)> {
    let content = std::fs::read_to_string(path)?;

    let mut json = String::new();
    let mut body = String::new();
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("# ") {
            json.push_str(rest);
            json.push('\n');
        } else if !line.trim().is_empty() {
            body.push_str(line);
            body.push('\n');
        }
    }
    let metadata = if json.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str(&json)
                .map_err(|e| SpectraError::Storage(format!("bad metadata header: {e}")))?,
        )
    };

    let mut reader = csv::Reader::from_reader(body.as_bytes());
    let headers = reader
        .headers()
        .map_err(SpectraError::Csv)?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    if headers.first().map(String::as_str) != Some("wavelength_nm") {
        return Err(SpectraError::Storage(format!(
            "{} is not a series file",
            path.display()
        )));
    }

    // Reference columns sit between the axis and the time slices.
    let first_slice = 1
        + usize::from(headers.get(1).map(String::as_str) == Some("dark"))
        + usize::from(
            headers
                .iter()
                .skip(1)
                .take(2)
                .any(|h| h == "bright"),
        );
    let times: Vec<f64> = headers[first_slice..]
        .iter()
        .map(|h| {
            h.parse::<f64>()
                .map_err(|_| SpectraError::Storage(format!("bad time column label '{h}'")))
        })
        .collect::<AppResult<_>>()?;

    let mut axis = Vec::new();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let parse = |field: &str| {
            field
                .parse::<f64>()
                .map_err(|_| SpectraError::Storage(format!("bad numeric field '{field}'")))
        };
        axis.push(parse(&record[0])?);
        let row: Vec<f64> = record
            .iter()
            .skip(first_slice)
            .map(parse)
            .collect::<AppResult<_>>()?;
        if row.len() != times.len() {
            return Err(SpectraError::Storage(format!(
                "row {} has {} slices, expected {}",
                axis.len(),
                row.len(),
                times.len()
            )));
        }
        rows.push(row);
    }

    Ok((
        metadata,
        Dataset {
            axis,
            times,
            values: Matrix::from_rows(rows),
        },
    ))
}

/// Persist a batch-fit table: one row per time slice, one column per
/// qualified parameter plus R². Failed columns carry NaN values.
pub fn save_fit_table(path: &Path, spec: &FitModelSpec, table: &FitTable) -> AppResult<()> {
    let names = spec.qualified_names();
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["slice".to_string()];
    header.extend(names.iter().cloned());
    header.push("r_squared".to_string());
    writer.write_record(&header)?;

    for (column, outcome) in table.iter() {
        let mut record = vec![column.to_string()];
        match outcome {
            ColumnOutcome::Fitted(result) => {
                for name in &names {
                    let value = result.values.get(name).copied().unwrap_or(f64::NAN);
                    record.push(value.to_string());
                }
                record.push(result.r_squared.to_string());
            }
            ColumnOutcome::Failed(_) => {
                record.extend(std::iter::repeat("NaN".to_string()).take(names.len() + 1));
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!(path = %path.display(), rows = table.len(), "fit table saved");
    Ok(())
}
