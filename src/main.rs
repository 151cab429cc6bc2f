//! CLI entry point for spectra-daq.
//!
//! Two headless workflows over the core library:
//! - `live`: run the acquisition pipeline (synthetic source when no hardware
//!   is configured), optionally take dark/bright references, record a
//!   time-resolved series and save it as CSV.
//! - `fit`: load a saved series and fit a mixture model to every time slice
//!   in parallel, writing the fitted-parameter table.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use spectra_daq::acquisition::{
    frames_for_duration, transport, AcquisitionController, FrameSource, ReferenceKind,
};
use spectra_daq::config::Settings;
use spectra_daq::dataset::Dataset;
use spectra_daq::fit::{self, FitModelSpec};
use spectra_daq::logging::{self, OutputFormat};
use spectra_daq::metadata::MetadataBuilder;
use spectra_daq::storage;

#[derive(Parser)]
#[command(name = "spectra-daq")]
#[command(about = "Spectrometer acquisition and curve-fitting workbench", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(long, default_value = "spectra-daq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a time-resolved series from the live pipeline.
    Live {
        /// Number of frames in the series.
        #[arg(long, default_value = "100")]
        frames: usize,

        /// Measurement length in seconds; overrides --frames by deriving
        /// the frame count from the integration time.
        #[arg(long, conflicts_with = "frames")]
        duration: Option<f64>,

        /// Store every (skip+1)-th frame.
        #[arg(long, default_value = "0")]
        skip: usize,

        /// Sample name written into the metadata header.
        #[arg(long, default_value = "demo")]
        sample: String,

        /// Operator name written into the metadata header.
        #[arg(long, default_value = "")]
        user: String,

        /// Measure a dark reference before recording.
        #[arg(long)]
        dark: bool,

        /// Measure a bright reference before recording.
        #[arg(long)]
        bright: bool,
    },

    /// Fit a mixture model to every time slice of a saved series.
    Fit {
        /// Series CSV produced by the `live` command.
        input: PathBuf,

        /// TOML file describing the mixture model terms.
        #[arg(long)]
        model: PathBuf,

        /// First column (time slice) to fit.
        #[arg(long, default_value = "0")]
        start: usize,

        /// Last column to fit, inclusive. Defaults to the last slice.
        #[arg(long)]
        end: Option<usize>,

        /// Output path for the fitted-parameter table.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config).context("loading configuration")?;
    settings
        .validate()
        .map_err(spectra_daq::SpectraError::Configuration)?;
    logging::init(&settings.application.log_level, OutputFormat::Compact)
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Live {
            frames,
            duration,
            skip,
            sample,
            user,
            dark,
            bright,
        } => {
            let frames = duration.map_or(frames, |d| {
                frames_for_duration(d, settings.acquisition.integration_time_s)
            });
            live(&settings, frames, skip, &sample, &user, dark, bright).await
        }
        Commands::Fit {
            input,
            model,
            start,
            end,
            output,
        } => fit_series(&settings, &input, &model, start, end, output).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn live(
    settings: &Settings,
    frames: usize,
    skip: usize,
    sample: &str,
    user: &str,
    dark: bool,
    bright: bool,
) -> Result<()> {
    let acq = &settings.acquisition;
    let (producer_link, control) =
        transport::channel(acq.frame_pipe_capacity, acq.integration_time_s);
    let source = FrameSource::synthetic(&settings.synthetic, producer_link, acq.integration_time_s);
    let mut controller = AcquisitionController::start(source, control, acq);

    let sync_timeout = Duration::from_secs_f64(acq.integration_time_s * 200.0 + 10.0);
    controller
        .wait_until_synced(sync_timeout)
        .await
        .context("waiting for integration-time sync")?;
    info!(period_ms = controller.mean_period_ms(), "frame rate synced");

    if dark {
        println!("Measuring dark reference ({} cycles)...", acq.average_cycles);
        controller
            .measure_reference(ReferenceKind::Dark, sync_timeout)
            .await?;
    }
    if bright {
        println!("Measuring bright reference ({} cycles)...", acq.average_cycles);
        controller
            .measure_reference(ReferenceKind::Bright, sync_timeout)
            .await?;
    }

    println!("Recording {frames} frames (skip {skip})...");
    let series = controller.record(frames, skip, sync_timeout, None).await?;

    let normalization = controller.normalization_state();
    let metadata = MetadataBuilder::new()
        .sample(sample)
        .user(user)
        .integration_time_s(controller.integration_time_s())
        .references(normalization.has_dark(), normalization.has_bright())
        .build();
    let wavelengths = controller.wavelengths();
    let path = storage::save_series(
        &settings.storage.output_dir,
        &metadata,
        &wavelengths,
        &series,
        &normalization,
    )?;
    println!("Series saved to {}", path.display());

    controller.shutdown().await?;
    Ok(())
}

async fn fit_series(
    settings: &Settings,
    input: &Path,
    model: &Path,
    start: usize,
    end: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    let spec_toml = std::fs::read_to_string(model)
        .with_context(|| format!("reading model file {}", model.display()))?;
    let spec: FitModelSpec = toml::from_str(&spec_toml).context("parsing model file")?;

    let (_, dataset): (_, Dataset) = storage::load_series(input)?;
    let end = end.unwrap_or_else(|| dataset.n_columns().saturating_sub(1));
    println!(
        "Fitting columns {start}..={end} of {} ({} axis points)...",
        input.display(),
        dataset.axis.len()
    );

    let table = fit::fit_range(Arc::new(dataset), start, end, &spec, None).await?;
    if table.failed_count() > 0 {
        println!("{} of {} columns failed to fit", table.failed_count(), table.len());
    }

    let output = output.unwrap_or_else(|| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "series".to_string());
        settings.storage.output_dir.join(format!("{stem}_fits.csv"))
    });
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    storage::save_fit_table(&output, &spec, &table)?;
    println!("Fit table saved to {}", output.display());
    Ok(())
}
