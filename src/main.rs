//! Command-line front end: DTM + DSM + JSON config in, GeoTIFF / CSV out.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use shadow_calculator::analysis::{AnalysisOutcome, ShadowAnalysis};
use shadow_calculator::export::metadata_json;
use shadow_calculator::progress::{spawn_console_progress, ProgressReporter};
use shadow_calculator::raster_io::RasterIO;
use shadow_calculator::types::Config;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Geotiff,
    Csv,
    Both,
}

#[derive(Parser)]
#[command(name = "shadow-calculator")]
#[command(
    author,
    version,
    about = "Terrain and object shadow simulation from DTM/DSM rasters",
    long_about = None
)]
struct Cli {
    /// Bare-ground elevation model (GeoTIFF)
    dtm: PathBuf,
    /// Surface elevation model including buildings and vegetation (GeoTIFF)
    dsm: PathBuf,
    /// Analysis configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,
    /// Output directory [default: Documents/ShadowCalculator_Exports]
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Both)]
    format: ExportFormat,
    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("shadow_calculator=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_json_file(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let dtm = RasterIO::read_elevation(&cli.dtm)
        .with_context(|| format!("Failed to load DTM {}", cli.dtm.display()))?;
    let dsm = RasterIO::read_elevation(&cli.dsm)
        .with_context(|| format!("Failed to load DSM {}", cli.dsm.display()))?;

    let (reporter, receiver) = ProgressReporter::channel();
    let progress_thread = (!cli.quiet).then(|| spawn_console_progress(receiver));

    let start = Instant::now();
    let outcome = {
        let mut analysis = ShadowAnalysis::new(config);
        if !cli.quiet {
            analysis = analysis.with_reporter(reporter);
        }
        analysis
            .run(&dtm.grid, &dsm.grid)
            .context("Shadow calculation failed")?
    };
    if let Some(handle) = progress_thread {
        let _ = handle.join();
    }

    let result = match outcome {
        AnalysisOutcome::Completed(result) => result,
        AnalysisOutcome::Cancelled {
            completed_steps,
            total_steps,
        } => {
            warn!("Cancelled after {}/{} time steps", completed_steps, total_steps);
            return Ok(());
        }
    };
    info!(
        "Computed {} timestamps in {:.1}s",
        result.timestamps.len(),
        start.elapsed().as_secs_f64()
    );

    let output_dir = match cli.output {
        Some(dir) => dir,
        None => dirs::document_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ShadowCalculator_Exports"),
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    if matches!(cli.format, ExportFormat::Geotiff | ExportFormat::Both) {
        let path = output_dir.join(format!("shadows_{}.tif", stamp));
        RasterIO::write_result_geotiff(&path, &result, &dsm.projection)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if matches!(cli.format, ExportFormat::Csv | ExportFormat::Both) {
        let path = output_dir.join(format!("shadows_{}.csv", stamp));
        RasterIO::write_result_csv(&path, &result)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let metadata_path = output_dir.join(format!("shadows_{}_metadata.json", stamp));
    std::fs::write(&metadata_path, metadata_json(&result)?)
        .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
    info!("Results written to {}", output_dir.display());

    Ok(())
}
