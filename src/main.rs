use clap::{Parser, Subcommand};
use pdfslim::config::{self, OptimizeConfig, Overrides};
use pdfslim::graph::LopdfGraph;
use pdfslim::{optimize, output};
use std::path::{Path, PathBuf};

/// Flags that adjust the loaded config for one run.
#[derive(clap::Args, Clone)]
struct TuningArgs {
    /// Config file (TOML), merged over the stock defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// JPEG quality of the first candidate (1-100)
    #[arg(long)]
    quality: Option<u32>,

    /// Downsample foreground images above this effective resolution
    #[arg(long)]
    max_dpi: Option<u32>,

    /// Similarity a foreground candidate must reach (0-1)
    #[arg(long)]
    min_similarity: Option<f64>,

    /// Leave CMYK images untouched
    #[arg(long)]
    no_cmyk: bool,

    /// Never treat page-filling images as backgrounds
    #[arg(long)]
    preserve_background: bool,

    /// Re-encode every image in grayscale
    #[arg(long)]
    grayscale: bool,
}

impl TuningArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            quality: self.quality,
            max_dpi: self.max_dpi,
            min_similarity: self.min_similarity,
            no_cmyk: self.no_cmyk,
            preserve_background: self.preserve_background,
            grayscale: self.grayscale,
        }
    }

    fn resolve(&self) -> Result<OptimizeConfig, config::ConfigError> {
        config::load_config(self.config.as_deref())?.with_overrides(&self.overrides())
    }
}

#[derive(Parser)]
#[command(name = "pdfslim")]
#[command(about = "Shrink PDFs by re-encoding their images behind a quality gate")]
#[command(long_about = "\
Shrink PDFs by re-encoding their images behind a quality gate

Every image is classified by how it is used on the page:

  background              covers most of the page; downscaled hard
  foreground-opaque       JPEG ladder, capped at --max-dpi
  foreground-transparent  JPEG ladder at full size, soft mask re-encoded with it

A candidate is only written when it is similar enough to the original and
saves enough bytes. Everything else is left exactly as it was.

Logging follows RUST_LOG (default: info). Run 'pdfslim gen-config' to
generate a documented pdfslim.toml.")]
#[command(version)]
struct Cli {
    /// Log every candidate (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize the images of a PDF and write the result
    Optimize {
        /// Input PDF
        input: PathBuf,

        /// Output PDF (default: <input>-slim.pdf next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the per-image report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        tuning: TuningArgs,
    },
    /// List images with their strategy, effective DPI and coverage
    Inspect {
        /// Input PDF
        input: PathBuf,

        #[command(flatten)]
        tuning: TuningArgs,
    },
    /// Print a stock pdfslim.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Optimize {
            input,
            output: destination,
            report,
            tuning,
        } => {
            let config = tuning.resolve()?;
            init_thread_pool(&config.processing);

            let mut graph = LopdfGraph::load(&input)?;
            let document_report = optimize::optimize(&mut graph, &config)?;

            let output_path = destination.unwrap_or_else(|| default_output(&input));
            graph.save(&output_path)?;
            output::print_report(&document_report);

            if let Some(report_path) = report {
                let json = serde_json::to_string_pretty(&document_report)?;
                std::fs::write(&report_path, json)?;
            }
            println!("==> Wrote {}", output_path.display());
        }
        Command::Inspect { input, tuning } => {
            let config = tuning.resolve()?;
            let graph = LopdfGraph::load(&input)?;
            let summaries = optimize::inspect(&graph, &config)?;
            output::print_inspection(&summaries);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default));
    if verbose {
        builder.filter_module("pdfslim", log::LevelFilter::Debug);
    }
    builder.init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Caps at the number of available CPU cores; the user can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}

/// `report.pdf` → `report-slim.pdf`, in the same directory.
fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{stem}-slim.pdf"))
}
