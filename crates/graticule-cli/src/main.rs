use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use graticule_etl::Config;
use graticule_search::PredictMode;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "graticule", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Cache directory (default: platform cache directory + /graticule)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Build the reference index (coordinate lattice + image anchors)
    ///
    /// Runs the lattice → anchors → assemble pipeline:
    ///
    /// - Generates a stratified coordinate lattice, densified at the
    ///   hotspots from the configured catalog file, and embeds every point
    /// - Fetches each configured anchor manifest's landmark images, embeds
    ///   them, and curates a diverse subset per site
    /// - Merges both subsets into the versioned reference envelope
    ///
    /// The build is incremental: envelopes that already match the current
    /// build signature are kept. A change of embedding backend, lattice
    /// target, or anchor manifests changes the signature and forces a full
    /// rebuild. Failing anchor sources are skipped and logged; the build
    /// proceeds with whatever embedded successfully.
    Build {
        /// Discard envelopes for the current signature and rebuild
        #[arg(long)]
        force: bool,
    },
    /// Predict a location for a photograph
    Predict {
        /// Path to the image file, or '-' to read from stdin
        image: PathBuf,

        /// Request mode
        #[arg(long, value_enum, default_value_t = ModeArg::Accurate)]
        mode: ModeArg,

        /// Treat the input as base64-encoded image data
        #[arg(long)]
        base64: bool,
    },
    /// Show cache and index status
    Status,
    /// Show or initialize the configuration file
    Config {
        /// Create the config file with documented defaults
        #[arg(long)]
        init: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Fast,
    Accurate,
}

impl From<ModeArg> for PredictMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fast => Self::Fast,
            ModeArg::Accurate => Self::Accurate,
        }
    }
}

fn init_logger() {
    let level = std::env::var("GRAT_LOG").unwrap_or_else(|_| "info".to_string());
    let level = level.parse().unwrap_or(twyg::LogLevel::Info);
    let opts = match twyg::OptsBuilder::new()
        .coloured(true)
        .level(level)
        .report_caller(false)
        .build()
    {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("logger setup failed: {e:?}");
            return;
        }
    };
    if let Err(e) = twyg::setup(opts) {
        eprintln!("logger setup failed: {e:?}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();

    let config = match cli.cache_dir {
        Some(dir) => Config::load_with_cache_dir(dir)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Build { force } => {
            commands::run_build(config, force).await?;
        }
        Commands::Predict {
            image,
            mode,
            base64,
        } => {
            commands::run_predict(config, image, mode.into(), base64).await?;
        }
        Commands::Status => {
            commands::show_status(&config)?;
        }
        Commands::Config { init } => {
            commands::run_config(init)?;
        }
    }

    Ok(())
}
