//! AOD regressor tuning CLI
//!
//! Searches hyperparameters and trains a final regressor for every input table.

use std::path::PathBuf;

use aod::{Config, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aod")]
#[command(about = "Per-dataset hyperparameter search and training for AOD550 regression", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every CSV in the input directory, skipping finished ones
    Run {
        /// Override input directory
        #[arg(long)]
        input: Option<PathBuf>,
        /// Override output directory
        #[arg(long)]
        output: Option<PathBuf>,
        /// Override number of search trials
        #[arg(long)]
        trials: Option<usize>,
        /// Run search trials in parallel
        #[arg(long)]
        parallel: bool,
    },
    /// Process a single CSV file
    Train {
        /// Input CSV file
        file: PathBuf,
        /// Override number of search trials
        #[arg(long)]
        trials: Option<usize>,
        /// Reuse an existing output directory instead of skipping
        #[arg(long)]
        force: bool,
    },
    /// Score a CSV with the model of a finished run
    Predict {
        /// Output directory of a finished run
        run_dir: PathBuf,
        /// Input CSV file
        file: PathBuf,
        /// Where to write `true,predicted` rows
        #[arg(long, default_value = "predictions.csv")]
        output: PathBuf,
    },
    /// Write a default config file
    Init,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            trials,
            parallel,
        } => commands::run(config, input, output, trials, parallel),
        Commands::Train { file, trials, force } => commands::train(config, &file, trials, force),
        Commands::Predict {
            run_dir,
            file,
            output,
        } => commands::predict(&config, &run_dir, &file, &output),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use std::path::Path;

    use aod::data::AodDataset;
    use aod::pipeline::{FileOutcome, RunOrchestrator};
    use aod::predict::Predictor;
    use burn::backend::{Autodiff, NdArray};

    type MyBackend = NdArray<f32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        std::fs::create_dir_all(&config.data.input_dir)?;
        std::fs::create_dir_all(&config.output.output_dir)?;
        println!(
            "Created {}/ and {}/ directories",
            config.data.input_dir.display(),
            config.output.output_dir.display()
        );

        println!("\nNext steps:");
        println!("  1. Edit {} to customize settings", config_path);
        println!("  2. Put input CSV files into {}", config.data.input_dir.display());
        println!("  3. Run 'aod run' to tune and train a model per file");

        Ok(())
    }

    pub fn run(
        mut config: Config,
        input: Option<PathBuf>,
        output: Option<PathBuf>,
        trials: Option<usize>,
        parallel: bool,
    ) -> Result<()> {
        if let Some(input) = input {
            config.data.input_dir = input;
        }
        if let Some(output) = output {
            config.output.output_dir = output;
        }
        if let Some(trials) = trials {
            config.search.trials = trials;
        }
        config.search.parallel |= parallel;

        let device = Default::default();
        let orchestrator = RunOrchestrator::<MyAutodiffBackend>::new(config, device);
        let summary = orchestrator.run_all()?;

        println!(
            "Processed: {}  Skipped: {}  Insufficient data: {}  Failed: {}",
            summary.processed, summary.skipped, summary.insufficient, summary.failed
        );
        Ok(())
    }

    pub fn train(mut config: Config, file: &Path, trials: Option<usize>, force: bool) -> Result<()> {
        if let Some(trials) = trials {
            config.search.trials = trials;
        }

        let device = Default::default();
        let orchestrator = RunOrchestrator::<MyAutodiffBackend>::new(config, device);
        match orchestrator.process_file(file, force)? {
            FileOutcome::Completed(summary) => {
                println!("\nBest configuration: {}", summary.best_trial.hyperparams);
                println!("Validation: {}", summary.validation);
                println!("Test:       {}", summary.test);
                println!("Artifacts in {}", orchestrator.output_dir_for(file).display());
            }
            FileOutcome::Skipped(dir) => {
                println!("Already processed: {} (use --force to retrain)", dir.display());
            }
        }
        Ok(())
    }

    pub fn predict(config: &Config, run_dir: &Path, file: &Path, output: &Path) -> Result<()> {
        let device = Default::default();
        let predictor = Predictor::<MyBackend>::load(run_dir, device)?;
        let dataset = AodDataset::from_csv(file, &config.data)?;

        let predictions = predictor.predict(&dataset)?;
        predictions.write_csv(output)?;

        println!("Scored {} rows -> {}", predictions.len(), output.display());
        println!("{}", predictions.metrics());
        Ok(())
    }
}
