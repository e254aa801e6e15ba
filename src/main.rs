//! Urban Guard CLI
//!
//! Trains the signage classifier, classifies images, writes synthetic samples
//! and inspects the persisted training history.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use image::{DynamicImage, Rgb, RgbImage};
use rand::Rng;
use tracing::info;

use urban_guard::backend::{backend_name, default_device, TrainingBackend};
use urban_guard::dataset::{DataSource, SyntheticGenerator};
use urban_guard::training::Trainer;
use urban_guard::utils::format_duration;
use urban_guard::utils::logging::{init_logging, LogConfig};
use urban_guard::{AppConfig, ModelStore, Predictor, IMAGE_SIZE};

/// Street signage compliance classifier
///
/// Decides whether a photo of urban signage looks authorized or unauthorized,
/// using a CNN trained with the Burn framework on synthetic data.
#[derive(Parser, Debug)]
#[command(name = "urban_guard")]
#[command(version)]
#[command(about = "Authorized/unauthorized signage classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a new model on synthetic data and persist it
    Train {
        /// Maximum number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Fraction of samples held out for validation
        #[arg(long)]
        validation_split: Option<f64>,

        /// Number of synthetic samples to generate
        #[arg(short, long)]
        samples: Option<usize>,

        /// Mini-batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Random seed for generation, shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Abort training after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Quick smoke run with a small dataset
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Classify one image (trains a model first if none is stored)
    Predict {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Write synthetic training samples as PNG files
    Generate {
        /// Output directory
        #[arg(short, long, default_value = "output/synthetic")]
        output_dir: PathBuf,

        /// Number of samples
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show the persisted training history
    History,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    let config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::default(),
    };

    print_banner();

    match cli.command {
        Commands::Train {
            epochs,
            validation_split,
            samples,
            batch_size,
            seed,
            deadline_secs,
            quick,
        } => {
            let mut training = config.training.clone();
            if quick {
                println!("{}", "Quick test mode: small dataset".yellow().bold());
                training = training.with_quick_sizes();
            }
            if let Some(epochs) = epochs {
                training.epochs = epochs;
            }
            if let Some(split) = validation_split {
                training.validation_split = split;
            }
            if let Some(samples) = samples {
                training.num_samples = samples;
            }
            if let Some(batch_size) = batch_size {
                training.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                training.seed = seed;
            }
            if deadline_secs.is_some() {
                training.deadline_secs = deadline_secs;
            }

            cmd_train(AppConfig { training, ..config })?;
        }

        Commands::Predict { input } => {
            cmd_predict(&config, &input)?;
        }

        Commands::Generate {
            output_dir,
            count,
            seed,
        } => {
            cmd_generate(&output_dir, count, seed)?;
        }

        Commands::History => {
            cmd_history(&config)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------------------+
 |   Urban Guard                                                |
 |   Signage compliance classification with Burn + Rust         |
 +--------------------------------------------------------------+
  "#
        .green()
    );
}

fn cmd_train(config: AppConfig) -> Result<()> {
    config.validate()?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Backend:          {}", backend_name());
    println!("  Architecture:     {:?}", config.model.variant);
    println!("  Samples:          {}", config.training.num_samples);
    println!("  Epochs:           {}", config.training.epochs);
    println!("  Batch size:       {}", config.training.batch_size);
    println!("  Validation split: {}", config.training.validation_split);
    println!("  Model path:       {}", config.store.model_path.display());
    println!();

    let device = default_device();
    let mut trainer = Trainer::<TrainingBackend>::from_config(&config, device.clone());

    let started = Instant::now();
    let outcome = trainer.run(config.training.epochs, config.training.validation_split)?;
    let elapsed = started.elapsed().as_secs_f64();

    let history = &outcome.history;
    println!();
    println!("{}", "Training Complete".green().bold());
    println!("  Epochs run: {}", history.epochs_run());
    println!("  Duration:   {}", format_duration(elapsed));
    if let Some(last) = history.last() {
        println!("  Final training accuracy:   {:.4}", last.accuracy);
        println!("  Final validation accuracy: {:.4}", last.val_accuracy);
        println!("  Final training loss:       {:.4}", last.loss);
        println!("  Final validation loss:     {:.4}", last.val_loss);
    }
    if history.stopped_early {
        println!("  {}", "Stopped early".yellow());
    }

    // Smoke-test the freshly stored model on random noise
    let predictor = Predictor::<TrainingBackend>::from_config(&config, device)
        .with_model(outcome.model);
    let mut rng = rand::thread_rng();
    let size = IMAGE_SIZE as u32;
    let noise = RgbImage::from_fn(size, size, |_, _| Rgb(rng.gen::<[u8; 3]>()));
    let sample = predictor.predict(&DynamicImage::ImageRgb8(noise));

    println!();
    println!("{}", "Sample prediction on random noise:".cyan());
    println!("{}", serde_json::to_string_pretty(&sample)?);

    Ok(())
}

fn cmd_predict(config: &AppConfig, input: &Path) -> Result<()> {
    info!("Classifying {}", input.display());

    let predictor = Predictor::<TrainingBackend>::from_config(config, default_device());
    let result = predictor.predict_file(input);

    let verdict = if result.is_error() {
        result.prediction.to_string().red().bold()
    } else {
        result.prediction.to_string().green().bold()
    };
    println!("{} {}", "Result:".cyan(), verdict);
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn cmd_generate(output_dir: &Path, count: usize, seed: u64) -> Result<()> {
    let generator: Arc<dyn DataSource> = Arc::new(SyntheticGenerator::seeded(seed));
    let dataset = generator.generate(count)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    for (index, (image, label)) in dataset.images().iter().zip(dataset.labels()).enumerate() {
        let path = output_dir.join(format!("{:04}_{}.png", index, label));
        image
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!(
        "{} Wrote {} samples to {}",
        "Done:".green(),
        count,
        output_dir.display()
    );
    Ok(())
}

fn cmd_history(config: &AppConfig) -> Result<()> {
    let store = ModelStore::from_config(&config.store);

    let Some(history) = store.load_history()? else {
        println!(
            "{} No training history at {}",
            "Note:".yellow(),
            store.history_path().display()
        );
        println!("Train a model first:");
        println!("  urban_guard train --quick");
        return Ok(());
    };

    println!("{}", "Training History:".cyan().bold());
    println!(
        "  Epochs run: {} of {}",
        history.epochs_run(),
        history.epochs_requested
    );
    if let Some((epoch, loss)) = history.best_val_loss() {
        println!("  Best val_loss: {:.4} (epoch {})", loss, epoch + 1);
    }
    println!("  Stopped early: {}", history.stopped_early);
    if let Some(completed) = &history.completed_at {
        println!("  Completed at: {}", completed);
    }
    println!();

    println!(
        "  {:>5}  {:>8}  {:>8}  {:>8}  {:>8}  {:>10}",
        "epoch", "loss", "acc", "val_loss", "val_acc", "lr"
    );
    for epoch in 0..history.epochs_run() {
        println!(
            "  {:>5}  {:>8.4}  {:>8.4}  {:>8.4}  {:>8.4}  {:>10.2e}",
            epoch + 1,
            history.loss[epoch],
            history.accuracy[epoch],
            history.val_loss[epoch],
            history.val_accuracy[epoch],
            history.learning_rate.get(epoch).copied().unwrap_or(f64::NAN),
        );
    }

    Ok(())
}
