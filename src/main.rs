//! MRI Tumor Classifier CLI
//!
//! Entry point for preprocessing inspection, training, single-image
//! prediction and model metadata.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use mri_tumor::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use mri_tumor::inference::InferenceEngine;
use mri_tumor::model::artifact::read_model_info;
use mri_tumor::model::config::{AppConfig, ModelVariant, MODEL_INFO_FILE_NAME};
use mri_tumor::preprocessing::{preprocess_path, summarize};
use mri_tumor::training::run_training;
use mri_tumor::utils::format_duration;
use mri_tumor::utils::logging::{init_logging, LogConfig, LogLevel};

/// Brain tumor detection on MRI slices
#[derive(Parser, Debug)]
#[command(name = "mri_tumor")]
#[command(version)]
#[command(about = "MRI brain tumor classification with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// JSON configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the preprocessing pipeline on an image and print the tensor summary
    Preprocess {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Train the classifier on a labeled directory tree
    Train {
        /// Directory containing no-tumor/ and tumor/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Maximum number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Seed for the split, shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Seed for weight initialization
        #[arg(long)]
        weight_seed: Option<u64>,

        /// Where the model and model_info.json are written
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Network layout: standard or deep
        #[arg(long)]
        variant: Option<ModelVariant>,
    },

    /// Classify a single image
    Predict {
        /// Path to the input image
        #[arg(short, long)]
        input: PathBuf,

        /// Path to the trained model
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Show the metadata written next to a trained model
    Info {
        /// Path to the trained model or its model_info.json
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Ok(level) = std::env::var("MRI_TUMOR_LOG") {
        config.logging.level = LogLevel::parse(&level);
    }
    if cli.verbose {
        config.logging = LogConfig::verbose();
    } else if cli.quiet {
        config.logging = LogConfig::quiet();
    }
    let _ = init_logging(&config.logging);

    match cli.command {
        Commands::Preprocess { input } => cmd_preprocess(&input)?,

        Commands::Train {
            data_dir,
            epochs,
            batch_size,
            seed,
            weight_seed,
            output_dir,
            variant,
        } => {
            let training = &mut config.training;
            if let Some(dir) = data_dir {
                training.data_dir = dir;
            }
            if let Some(epochs) = epochs {
                training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                training.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                training.seed = seed;
            }
            if weight_seed.is_some() {
                training.weight_seed = weight_seed;
            }
            if let Some(dir) = output_dir {
                training.output_dir = dir;
            }
            if let Some(variant) = variant {
                training.variant = variant;
            }
            cmd_train(&config)?;
        }

        Commands::Predict { input, model } => {
            if let Some(path) = model {
                config.inference.model_path = path;
            }
            cmd_predict(&input, &config)?;
        }

        Commands::Info { model } => {
            let path = model.unwrap_or_else(|| config.inference.model_path.clone());
            cmd_info(&path)?;
        }
    }

    Ok(())
}

fn cmd_preprocess(input: &Path) -> Result<()> {
    info!("Preprocessing {}", input.display());
    let tensor = preprocess_path(input)
        .with_context(|| format!("preprocessing {}", input.display()))?;
    let summary = summarize(&tensor);

    println!("{}", "Preprocessed tensor:".cyan().bold());
    println!("  Shape: {:?}", summary.shape);
    println!("  Min:   {:.4}", summary.min_val);
    println!("  Max:   {:.4}", summary.max_val);
    println!();
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_train(config: &AppConfig) -> Result<()> {
    let training = &config.training;
    training.validate()?;

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Data:       {}", training.data_dir.display());
    println!("  Output:     {}", training.output_dir.display());
    println!("  Model:      {}", training.classifier_config().describe());
    println!("  Epochs:     {}", training.epochs);
    println!("  Batch size: {}", training.batch_size);
    println!("  Seed:       {}", training.seed);
    match training.weight_seed {
        Some(seed) => println!("  Weights:    seeded ({})", seed),
        None => println!("  Weights:    {}", "unseeded".yellow()),
    }
    println!("  Backend:    {}", backend_name());
    println!();

    let start = std::time::Instant::now();
    let report = run_training::<TrainingBackend>(training, &default_device(), None, None)?;
    let results = &report.info.training_results;

    println!();
    println!("{}", "Training complete".green().bold());
    println!(
        "  Samples:    {} (train {}, validation {})",
        report.dataset_counts, report.train_counts, report.validation_counts
    );
    println!(
        "  Epochs:     {}{}",
        results.epochs_run,
        if results.stopped_early { " (early stop)" } else { "" }
    );
    println!("  Accuracy:   {:.2}%", results.accuracy * 100.0);
    println!("  Precision:  {:.4}", results.precision);
    println!("  Recall:     {:.4}", results.recall);
    println!("  F1:         {:.4}", results.f1);
    println!("  Loss:       {:.4}", results.loss);
    println!("  Confusion:  {:?}", results.confusion_matrix);
    println!("  Duration:   {}", format_duration(start.elapsed()));
    println!("  Model:      {}", report.model_path.display());
    println!("  Info:       {}", report.info_path.display());
    Ok(())
}

fn cmd_predict(input: &Path, config: &AppConfig) -> Result<()> {
    let engine = InferenceEngine::<DefaultBackend>::from_config(&config.inference, default_device());
    let prediction = engine
        .predict_path(input)
        .with_context(|| format!("classifying {}", input.display()))?;

    let headline = if prediction.is_tumor() {
        prediction.prediction.red().bold()
    } else {
        prediction.prediction.green().bold()
    };
    println!("{}", headline);
    println!("  Probability: {:.4} (threshold {})", prediction.confidence, prediction.threshold);
    if !prediction.model_trained {
        println!(
            "  {} no trained model at {}; this prediction is not meaningful",
            "Warning:".yellow().bold(),
            engine.artifact_path().display()
        );
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

fn cmd_info(path: &Path) -> Result<()> {
    let info_path = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        path.to_path_buf()
    } else {
        path.parent()
            .map(|dir| dir.join(MODEL_INFO_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(MODEL_INFO_FILE_NAME))
    };

    let info = read_model_info(&info_path)
        .with_context(|| format!("reading {}", info_path.display()))?;
    let results = &info.training_results;

    println!("{}", "Model Information:".cyan().bold());
    println!("  Architecture: {}", info.architecture);
    println!("  Input shape:  {:?}", info.input_shape);
    println!("  Parameters:   {}", info.total_parameters);
    println!("  Trained at:   {}", info.trained_at.to_rfc3339());
    println!();
    println!("{}", "Validation Results:".cyan().bold());
    println!("  Accuracy:  {:.2}%", results.accuracy * 100.0);
    println!("  Precision: {:.4}", results.precision);
    println!("  Recall:    {:.4}", results.recall);
    println!("  F1:        {:.4}", results.f1);
    println!("  Epochs:    {}", results.epochs_run);
    if let Some(best) = info.history.best_epoch() {
        println!(
            "  Best epoch: {} (val acc {:.2}%, val loss {:.4})",
            best.epoch + 1,
            best.val_accuracy * 100.0,
            best.val_loss
        );
    }
    Ok(())
}
