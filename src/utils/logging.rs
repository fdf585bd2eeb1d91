//! Logging Module
//!
//! Structured logging on top of the `tracing` crate, plus a small epoch
//! logger used by the training loop.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Console logging settings, stored under `logging` in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
    /// Show the emitting module path
    pub include_target: bool,
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Debug level with module paths; thread ids help follow background jobs
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ..Default::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl LogLevel {
    /// Lenient parse for command-line and environment values; unknown names map to `Info`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Install the global `tracing` subscriber
///
/// Fails if a subscriber is already installed, e.g. when called twice.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::from(config.level))
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Per-epoch progress logger for the training loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its headline metrics
    pub fn end_epoch(&self, train_loss: f64, val_loss: f64, val_accuracy: f64, learning_rate: f64) {
        let epoch_time = self.epoch_start.elapsed();
        tracing::info!(
            "Epoch {}/{} in {:.1}s | loss: {:.4} | val_loss: {:.4} | val_acc: {:.2}% | lr: {:.2e}",
            self.epoch + 1,
            self.total_epochs,
            epoch_time.as_secs_f64(),
            train_loss,
            val_loss,
            val_accuracy * 100.0,
            learning_rate
        );
    }

    pub fn log_new_best(&self, previous: f64, accuracy: f64) {
        tracing::info!(
            "val_accuracy improved {:.2}% -> {:.2}%, checkpoint saved",
            previous * 100.0,
            accuracy * 100.0
        );
    }

    pub fn log_early_stop(&self, patience: usize) {
        tracing::warn!(
            "Early stopping after {} epochs without val_accuracy improvement",
            patience
        );
    }

    pub fn log_complete(&self, epochs_run: usize, best_accuracy: f64) {
        tracing::info!(
            "Training complete: {} epochs in {:.1}s | best val_acc: {:.2}%",
            epochs_run,
            self.training_start.elapsed().as_secs_f64(),
            best_accuracy * 100.0
        );
    }
}
