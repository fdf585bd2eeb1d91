//! Epoch-level training policies.
//!
//! - [`ReduceLrOnPlateau`]: shrink the learning rate when validation loss
//!   stops decreasing
//! - [`EarlyStopping`]: stop when validation accuracy stops increasing and
//!   remember which epoch was best

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Reduce the learning rate when a minimized metric plateaus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_lr: f64,
    current_lr: f64,
    best: Option<f64>,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize, min_delta: f64, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_delta,
            min_lr,
            current_lr: initial_lr,
            best: None,
            wait: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.current_lr
    }

    /// Feed the epoch's validation loss; returns the new rate when it changed
    pub fn step(&mut self, metric: f64) -> Option<f64> {
        let improved = match self.best {
            Some(best) => metric < best - self.min_delta,
            None => true,
        };

        if improved {
            self.best = Some(metric);
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        debug!("val_loss plateau: {}/{} epochs", self.wait, self.patience);
        if self.wait < self.patience {
            return None;
        }

        self.wait = 0;
        if self.current_lr <= self.min_lr {
            return None;
        }
        let new_lr = (self.current_lr * self.factor).max(self.min_lr);
        info!(
            "Reducing learning rate: {:.2e} -> {:.2e}",
            self.current_lr, new_lr
        );
        self.current_lr = new_lr;
        Some(new_lr)
    }
}

/// Result of feeding one epoch to [`EarlyStopping`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    /// The metric beat every previous epoch
    pub improved: bool,
    /// Patience is exhausted
    pub should_stop: bool,
}

/// Stop training when a maximized metric stops improving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn step(&mut self, epoch: usize, metric: f64) -> StopDecision {
        let improved = match self.best {
            Some(best) => metric > best,
            None => true,
        };

        if improved {
            self.best = Some(metric);
            self.best_epoch = Some(epoch);
            self.wait = 0;
        } else {
            self.wait += 1;
        }

        StopDecision {
            improved,
            should_stop: self.patience > 0 && self.wait >= self.patience,
        }
    }
}
