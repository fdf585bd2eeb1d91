//! Training module
//!
//! - `scheduler`: early stopping and learning-rate plateau policies
//! - `trainer`: the epoch loop, evaluation and artifact writing
//! - `job`: background training with status polling and cancellation

pub mod job;
pub mod scheduler;
pub mod trainer;

pub use job::{JobStatus, TrainingJob};
pub use scheduler::{EarlyStopping, ReduceLrOnPlateau, StopDecision};
pub use trainer::{evaluate, run_training, train, Trainer, TrainingOutcome, TrainingReport};
