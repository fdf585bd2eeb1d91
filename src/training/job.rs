//! Background training job
//!
//! A [`TrainingJob`] owns one training run on a dedicated OS thread. Callers
//! poll [`TrainingJob::status`], request cancellation (honoured at the next
//! epoch boundary) and finally [`TrainingJob::wait`] for the outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use burn::tensor::backend::AutodiffBackend;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::trainer::{run_training, EpochCallback, TrainingReport};
use crate::model::config::TrainingConfig;
use crate::utils::error::MriError;
use crate::utils::metrics::EpochMetrics;

/// Lifecycle of a training job
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running {
        /// Completed epochs so far
        epoch: usize,
        total_epochs: usize,
        last: Option<EpochMetrics>,
    },
    Completed(Box<TrainingReport>),
    Failed {
        reason: String,
    },
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed(_) | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

/// Handle to a training run executing on its own thread
pub struct TrainingJob {
    id: Uuid,
    status: Arc<Mutex<JobStatus>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn lock(status: &Mutex<JobStatus>) -> MutexGuard<'_, JobStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TrainingJob {
    /// Start training `config` on `device` in the background
    pub fn submit<B: AutodiffBackend>(config: TrainingConfig, device: B::Device) -> Self {
        let id = Uuid::new_v4();
        let status = Arc::new(Mutex::new(JobStatus::Pending));
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_status = Arc::clone(&status);
        let thread_cancel = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            let total_epochs = config.epochs;
            *lock(&thread_status) = JobStatus::Running {
                epoch: 0,
                total_epochs,
                last: None,
            };

            let progress_status = Arc::clone(&thread_status);
            let on_epoch: EpochCallback = Arc::new(move |metrics: &EpochMetrics| {
                *lock(&progress_status) = JobStatus::Running {
                    epoch: metrics.epoch + 1,
                    total_epochs,
                    last: Some(metrics.clone()),
                };
            });

            let result = run_training::<B>(&config, &device, Some(thread_cancel), Some(on_epoch));
            let final_status = match result {
                Ok(report) => {
                    info!("Training job {} completed", id);
                    JobStatus::Completed(Box::new(report))
                }
                Err(MriError::Cancelled) => {
                    warn!("Training job {} cancelled", id);
                    JobStatus::Cancelled
                }
                Err(e) => {
                    error!("Training job {} failed: {}", id, e);
                    JobStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            *lock(&thread_status) = final_status;
        });

        info!("Submitted training job {}", id);
        Self {
            id,
            status,
            cancel,
            handle: Some(handle),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Snapshot of the current state
    pub fn status(&self) -> JobStatus {
        lock(&self.status).clone()
    }

    /// Ask the run to stop before its next epoch
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Block until the run finishes and return its final state
    pub fn wait(mut self) -> JobStatus {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                *lock(&self.status) = JobStatus::Failed {
                    reason: "training thread panicked".to_string(),
                };
            }
        }
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TestAutodiffBackend;
    use crate::model::cnn::ClassifierConfig;
    use crate::test_utils::write_dataset;

    fn config(root: &std::path::Path, epochs: usize) -> TrainingConfig {
        TrainingConfig {
            data_dir: root.join("train"),
            output_dir: root.join("out"),
            classifier: Some(ClassifierConfig::new(vec![4], vec![8], vec![0.5])),
            epochs,
            batch_size: 8,
            weight_seed: Some(5),
            ..Default::default()
        }
    }

    #[test]
    fn test_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(&dir.path().join("train"), 6, 20);

        let job = TrainingJob::submit::<TestAutodiffBackend>(config(dir.path(), 1), Default::default());
        match job.wait() {
            JobStatus::Completed(report) => {
                assert!(report.model_path.is_file());
                assert_eq!(report.info.training_results.epochs_run, 1);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_job_cancel() {
        let dir = tempfile::tempdir().unwrap();
        write_dataset(&dir.path().join("train"), 6, 20);

        let job = TrainingJob::submit::<TestAutodiffBackend>(config(dir.path(), 50), Default::default());
        job.cancel();
        let status = job.wait();
        assert!(matches!(status, JobStatus::Cancelled), "got {:?}", status);
        assert!(status.is_finished());
    }

    #[test]
    fn test_job_empty_dataset_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("train/no-tumor")).unwrap();
        std::fs::create_dir_all(dir.path().join("train/tumor")).unwrap();

        let job = TrainingJob::submit::<TestAutodiffBackend>(config(dir.path(), 1), Default::default());
        assert!(matches!(job.wait(), JobStatus::Failed { .. }));
    }
}
