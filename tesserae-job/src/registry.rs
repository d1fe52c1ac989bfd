//! A single-slot job registry: at most one job running at a time.
//!
//! This is the explicit, lock-guarded replacement for a module-level
//! "current job" global; it is the full extent of the server-facing surface
//! this crate implements. An HTTP layer driving it remains out of scope.

use crate::controller::Job;
use crate::error::{JobError, JobResult};
use std::sync::{Arc, Mutex};
use std::thread;
use tesserae_core::Image;

/// Point-in-time snapshot of the registry's single job slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStatus {
    /// `true` if a job occupies the slot and has not finished.
    pub running: bool,
    /// Tiles composited so far.
    pub done_tiles: usize,
    /// Total tiles in the job's slicer grid.
    pub total_tiles: usize,
    /// The previewer's current change token.
    pub preview_token: u64,
}

/// Owns at most one [`Job`] at a time.
#[derive(Default)]
pub struct JobRegistry {
    slot: Mutex<Option<Arc<Job>>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `job` on a fresh thread, unless a previous job is still
    /// running.
    pub fn try_start(&self, job: Arc<Job>) -> JobResult<()> {
        let mut slot = self.slot.lock().unwrap();
        if let Some(existing) = slot.as_ref() {
            if !existing.finished() {
                return Err(JobError::Busy);
            }
        }
        let run_handle = Arc::clone(&job);
        thread::spawn(move || {
            if let Err(e) = run_handle.run() {
                tracing::error!(error = %e, "job run failed");
            }
        });
        *slot = Some(job);
        Ok(())
    }

    /// A snapshot of the current slot's progress.
    pub fn status(&self) -> JobStatus {
        let slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            Some(job) => {
                let (done, total) = job.progress();
                JobStatus {
                    running: !job.finished(),
                    done_tiles: done,
                    total_tiles: total,
                    preview_token: job.changed_token(),
                }
            }
            None => JobStatus::default(),
        }
    }

    /// Aborts the running job, if any.
    pub fn abort(&self) -> JobResult<()> {
        let slot = self.slot.lock().unwrap();
        match slot.as_ref() {
            Some(job) => {
                job.abort();
                Ok(())
            }
            None => Err(JobError::NoActiveJob),
        }
    }

    /// The current job's live preview snapshot, if any job has run.
    pub fn preview(&self) -> Option<Image> {
        let slot = self.slot.lock().unwrap();
        slot.as_ref().map(|job| job.preview())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Settings, TileSource};
    use serde_json::json;
    use std::time::Duration;
    use tesserae_core::{MaskBuilder, SimpleSlicer};
    use tesserae_worker::{DebugWorker, WorkerProxy};

    fn sample_job() -> Arc<Job> {
        let slicer = Box::new(SimpleSlicer::new(32, 32, 20, 4, false).unwrap());
        let image = Image::new(32, 32, 3).unwrap();
        let worker: Arc<dyn WorkerProxy> = Arc::new(DebugWorker::new("d1", 1.0, None));
        let settings = Settings {
            image_scale: 1.0,
            image_height: 32,
            image_width: 32,
            tile_source: TileSource::Raw,
            upscale_factor: None,
            positive_prompt: None,
            negative_prompt: None,
            seed_increment: None,
            workflow: json!({"1": {"class_type": "SaveImage", "inputs": {}}}),
            save: false,
        };
        Arc::new(Job::new(slicer, vec![worker], image, MaskBuilder::new(2, 4), settings, None).unwrap())
    }

    #[test]
    fn second_start_is_refused_while_busy() {
        let registry = JobRegistry::new();
        registry.try_start(sample_job()).unwrap();
        let result = registry.try_start(sample_job());
        assert!(matches!(result, Err(JobError::Busy)));
        // Let the background job finish so the test process exits cleanly.
        std::thread::sleep(Duration::from_millis(50));
        let _ = registry.abort();
    }

    #[test]
    fn abort_without_a_job_errors() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.abort(), Err(JobError::NoActiveJob)));
    }
}
