//! A worker double that fails its first tile, then behaves like
//! [`tesserae_worker::DebugWorker`] for every tile after. Exercises the
//! dispatcher's retry path (S4) without slowing every other scenario down
//! with `DebugWorker`'s simulated network latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tesserae_core::Image;
use tesserae_worker::{ProcessRequest, WorkerError, WorkerInfo, WorkerProxy, WorkerResult, WorkerState};

pub struct FlakyWorker {
    id: String,
    priority_init: f32,
    priority: Mutex<f32>,
    state: Mutex<WorkerState>,
    failed_once: AtomicBool,
}

impl FlakyWorker {
    pub fn new(id: &str, priority: f32) -> Self {
        Self {
            id: id.to_string(),
            priority_init: priority,
            priority: Mutex::new(priority),
            state: Mutex::new(WorkerState::Idle),
            failed_once: AtomicBool::new(false),
        }
    }
}

impl WorkerProxy for FlakyWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    fn priority(&self) -> f32 {
        *self.priority.lock().unwrap()
    }

    fn probe(&self) -> WorkerResult<()> {
        Ok(())
    }

    fn process(&self, request: ProcessRequest) -> WorkerResult<Image> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != WorkerState::Idle {
                return Err(WorkerError::BadState {
                    expected: "idle",
                    actual: format!("{:?}", *state),
                });
            }
            *state = WorkerState::Proc;
        }

        if !self.failed_once.swap(true, Ordering::SeqCst) {
            *self.state.lock().unwrap() = WorkerState::Idle;
            *self.priority.lock().unwrap() -= 0.001;
            return Err(WorkerError::Timeout("simulated first-dispatch failure".to_string()));
        }

        *self.state.lock().unwrap() = WorkerState::Idle;
        Ok(request.image)
    }

    fn abort(&self) {
        let mut state = self.state.lock().unwrap();
        if !matches!(*state, WorkerState::Fail | WorkerState::Lock) {
            *state = WorkerState::Idle;
        }
    }

    fn reset(&self) -> WorkerResult<()> {
        *self.priority.lock().unwrap() = self.priority_init;
        Ok(())
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo::default()
    }
}
