//! Remote GPU worker proxies: lifecycle state machine, priority-based
//! ordering, and the upload/submit/poll/fetch HTTP critical path.

#![warn(missing_docs)]

mod error;
mod proxy;

pub use error::{WorkerError, WorkerResult};
pub use proxy::{
    by_priority_desc, ComfyWorker, DebugWorker, ProcessRequest, WorkerInfo, WorkerProxy, WorkerState,
    JOB_TIMEOUT, MAX_FAILURES, POLL_INTERVAL, TIMEOUT,
};
