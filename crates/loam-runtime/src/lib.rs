//! Background work: block emerge on the server, mesh builds on the client.
#![forbid(unsafe_code)]

mod emerge;
mod meshing;

use std::time::Duration;

use thiserror::Error;

pub use emerge::{
    EmergeLimits, EmergeOutcome, EmergeQueue, EmergeResult, EmergeTask, EmergeWorkers,
    process_emerge_task,
};
pub use meshing::{MeshBuildQueue, MeshResult, MeshTask, MeshWorker};

/// Upper bound on how long an idle worker sleeps before rechecking shutdown.
pub const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("cannot spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
