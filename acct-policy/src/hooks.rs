//! Consumed hooks (§6): the external collaborators the engine calls out to,
//! modeled as traits so callers (and tests) can supply their own
//! implementations — the same role [`crate::model`] plays for data the
//! engine owns outright.

use crate::error::EngineError;
use crate::model::Job;

/// Resolves or (re-)validates a job's association binding. Backed by the
/// association tree in a real deployment; test doubles can return
/// `Err` to exercise the `FailAccount` path.
pub trait AssocBinder {
    fn fill_in_assoc(&self, job: &Job) -> Result<usize, EngineError>;
}

/// Priority-accounting notification, invoked outside the lock on
/// `JOB_FINI` (§4.2, §5).
pub trait PriorityHook {
    fn job_end(&self, job: &Job);
}

/// Persistence notification, invoked outside the lock when a pending job's
/// limits materially change (§4.8).
pub trait JobAcctStorageHook {
    fn job_start(&self, job: &Job);
}

/// No-op hooks for tests and for callers that do not wire in a priority
/// plugin or storage layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHooks;

impl PriorityHook for NullHooks {
    fn job_end(&self, _job: &Job) {}
}

impl JobAcctStorageHook for NullHooks {
    fn job_start(&self, _job: &Job) {}
}
