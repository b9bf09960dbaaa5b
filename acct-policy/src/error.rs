//! Structured domain errors.
//!
//! The engine's policy decisions (held/clipped/admitted/denied) are data,
//! not errors — see [`crate::validate::ValidateOutcome`] and
//! [`crate::model::WaitReason`]. [`EngineError`] is reserved for input the
//! caller should treat as a configuration or programming bug: an unknown
//! association, QOS, or TRES key, or a binding that cannot be resolved at
//! all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The job's (account, partition, user) triple does not resolve to any
    /// loaded association, even after the binder hook was given a chance to
    /// re-bind it.
    #[error(
        "no association for job {job_id} (account={account:?}, partition={partition:?}, user={user_id})"
    )]
    UnresolvedAssociation {
        job_id: u64,
        account: String,
        partition: Option<String>,
        user_id: u32,
    },

    #[error("unknown association id {0}")]
    UnknownAssociation(usize),

    #[error("unknown qos id {0}")]
    UnknownQos(u32),

    #[error("unknown partition '{0}'")]
    UnknownPartition(String),

    #[error("tres catalogue has no resource named '{0}'")]
    UnknownTres(String),
}
