//! Data model: TRES vectors, associations, QOS records, partitions, and job
//! fields (§3).

pub mod association;
pub mod job;
pub mod partition;
pub mod qos;
pub mod tres;

pub use association::{Association, AssocUsage};
pub use job::{Job, LimitSet, LimitSource, WaitReason};
pub use partition::Partition;
pub use qos::{Qos, QosFlags, QosUsage, UserUsage};
pub use tres::{Cap, TresCatalog};
