//! Hierarchical accounting-policy enforcement engine for a batch workload
//! scheduler.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── model/            – data model: TRES vectors, associations, QOS, jobs (§3)
//! ├── assoc_tree.rs      – association arena + the static world (C2)
//! ├── qos_order.rs       – QOS pair resolver (C3)
//! ├── usage.rs           – usage-counter lifecycle adjuster (C4)
//! ├── validate.rs        – submit-time validator (C5)
//! ├── runnable_pre.rs    – pre-select runnable check (C6)
//! ├── runnable_post.rs   – post-select runnable check (C7)
//! ├── timeout.rs         – time-out evaluator (C8)
//! ├── max_nodes.rs       – max-nodes query (C9a)
//! ├── pending_refresh.rs – pending-job re-validation (C9b)
//! ├── hooks.rs           – external collaborator traits (§6)
//! ├── lock.rs            – assoc/qos lock contract (§5)
//! ├── ctx.rs             – threaded enforcement context
//! ├── config.rs          – YAML world loader (C11, §12)
//! ├── error.rs           – `EngineError` (§7, §11)
//! └── engine.rs          – `Engine`, the public entry point wiring it all together
//! ```

pub mod assoc_tree;
pub mod config;
pub mod ctx;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod lock;
pub mod max_nodes;
pub mod model;
pub mod pending_refresh;
pub mod qos_order;
pub mod runnable_post;
pub mod runnable_pre;
pub mod timeout;
pub mod usage;
pub mod validate;

pub use engine::Engine;
pub use error::EngineError;
