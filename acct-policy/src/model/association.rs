//! Association-tree node: identity, the group- and per-job-scope limits,
//! and the running usage counters.
//!
//! Associations live in a flat arena ([`crate::assoc_tree::AssocTree`]); the
//! `parent` field here is an index into that same arena rather than a
//! pointer, per the arena/index layout this codebase favours for tree data
//! to avoid ownership cycles.

use super::tres::Cap;

/// Usage counters mutated by the usage adjuster (C4). Every subtraction is
/// saturating; see [`crate::usage`].
#[derive(Debug, Clone, Default)]
pub struct AssocUsage {
    pub used_jobs: u64,
    pub used_submit_jobs: u64,
    pub grp_used_cpus: u64,
    pub grp_used_mem: u64,
    pub grp_used_nodes: u64,
    /// Minutes.
    pub grp_used_wall: u64,
    pub grp_used_cpu_run_secs: u64,
    /// Monotone lifetime counter; never decremented.
    pub usage_raw: u64,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub id: usize,
    pub account: String,
    pub user: Option<String>,
    pub partition: Option<String>,
    /// Arena index of the parent. The root's parent is `None`.
    pub parent: Option<usize>,
    /// `true` for the synthetic root sentinel, excluded from every limit
    /// check (invariant 5).
    pub is_root: bool,

    // ── Group-scope limits ───────────────────────────────────────────────
    pub grp_tres: Vec<Cap>,
    pub grp_tres_mins: Vec<Cap>,
    pub grp_tres_run_mins: Vec<Cap>,
    pub grp_jobs: Cap,
    pub grp_submit_jobs: Cap,
    /// Minutes.
    pub grp_wall: Cap,
    pub grp_mem: Cap,
    pub grp_nodes: Cap,

    // ── Per-job-scope limits ─────────────────────────────────────────────
    pub max_tres_pj: Vec<Cap>,
    pub max_tres_mins_pj: Vec<Cap>,
    pub max_nodes_pj: Cap,
    pub max_wall_pj: Cap,
    pub max_jobs: Cap,
    pub max_submit_jobs: Cap,

    pub usage: AssocUsage,
}

impl Association {
    /// A bare root sentinel with every limit unlimited.
    pub fn root(catalog_len: usize) -> Self {
        Association {
            id: 0,
            account: String::from("root"),
            user: None,
            partition: None,
            parent: None,
            is_root: true,
            grp_tres: vec![Cap::UNLIMITED; catalog_len],
            grp_tres_mins: vec![Cap::UNLIMITED; catalog_len],
            grp_tres_run_mins: vec![Cap::UNLIMITED; catalog_len],
            grp_jobs: Cap::UNLIMITED,
            grp_submit_jobs: Cap::UNLIMITED,
            grp_wall: Cap::UNLIMITED,
            grp_mem: Cap::UNLIMITED,
            grp_nodes: Cap::UNLIMITED,
            max_tres_pj: vec![Cap::UNLIMITED; catalog_len],
            max_tres_mins_pj: vec![Cap::UNLIMITED; catalog_len],
            max_nodes_pj: Cap::UNLIMITED,
            max_wall_pj: Cap::UNLIMITED,
            max_jobs: Cap::UNLIMITED,
            max_submit_jobs: Cap::UNLIMITED,
            usage: AssocUsage::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_sentinel_is_unlimited_and_excluded() {
        let root = Association::root(3);
        assert!(root.is_root);
        assert!(root.parent.is_none());
        assert!(root.grp_nodes.is_unlimited());
        assert_eq!(root.grp_tres.len(), 3);
    }
}
