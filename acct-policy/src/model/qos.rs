//! Quality-of-service override layer: a second limit set, plus the flags
//! that decide override order and strictness, plus per-user usage.

use std::collections::HashMap;

use bitflags::bitflags;

use super::tres::Cap;

bitflags! {
    /// The two flag bits the engine inspects. `bitflags` is used here the
    /// same way this codebase's kernel-facing crates use it for small,
    /// stable flag sets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QosFlags: u32 {
        /// The job's QOS overrides the partition's QOS as primary.
        const PART_QOS = 0b0000_0001;
        /// Soft (clip) violations of this QOS become hard denials.
        const DENY_LIMIT = 0b0000_0010;
    }
}

/// Per-uid usage, lazily created on first write (§4.2 "lazy creation") and
/// never released for a read: see [`QosUsage::user_mut`].
#[derive(Debug, Clone, Default)]
pub struct UserUsage {
    pub jobs: u64,
    pub cpus: u64,
    pub nodes: u64,
    pub submit_jobs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct QosUsage {
    pub grp_used_jobs: u64,
    pub grp_used_submit_jobs: u64,
    pub grp_used_cpus: u64,
    pub grp_used_mem: u64,
    pub grp_used_nodes: u64,
    /// Minutes.
    pub grp_used_wall: u64,
    pub grp_used_cpu_run_secs: u64,
    pub usage_raw: u64,
    pub user_limits: HashMap<u32, UserUsage>,
}

impl QosUsage {
    /// Returns the per-user record for `uid`, inserting a zeroed entry if
    /// this is the first time `uid` has ever been looked up against this
    /// QOS. Both checkers that only read and checkers that also write go
    /// through this path, so a write made during a post-select check is
    /// visible to whatever reads the same entry next — there is no
    /// detached scratch copy.
    pub fn user_mut(&mut self, uid: u32) -> &mut UserUsage {
        self.user_limits.entry(uid).or_default()
    }

    pub fn user(&self, uid: u32) -> UserUsage {
        self.user_limits.get(&uid).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Qos {
    pub id: u32,
    pub name: String,
    pub flags: QosFlags,

    // ── Group scope ──────────────────────────────────────────────────────
    pub grp_tres: Vec<Cap>,
    /// CPU-minutes and friends (e.g. `grp_cpu_mins` is index `cpu` here).
    pub grp_tres_mins: Vec<Cap>,
    pub grp_tres_run_mins: Vec<Cap>,
    pub grp_jobs: Cap,
    pub grp_submit_jobs: Cap,
    /// Minutes.
    pub grp_wall: Cap,
    pub grp_mem: Cap,
    pub grp_nodes: Cap,

    // ── Per-job scope ────────────────────────────────────────────────────
    pub max_tres_pj: Vec<Cap>,
    pub max_tres_mins_pj: Vec<Cap>,
    pub max_nodes_pj: Cap,
    pub max_wall_pj: Cap,
    pub max_jobs_pu: Cap,
    pub min_cpus_pj: Cap,

    // ── Per-user scope ───────────────────────────────────────────────────
    pub max_tres_pu: Vec<Cap>,
    pub max_nodes_pu: Cap,
    pub max_submit_jobs_pu: Cap,

    pub usage: QosUsage,
}

impl Qos {
    /// A QOS with every limit unlimited, for tests and as a base for
    /// partially-specified fixtures.
    pub fn unlimited(id: u32, name: impl Into<String>, catalog_len: usize) -> Self {
        Qos {
            id,
            name: name.into(),
            flags: QosFlags::empty(),
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
            max_jobs_pu: Cap::UNLIMITED,
            min_cpus_pj: Cap::UNLIMITED,
            max_tres_pu: vec![Cap::UNLIMITED; catalog_len],
            max_nodes_pu: Cap::UNLIMITED,
            max_submit_jobs_pu: Cap::UNLIMITED,
            usage: QosUsage::default(),
        }
    }

    /// `true` once any limit on this QOS is violated hard rather than
    /// clipped/held (§ glossary "Strict checking").
    pub fn deny_limit(&self) -> bool {
        self.flags.contains(QosFlags::DENY_LIMIT)
    }

    pub fn part_qos(&self) -> bool {
        self.flags.contains(QosFlags::PART_QOS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_mut_lazily_inserts_and_is_visible_to_later_reads() {
        let mut usage = QosUsage::default();
        assert!(usage.user_limits.is_empty());

        usage.user_mut(7).cpus += 4;
        assert_eq!(usage.user(7).cpus, 4);
        assert_eq!(usage.user_limits.len(), 1);

        // second lookup for a uid with no activity also lazily inserts
        assert_eq!(usage.user_mut(9).cpus, 0);
        assert_eq!(usage.user_limits.len(), 2);
    }

    #[test]
    fn flags_decode_part_qos_and_deny_limit() {
        let both = QosFlags::PART_QOS | QosFlags::DENY_LIMIT;
        assert!(both.contains(QosFlags::PART_QOS));
        assert!(both.contains(QosFlags::DENY_LIMIT));
        assert!(!QosFlags::PART_QOS.contains(QosFlags::DENY_LIMIT));
    }
}
