//! Job-side state: the request/allocation fields the engine reads, and the
//! policy-provenance and hold-reason fields it writes.

use super::tres::Cap;

/// Provenance of a limit value currently in effect on a job.
///
/// `AdminSet` and `PolicySet` are deliberately distinct: an admin-set value
/// is authoritative and must never be re-clipped, while `PolicySet` marks a
/// value this crate clipped itself and so remains free to reclip as limits
/// change underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LimitSource {
    #[default]
    Unset,
    UserSet,
    AdminSet,
    PolicySet,
}

impl LimitSource {
    pub fn is_admin_set(self) -> bool {
        matches!(self, LimitSource::AdminSet)
    }
}

/// Per-job provenance record: for each policy-adjustable field, whether its
/// current value came from the user, an admin override, or policy clipping
/// (`Unset`, which in this record also covers "set by policy").
#[derive(Debug, Clone, Default)]
pub struct LimitSet {
    pub time: LimitSource,
    pub max_nodes: LimitSource,
    pub max_tres: Vec<LimitSource>,
    pub min_tres: Vec<LimitSource>,
    pub min_nodes: LimitSource,
}

/// Reason a job is currently held pending, or why it was killed.
///
/// Variants from [`WaitReason::WaitQosGrpCpu`] through
/// [`WaitReason::WaitAssocMaxSubJob`] form one contiguous discriminant range:
/// [`WaitReason::is_policy_hold`] tests membership in that range with a
/// single comparison, matching the external-interface contract that this
/// range is usable as a single "currently held for policy" predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum WaitReason {
    #[default]
    NoReason = 0,
    FailAccount = 1,
    FailTimeout = 2,

    WaitQosGrpCpu = 100,
    WaitQosGrpCpuMin,
    WaitQosGrpCpuRunMin,
    WaitQosGrpMem,
    WaitQosGrpNodes,
    WaitQosGrpSubJob,
    WaitQosGrpWall,
    WaitQosGrpJobs,
    WaitQosMaxCpuPerJob,
    WaitQosMaxCpuPerUser,
    WaitQosMaxNodePerJob,
    WaitQosMaxNodePerUser,
    WaitQosMaxSubJob,
    WaitQosMaxWallPerJob,
    WaitQosMinCpuPerJob,
    WaitQosMaxJobsPerUser,
    WaitQosMaxCpuMinsPerJob,

    WaitAssocGrpCpu,
    WaitAssocGrpCpuMin,
    WaitAssocGrpCpuRunMin,
    WaitAssocGrpMem,
    WaitAssocGrpNodes,
    WaitAssocGrpSubJob,
    WaitAssocGrpWall,
    WaitAssocGrpJobs,
    WaitAssocMaxCpuPerJob,
    WaitAssocMaxNodePerJob,
    WaitAssocMaxWallPerJob,
    WaitAssocMaxSubJob,
}

impl WaitReason {
    /// `true` iff this code falls in the contiguous policy-hold range.
    pub fn is_policy_hold(self) -> bool {
        let v = self as u32;
        (WaitReason::WaitQosGrpCpu as u32..=WaitReason::WaitAssocMaxSubJob as u32).contains(&v)
    }
}

/// The job fields the engine reads or writes. Everything the selector,
/// placement, and persistence own (out of scope) is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct Job {
    pub id: u64,
    pub user_id: u32,
    /// Arena index into the association tree, once resolved.
    pub assoc: Option<usize>,
    pub account: String,
    pub qos: Option<u32>,
    pub partition: String,

    // ── Request ──────────────────────────────────────────────────────────
    /// `None` = not requested by the user (subject to clipping).
    pub time_limit: Option<u64>,
    pub min_nodes: u32,
    pub max_nodes: Option<u32>,
    pub tres_req: Vec<Cap>,
    pub pn_min_memory: u64,
    pub mem_per_cpu: bool,

    // ── Allocation (filled in by the selector before post-select) ───────
    pub total_cpus: u64,
    pub node_cnt: u32,
    pub start_time: Option<u64>,
    pub tot_sus_time: u64,

    // ── Policy state ─────────────────────────────────────────────────────
    pub state_reason: WaitReason,
    pub state_desc: String,
    pub end_time_exp: Option<u64>,
    pub limit_set: LimitSet,
}

impl Job {
    /// `job_memory` per the usage-adjuster spec: `pn_min_memory == 0` always
    /// yields zero, otherwise scaled by CPUs (MEM_PER_CPU) or by node count.
    pub fn job_memory(&self) -> u64 {
        if self.pn_min_memory == 0 {
            return 0;
        }
        if self.mem_per_cpu {
            self.pn_min_memory.saturating_mul(self.total_cpus)
        } else {
            self.pn_min_memory.saturating_mul(self.node_cnt as u64)
        }
    }

    /// `true` if `state_reason` is currently one of the accounting-hold
    /// codes pre-select clears before re-evaluating (§4.4 step 3).
    pub fn is_accounting_held(&self) -> bool {
        self.state_reason.is_policy_hold()
    }
}
