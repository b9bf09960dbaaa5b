//! Post-select runnable check (C7, §4.5): the final admission gate once the
//! selector has proposed a concrete `(node_cnt, cpu_cnt, pn_min_memory)`.

use tracing::{debug, info};

use crate::assoc_tree::World;
use crate::ctx::AcctPolicyCtx;
use crate::model::{Cap, Job, Qos, WaitReason};
use crate::qos_order::resolve_in_world;

fn deny(job: &mut Job, reason: WaitReason, desc: impl Into<String>) -> bool {
    let desc = desc.into();
    info!(job_id = job.id, ?reason, %desc, "job held pending (post-select)");
    job.state_reason = reason;
    job.state_desc = desc;
    false
}

struct Inputs {
    job_cpu_time_limit: u64,
    job_memory: u64,
    cpu_cnt: u64,
    node_cnt: u64,
    safe: bool,
}

/// `grp_cpu_mins` with the safe-limits variant (§4.5, §4.6 glossary "Safe
/// limits"): additionally requires the job be able to run to completion out
/// of the remaining budget, not just start.
fn grp_cpu_mins_violated(limit: Cap, usage_raw_secs: u64, run_secs: u64, inputs: &Inputs) -> bool {
    let Some(limit) = limit.value() else { return false };
    let usage_mins = usage_raw_secs / 60;
    if usage_mins > limit {
        return true;
    }
    if inputs.safe {
        let cpu_run_mins = run_secs / 60;
        let remaining = limit.saturating_sub(usage_mins);
        if inputs.job_cpu_time_limit.saturating_add(cpu_run_mins) > remaining {
            return true;
        }
    }
    false
}

fn check_qos(q: &Qos, cpu_idx: Option<usize>, uid: u32, mem_admin_set: bool, inputs: &Inputs) -> Option<WaitReason> {
    if let Some(idx) = cpu_idx {
        if grp_cpu_mins_violated(q.grp_tres_mins[idx], q.usage.usage_raw, q.usage.grp_used_cpu_run_secs, inputs) {
            return Some(WaitReason::WaitQosGrpCpuMin);
        }
        if q.grp_tres[idx].exceeded_by(q.usage.grp_used_cpus + inputs.cpu_cnt) {
            return Some(WaitReason::WaitQosGrpCpu);
        }
    }

    if !mem_admin_set && q.grp_mem.exceeded_by(q.usage.grp_used_mem + inputs.job_memory) {
        return Some(WaitReason::WaitQosGrpMem);
    }

    if let Some(idx) = cpu_idx {
        let cpu_run_mins = q.usage.grp_used_cpu_run_secs / 60;
        if q.grp_tres_run_mins[idx].exceeded_by(cpu_run_mins + inputs.job_cpu_time_limit) {
            return Some(WaitReason::WaitQosGrpCpuRunMin);
        }
    }

    if q.grp_nodes.exceeded_by(q.usage.grp_used_nodes + inputs.node_cnt) {
        return Some(WaitReason::WaitQosGrpNodes);
    }

    if let Some(idx) = cpu_idx {
        if q.max_tres_mins_pj[idx].exceeded_by(inputs.job_cpu_time_limit) {
            return Some(WaitReason::WaitQosMaxCpuMinsPerJob);
        }
        if q.max_tres_pj[idx].exceeded_by(inputs.cpu_cnt) {
            return Some(WaitReason::WaitQosMaxCpuPerJob);
        }
        if let Some(min) = q.min_cpus_pj.value() {
            if inputs.cpu_cnt < min {
                return Some(WaitReason::WaitQosMinCpuPerJob);
            }
        }
        let used_cpus = q.usage.user(uid).cpus;
        if q.max_tres_pu[idx].exceeded_by(used_cpus + inputs.cpu_cnt) {
            return Some(WaitReason::WaitQosMaxCpuPerUser);
        }
    }

    if q.max_nodes_pj.exceeded_by(inputs.node_cnt) {
        return Some(WaitReason::WaitQosMaxNodePerJob);
    }
    let used_nodes = q.usage.user(uid).nodes;
    if q.max_nodes_pu.exceeded_by(used_nodes + inputs.node_cnt) {
        return Some(WaitReason::WaitQosMaxNodePerUser);
    }

    None
}

fn check_assoc(
    assoc: &crate::model::Association,
    cpu_idx: Option<usize>,
    is_first: bool,
    inputs: &Inputs,
) -> Option<WaitReason> {
    if let Some(idx) = cpu_idx {
        if grp_cpu_mins_violated(
            assoc.grp_tres_mins[idx],
            assoc.usage.usage_raw,
            assoc.usage.grp_used_cpu_run_secs,
            inputs,
        ) {
            return Some(WaitReason::WaitAssocGrpCpuMin);
        }
        if assoc.grp_tres[idx].exceeded_by(assoc.usage.grp_used_cpus + inputs.cpu_cnt) {
            return Some(WaitReason::WaitAssocGrpCpu);
        }
    }

    if assoc.grp_mem.exceeded_by(assoc.usage.grp_used_mem + inputs.job_memory) {
        return Some(WaitReason::WaitAssocGrpMem);
    }

    if let Some(idx) = cpu_idx {
        let cpu_run_mins = assoc.usage.grp_used_cpu_run_secs / 60;
        if assoc.grp_tres_run_mins[idx].exceeded_by(cpu_run_mins + inputs.job_cpu_time_limit) {
            return Some(WaitReason::WaitAssocGrpCpuRunMin);
        }
    }

    if assoc.grp_nodes.exceeded_by(assoc.usage.grp_used_nodes + inputs.node_cnt) {
        return Some(WaitReason::WaitAssocGrpNodes);
    }

    if is_first {
        // `max_tres_mins_pj` has no dedicated assoc-scope wait-reason code
        // (only the QOS side does), so it is not independently enforced
        // here; the QOS pass already covers the per-job cpu-minutes cap.
        if let Some(idx) = cpu_idx {
            if assoc.max_tres_pj[idx].exceeded_by(inputs.cpu_cnt) {
                return Some(WaitReason::WaitAssocMaxCpuPerJob);
            }
        }
        if assoc.max_nodes_pj.exceeded_by(inputs.node_cnt) {
            return Some(WaitReason::WaitAssocMaxNodePerJob);
        }
    }

    None
}

/// `job_runnable_post_select`. `job.total_cpus`, `job.node_cnt`, and
/// `job.pn_min_memory` are set from the selector's proposal before the
/// checks run, mirroring the allocation fields `§3` lists as filled in at
/// this point.
pub fn job_runnable_post_select(
    world: &World,
    ctx: &AcctPolicyCtx,
    job: &mut Job,
    node_cnt: u32,
    cpu_cnt: u64,
    pn_min_memory: u64,
) -> bool {
    if !ctx.enforce.limits_enabled() {
        return true;
    }

    job.total_cpus = cpu_cnt;
    job.node_cnt = node_cnt;
    job.pn_min_memory = pn_min_memory;

    let cpu_idx = world.catalog.index_of("cpu");
    let mem_idx = world.catalog.index_of("mem");
    let mem_admin_set = mem_idx
        .and_then(|i| job.limit_set.max_tres.get(i))
        .map(|s| s.is_admin_set())
        .unwrap_or(false);

    let inputs = Inputs {
        job_cpu_time_limit: job.time_limit.unwrap_or(0).saturating_mul(cpu_cnt),
        job_memory: job.job_memory(),
        cpu_cnt,
        node_cnt: node_cnt as u64,
        safe: ctx.enforce.safe(),
    };
    debug!(job_id = job.id, job_cpu_time_limit = inputs.job_cpu_time_limit, job_memory = inputs.job_memory, "post-select check");

    let order = resolve_in_world(world, job);
    for qid in [order.primary, order.secondary].into_iter().flatten() {
        let Some(q) = world.qos(qid) else { continue };
        if let Some(reason) = check_qos(q, cpu_idx, job.user_id, mem_admin_set, &inputs) {
            return deny(job, reason, "qos post-select limit exceeded");
        }
    }

    let Some(assoc_id) = job.assoc else { return true };
    for (i, id) in world.chain_from(assoc_id).into_iter().enumerate() {
        let Some(assoc) = world.assoc(id) else { continue };
        if let Some(reason) = check_assoc(assoc, cpu_idx, i == 0, &inputs) {
            return deny(job, reason, "association post-select limit exceeded");
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::EnforceFlags;
    use crate::model::{Qos, TresCatalog};

    fn world() -> World {
        World::new(TresCatalog::new(vec!["cpu".into(), "mem".into(), "node".into()]))
    }

    #[test]
    fn s3_per_user_cpu_cap_trip() {
        let mut w = world();
        let mut q = Qos::unlimited(1, "q", 3);
        q.max_tres_pu[0] = Cap::limited(8);
        q.usage.user_mut(7).cpus = 6;
        w.qos_table.insert(1, q);

        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            qos: Some(1),
            user_id: 7,
            ..Default::default()
        };

        let admitted = job_runnable_post_select(&w, &ctx, &mut job, 1, 4, 0);
        assert!(!admitted);
        assert_eq!(job.state_reason, WaitReason::WaitQosMaxCpuPerUser);
    }

    #[test]
    fn s4_safe_mode_rejects_when_non_safe_admits() {
        let mut w = world();
        let mut q = Qos::unlimited(1, "q", 3);
        q.grp_tres_mins[0] = Cap::limited(1000);
        q.usage.usage_raw = 900 * 60;
        w.qos_table.insert(1, q);

        let mut job = Job {
            qos: Some(1),
            time_limit: Some(20),
            ..Default::default()
        };

        let non_safe_ctx = AcctPolicyCtx::new(EnforceFlags::LIMITS);
        assert!(job_runnable_post_select(&w, &non_safe_ctx, &mut job.clone(), 1, 10, 0));

        let safe_ctx = AcctPolicyCtx::new(EnforceFlags::LIMITS | EnforceFlags::SAFE);
        let admitted = job_runnable_post_select(&w, &safe_ctx, &mut job, 1, 10, 0);
        assert!(!admitted);
        assert_eq!(job.state_reason, WaitReason::WaitQosGrpCpuMin);
    }

    #[test]
    fn mem_admin_set_short_circuits_grp_mem_check() {
        let mut w = world();
        let mut q = Qos::unlimited(1, "q", 3);
        q.grp_mem = Cap::limited(10);
        q.usage.grp_used_mem = 5;
        w.qos_table.insert(1, q);

        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            qos: Some(1),
            pn_min_memory: 1000,
            mem_per_cpu: false,
            node_cnt: 1,
            limit_set: crate::model::LimitSet {
                max_tres: vec![crate::model::LimitSource::Unset, crate::model::LimitSource::AdminSet, crate::model::LimitSource::Unset],
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(job_runnable_post_select(&w, &ctx, &mut job, 1, 1, 1000));
    }
}
