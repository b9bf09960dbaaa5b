//! Time-out evaluator (C8, §4.6): decides whether a running job must be
//! killed for wall-time or cpu-minute overrun.

use tracing::info;

use crate::assoc_tree::World;
use crate::ctx::AcctPolicyCtx;
use crate::model::{Cap, Job, Qos, WaitReason};
use crate::qos_order::resolve_in_world;

fn trip(job: &mut Job, ctx: &AcctPolicyCtx, now: u64, reason: &'static str) -> bool {
    info!(job_id = job.id, reason, "job timed out");
    job.state_reason = WaitReason::FailTimeout;
    ctx.touch_last_job_update(now);
    true
}

fn qos_trips(q: &Qos, cpu_idx: Option<usize>, job_cpu_usage_mins: u64, wall_mins: u64) -> bool {
    let usage_mins = q.usage.usage_raw / 60;
    if let Some(idx) = cpu_idx {
        if q.grp_tres_mins[idx].exceeded_by(usage_mins) {
            return true;
        }
    }
    if q.grp_wall.exceeded_by(wall_mins) {
        return true;
    }
    if let Some(idx) = cpu_idx {
        if q.max_tres_mins_pj[idx].exceeded_by(job_cpu_usage_mins) {
            return true;
        }
    }
    false
}

fn assoc_trips(assoc: &crate::model::Association, cpu_idx: Option<usize>, job_cpu_usage_mins: u64, wall_mins: u64) -> bool {
    let usage_mins = assoc.usage.usage_raw / 60;
    if let Some(idx) = cpu_idx {
        if assoc.grp_tres_mins[idx].exceeded_by(usage_mins) {
            return true;
        }
    }
    if assoc.grp_wall.exceeded_by(wall_mins) {
        return true;
    }
    if let Some(idx) = cpu_idx {
        if assoc.max_tres_mins_pj[idx].exceeded_by(job_cpu_usage_mins) {
            return true;
        }
    }
    false
}

/// `job_time_out`. Guarded off entirely under `ACCOUNTING_ENFORCE_SAFE`,
/// since safe mode only ever admits jobs it has already proven can run to
/// completion within budget.
pub fn job_time_out(world: &World, ctx: &AcctPolicyCtx, job: &mut Job, now: u64) -> bool {
    if ctx.enforce.safe() {
        return false;
    }

    let cpu_idx = world.catalog.index_of("cpu");
    let start_time = job.start_time.unwrap_or(now);
    let elapsed_secs = now.saturating_sub(start_time).saturating_sub(job.tot_sus_time);
    let job_cpu_usage_mins = (elapsed_secs / 60).saturating_mul(job.total_cpus);

    let order = resolve_in_world(world, job);
    for qid in [order.primary, order.secondary].into_iter().flatten() {
        let Some(q) = world.qos(qid) else { continue };
        // grp_used_wall is already stored in minutes, not seconds.
        let wall_mins = q.usage.grp_used_wall;
        if qos_trips(q, cpu_idx, job_cpu_usage_mins, wall_mins) {
            return trip(job, ctx, now, "qos cpu-minute or wall-time budget exceeded");
        }
    }

    let Some(assoc_id) = job.assoc else { return false };
    for id in world.chain_from(assoc_id) {
        let Some(assoc) = world.assoc(id) else { continue };
        // grp_used_wall is already stored in minutes, not seconds.
        let wall_mins = assoc.usage.grp_used_wall;
        if assoc_trips(assoc, cpu_idx, job_cpu_usage_mins, wall_mins) {
            return trip(job, ctx, now, "assoc cpu-minute or wall-time budget exceeded");
        }
    }

    false
}
