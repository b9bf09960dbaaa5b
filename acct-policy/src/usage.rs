//! Usage adjuster (C4, §4.2): applies lifecycle deltas to QOS and
//! association counters with a saturating underflow guard.

use tracing::{debug, warn};

use crate::assoc_tree::World;
use crate::model::{Association, Job, Qos};
use crate::qos_order::resolve_in_world;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    AddSubmit,
    RemSubmit,
    JobBegin,
    JobFini,
}

/// Subtracts `delta` from `*counter`, saturating at zero and logging once
/// the decrement would have gone negative (§7 "Underflow", S5).
fn sub_saturating(counter: &mut u64, delta: u64, field: &str, job_id: u64) {
    let new_value = counter.saturating_sub(delta);
    if delta > *counter {
        debug!(
            job_id,
            field, prior = *counter, delta, "usage counter underflow clamped to zero"
        );
    }
    *counter = new_value;
}

/// Applies one lifecycle event's delta to the QOS pair and the full
/// association chain rooted at `assoc_id`. Returns `true` on `JobFini` when
/// the priority-end hook should be invoked by the caller — outside the
/// lock, per the concurrency contract (§5).
pub fn apply(world: &mut World, job: &mut Job, assoc_id: usize, event: LifecycleEvent) -> bool {
    if event == LifecycleEvent::JobFini && job.end_time_exp.is_none() {
        // Double-fini guard: a prior JOB_FINI already withdrew this job's
        // contribution and cleared `end_time_exp`.
        debug!(job_id = job.id, "job_fini ignored: already finalized");
        return false;
    }

    if event == LifecycleEvent::JobBegin {
        job.start_time.get_or_insert(0);
    }

    let job_memory = job.job_memory();
    let used_cpu_run_secs = job
        .total_cpus
        .saturating_mul(job.time_limit.unwrap_or(0))
        .saturating_mul(60);

    let order = resolve_in_world(world, job);
    for qos_id in [order.primary, order.secondary].into_iter().flatten() {
        if let Some(qos) = world.qos_mut(qos_id) {
            apply_to_qos(qos, job, event, job_memory, used_cpu_run_secs);
        }
    }

    for id in world.chain_from(assoc_id) {
        if let Some(assoc) = world.assoc_mut(id) {
            apply_to_assoc(assoc, job, event, job_memory, used_cpu_run_secs);
        }
    }

    if event == LifecycleEvent::JobFini {
        job.end_time_exp = None;
        return true;
    }

    false
}

/// `alter_job`: the only edge that touches an already-running job's
/// `grp_used_cpu_run_secs`, by the signed difference between the new and
/// old `total_cpus * time_limit * 60` products (P3).
pub fn alter_job(world: &mut World, job: &Job, assoc_id: usize, old_time_limit: u64) {
    let new_secs = job
        .total_cpus
        .saturating_mul(job.time_limit.unwrap_or(0))
        .saturating_mul(60);
    let old_secs = job.total_cpus.saturating_mul(old_time_limit).saturating_mul(60);

    let order = resolve_in_world(world, job);
    for qos_id in [order.primary, order.secondary].into_iter().flatten() {
        if let Some(qos) = world.qos_mut(qos_id) {
            apply_run_secs_delta(&mut qos.usage.grp_used_cpu_run_secs, old_secs, new_secs, job.id);
        }
    }
    for id in world.chain_from(assoc_id) {
        if let Some(assoc) = world.assoc_mut(id) {
            apply_run_secs_delta(&mut assoc.usage.grp_used_cpu_run_secs, old_secs, new_secs, job.id);
        }
    }
}

fn apply_run_secs_delta(counter: &mut u64, old_secs: u64, new_secs: u64, job_id: u64) {
    if new_secs >= old_secs {
        *counter = counter.saturating_add(new_secs - old_secs);
    } else {
        sub_saturating(counter, old_secs - new_secs, "grp_used_cpu_run_secs", job_id);
    }
}

fn apply_to_qos(qos: &mut Qos, job: &Job, event: LifecycleEvent, job_memory: u64, used_cpu_run_secs: u64) {
    let uid = job.user_id;
    match event {
        LifecycleEvent::AddSubmit => {
            qos.usage.grp_used_submit_jobs = qos.usage.grp_used_submit_jobs.saturating_add(1);
            qos.usage.user_mut(uid).submit_jobs += 1;
        }
        LifecycleEvent::RemSubmit => {
            sub_saturating(&mut qos.usage.grp_used_submit_jobs, 1, "qos.grp_used_submit_jobs", job.id);
            let user = qos.usage.user_mut(uid);
            sub_saturating(&mut user.submit_jobs, 1, "qos.user.submit_jobs", job.id);
        }
        LifecycleEvent::JobBegin => {
            qos.usage.grp_used_jobs = qos.usage.grp_used_jobs.saturating_add(1);
            qos.usage.grp_used_cpus = qos.usage.grp_used_cpus.saturating_add(job.total_cpus);
            qos.usage.grp_used_mem = qos.usage.grp_used_mem.saturating_add(job_memory);
            qos.usage.grp_used_nodes = qos.usage.grp_used_nodes.saturating_add(job.node_cnt as u64);
            qos.usage.grp_used_cpu_run_secs = qos.usage.grp_used_cpu_run_secs.saturating_add(used_cpu_run_secs);
            let user = qos.usage.user_mut(uid);
            user.jobs += 1;
            user.cpus = user.cpus.saturating_add(job.total_cpus);
            user.nodes = user.nodes.saturating_add(job.node_cnt as u64);
        }
        LifecycleEvent::JobFini => {
            sub_saturating(&mut qos.usage.grp_used_jobs, 1, "qos.grp_used_jobs", job.id);
            sub_saturating(&mut qos.usage.grp_used_cpus, job.total_cpus, "qos.grp_used_cpus", job.id);
            sub_saturating(&mut qos.usage.grp_used_mem, job_memory, "qos.grp_used_mem", job.id);
            sub_saturating(&mut qos.usage.grp_used_nodes, job.node_cnt as u64, "qos.grp_used_nodes", job.id);
            sub_saturating(
                &mut qos.usage.grp_used_cpu_run_secs,
                used_cpu_run_secs,
                "qos.grp_used_cpu_run_secs",
                job.id,
            );
            let user = qos.usage.user_mut(uid);
            sub_saturating(&mut user.jobs, 1, "qos.user.jobs", job.id);
            sub_saturating(&mut user.cpus, job.total_cpus, "qos.user.cpus", job.id);
            sub_saturating(&mut user.nodes, job.node_cnt as u64, "qos.user.nodes", job.id);
        }
    }
}

fn apply_to_assoc(
    assoc: &mut Association,
    job: &Job,
    event: LifecycleEvent,
    job_memory: u64,
    used_cpu_run_secs: u64,
) {
    match event {
        LifecycleEvent::AddSubmit => {
            assoc.usage.used_submit_jobs = assoc.usage.used_submit_jobs.saturating_add(1);
        }
        LifecycleEvent::RemSubmit => {
            sub_saturating(&mut assoc.usage.used_submit_jobs, 1, "assoc.used_submit_jobs", job.id);
        }
        LifecycleEvent::JobBegin => {
            assoc.usage.used_jobs = assoc.usage.used_jobs.saturating_add(1);
            assoc.usage.grp_used_cpus = assoc.usage.grp_used_cpus.saturating_add(job.total_cpus);
            assoc.usage.grp_used_mem = assoc.usage.grp_used_mem.saturating_add(job_memory);
            assoc.usage.grp_used_nodes = assoc.usage.grp_used_nodes.saturating_add(job.node_cnt as u64);
            assoc.usage.grp_used_cpu_run_secs =
                assoc.usage.grp_used_cpu_run_secs.saturating_add(used_cpu_run_secs);
            assoc.usage.usage_raw = assoc.usage.usage_raw.saturating_add(used_cpu_run_secs);
        }
        LifecycleEvent::JobFini => {
            sub_saturating(&mut assoc.usage.used_jobs, 1, "assoc.used_jobs", job.id);
            sub_saturating(&mut assoc.usage.grp_used_cpus, job.total_cpus, "assoc.grp_used_cpus", job.id);
            sub_saturating(&mut assoc.usage.grp_used_mem, job_memory, "assoc.grp_used_mem", job.id);
            sub_saturating(
                &mut assoc.usage.grp_used_nodes,
                job.node_cnt as u64,
                "assoc.grp_used_nodes",
                job.id,
            );
            sub_saturating(
                &mut assoc.usage.grp_used_cpu_run_secs,
                used_cpu_run_secs,
                "assoc.grp_used_cpu_run_secs",
                job.id,
            );
        }
    }

    if matches!(event, LifecycleEvent::JobBegin | LifecycleEvent::JobFini) {
        warn_if_out_of_order(assoc, job);
    }
}

/// The engine tolerates out-of-order lifecycle deltas via saturating
/// arithmetic but logs a warning, per the ordering contract in §5.
fn warn_if_out_of_order(assoc: &Association, job: &Job) {
    if assoc.usage.used_jobs == 0 && assoc.usage.grp_used_cpus > 0 {
        warn!(
            job_id = job.id,
            assoc_id = assoc.id,
            "usage counters inconsistent: cpus charged with zero jobs recorded"
        );
    }
}
