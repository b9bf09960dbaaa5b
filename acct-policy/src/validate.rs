//! Submit-time validator (C5, §4.3).

use crate::assoc_tree::World;
use crate::model::{Cap, Job, LimitSource, Qos, WaitReason};
use crate::qos_order::{resolve_in_world, QosOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub admitted: bool,
    pub reason: Option<WaitReason>,
}

impl ValidateOutcome {
    fn admit() -> Self {
        ValidateOutcome {
            admitted: true,
            reason: None,
        }
    }

    fn deny(reason: WaitReason) -> Self {
        ValidateOutcome {
            admitted: false,
            reason: Some(reason),
        }
    }
}

/// Picks whichever QOS in `order` actually constrains the limit selected by
/// `limit_of` — primary if it sets a finite value, secondary only if
/// primary left it unlimited. This is the "first wins, second fills" rule
/// (§4.1) applied per limit rather than to a merged scratch record, so the
/// usage counters read alongside the limit always belong to the QOS that
/// supplied it.
fn pick<'a>(world: &'a World, order: QosOrder, limit_of: impl Fn(&Qos) -> Cap) -> Option<&'a Qos> {
    if let Some(p) = order.primary.and_then(|id| world.qos(id)) {
        if !limit_of(p).is_unlimited() {
            return Some(p);
        }
    }
    if let Some(s) = order.secondary.and_then(|id| world.qos(id)) {
        if !limit_of(s).is_unlimited() {
            return Some(s);
        }
    }
    order
        .primary
        .and_then(|id| world.qos(id))
        .or_else(|| order.secondary.and_then(|id| world.qos(id)))
}

fn cpu_index(world: &World) -> Option<usize> {
    world.catalog.index_of("cpu")
}

/// The group-level assoc wait-reason for a named TRES dimension, or `None`
/// if this TRES has no dedicated code (§4.3's `_validate_tres_limits` walks
/// every TRES index; only the ones with a reason code in the fixed
/// enumeration can actually trip a hold here).
fn assoc_grp_tres_reason(name: &str) -> Option<WaitReason> {
    match name {
        "cpu" => Some(WaitReason::WaitAssocGrpCpu),
        "mem" => Some(WaitReason::WaitAssocGrpMem),
        "node" => Some(WaitReason::WaitAssocGrpNodes),
        _ => None,
    }
}

/// As [`assoc_grp_tres_reason`], for the per-job (`max_tres_pj`) cap.
fn assoc_max_tres_pj_reason(name: &str) -> Option<WaitReason> {
    match name {
        "cpu" => Some(WaitReason::WaitAssocMaxCpuPerJob),
        "node" => Some(WaitReason::WaitAssocMaxNodePerJob),
        _ => None,
    }
}

/// `validate(job_desc, part, assoc, qos, update_call)`. This API always
/// produces a reason on deny, so `strict_checking` per §4.3 collapses to
/// "any resolved QOS carries `DENY_LIMIT`" — the other half of the source
/// condition ("caller supplied a non-null reason pointer") is always true
/// here.
pub fn validate(world: &World, job: &mut Job, update_call: bool) -> ValidateOutcome {
    let order = resolve_in_world(world, job);
    let strict = order
        .primary
        .and_then(|id| world.qos(id))
        .map(|q| q.deny_limit())
        .unwrap_or(false)
        || order
            .secondary
            .and_then(|id| world.qos(id))
            .map(|q| q.deny_limit())
            .unwrap_or(false);

    if let Some(r) = check_qos_pass(world, order, job) {
        return ValidateOutcome::deny(r);
    }

    let Some(assoc_id) = job.assoc else {
        return ValidateOutcome::admit();
    };
    let chain = world.chain_from(assoc_id);

    for (i, &id) in chain.iter().enumerate() {
        let Some(assoc) = world.assoc(id) else { continue };
        let is_first = i == 0;

        for idx in 0..world.catalog.len() {
            let Some(grp_reason) = world.catalog.name_of(idx).and_then(assoc_grp_tres_reason) else {
                continue;
            };

            let qos_sets_cap = order
                .primary
                .and_then(|id| world.qos(id))
                .map(|q| !q.max_tres_pj.get(idx).copied().unwrap_or(Cap::UNLIMITED).is_unlimited())
                .unwrap_or(false);
            let admin_set = job
                .limit_set
                .max_tres
                .get(idx)
                .copied()
                .unwrap_or_default()
                .is_admin_set();
            let job_req = job.tres_req.get(idx).copied().unwrap_or(Cap::UNLIMITED);
            let skip = admin_set
                || qos_sets_cap
                || assoc.grp_tres.get(idx).copied().unwrap_or(Cap::UNLIMITED).is_unlimited()
                || (update_call && job_req.is_unlimited());
            if !skip {
                if let (Some(req), grp_cap) = (job_req.value(), assoc.grp_tres[idx]) {
                    if grp_cap.exceeded_by(req) {
                        return ValidateOutcome::deny(grp_reason);
                    }
                }
            }
        }

        if assoc.grp_nodes.exceeded_by(job.min_nodes as u64) {
            return ValidateOutcome::deny(WaitReason::WaitAssocGrpNodes);
        }
        if assoc.grp_submit_jobs.exceeded_by(assoc.usage.used_submit_jobs + 1) {
            return ValidateOutcome::deny(WaitReason::WaitAssocGrpSubJob);
        }

        if is_first {
            for idx in 0..world.catalog.len() {
                let Some(max_pj_reason) = world.catalog.name_of(idx).and_then(assoc_max_tres_pj_reason) else {
                    continue;
                };
                let req = job.tres_req.get(idx).and_then(|c| c.value());
                if let (Some(req), max_cap) = (req, assoc.max_tres_pj[idx]) {
                    if max_cap.exceeded_by(req) {
                        return ValidateOutcome::deny(max_pj_reason);
                    }
                }
            }
            if assoc.max_nodes_pj.exceeded_by(job.min_nodes as u64) {
                return ValidateOutcome::deny(WaitReason::WaitAssocMaxNodePerJob);
            }
            if assoc.max_submit_jobs.exceeded_by(assoc.usage.used_submit_jobs + 1) {
                return ValidateOutcome::deny(WaitReason::WaitAssocMaxSubJob);
            }

            if let Some(r) = clip_time_limit(job, assoc.max_wall_pj, WaitReason::WaitAssocMaxWallPerJob, strict) {
                return ValidateOutcome::deny(r);
            }
        }
    }

    if let Some(part) = world.partitions.get(&job.partition) {
        if let Some(r) = clip_time_limit(job, part.max_time, WaitReason::WaitAssocMaxWallPerJob, strict) {
            return ValidateOutcome::deny(r);
        }
    }

    ValidateOutcome::admit()
}

fn check_qos_pass(world: &World, order: QosOrder, job: &mut Job) -> Option<WaitReason> {
    if order.primary.is_none() && order.secondary.is_none() {
        return None;
    }
    let cpu_idx = cpu_index(world);
    let strict = order
        .primary
        .and_then(|id| world.qos(id))
        .map(|q| q.deny_limit())
        .unwrap_or(false)
        || order
            .secondary
            .and_then(|id| world.qos(id))
            .map(|q| q.deny_limit())
            .unwrap_or(false);

    // per-user CPU cap
    if let Some(idx) = cpu_idx {
        if let Some(q) = pick(world, order, |q| q.max_tres_pu.get(idx).copied().unwrap_or(Cap::UNLIMITED)) {
            let requested = job.tres_req.get(idx).and_then(|c| c.value()).unwrap_or(0);
            let used = q.usage.user(job.user_id).cpus;
            if q.max_tres_pu[idx].exceeded_by(used + requested) {
                return Some(WaitReason::WaitQosMaxCpuPerUser);
            }
        }

        // group CPU cap
        if let Some(q) = pick(world, order, |q| q.grp_tres.get(idx).copied().unwrap_or(Cap::UNLIMITED)) {
            let requested = job.tres_req.get(idx).and_then(|c| c.value()).unwrap_or(0);
            if q.grp_tres[idx].exceeded_by(q.usage.grp_used_cpus + requested) {
                return Some(WaitReason::WaitQosGrpCpu);
            }
        }
    }

    // group memory
    if let Some(q) = pick(world, order, |q| q.grp_mem) {
        if q.grp_mem.exceeded_by(q.usage.grp_used_mem + job.job_memory()) {
            return Some(WaitReason::WaitQosGrpMem);
        }
    }

    // per-user node cap
    if let Some(q) = pick(world, order, |q| q.max_nodes_pu) {
        let used = q.usage.user(job.user_id).nodes;
        if q.max_nodes_pu.exceeded_by(used + job.min_nodes as u64) {
            return Some(WaitReason::WaitQosMaxNodePerUser);
        }
    }

    // group node cap
    if let Some(q) = pick(world, order, |q| q.grp_nodes) {
        if q.grp_nodes.exceeded_by(q.usage.grp_used_nodes + job.min_nodes as u64) {
            return Some(WaitReason::WaitQosGrpNodes);
        }
    }

    // group submit cap
    if let Some(q) = pick(world, order, |q| q.grp_submit_jobs) {
        if q.grp_submit_jobs.exceeded_by(q.usage.grp_used_submit_jobs + 1) {
            return Some(WaitReason::WaitQosGrpSubJob);
        }
    }

    // max-cpus-per-job (absolute)
    if let Some(idx) = cpu_idx {
        if let Some(q) = pick(world, order, |q| q.max_tres_pj.get(idx).copied().unwrap_or(Cap::UNLIMITED)) {
            let requested = job.tres_req.get(idx).and_then(|c| c.value()).unwrap_or(0);
            if q.max_tres_pj[idx].exceeded_by(requested) {
                return Some(WaitReason::WaitQosMaxCpuPerJob);
            }
        }
    }

    // max-nodes-per-job
    if let Some(q) = pick(world, order, |q| q.max_nodes_pj) {
        if q.max_nodes_pj.exceeded_by(job.min_nodes as u64) {
            return Some(WaitReason::WaitQosMaxNodePerJob);
        }
    }

    // per-user submit cap
    if let Some(q) = pick(world, order, |q| q.max_submit_jobs_pu) {
        let used = q.usage.user(job.user_id).submit_jobs;
        if q.max_submit_jobs_pu.exceeded_by(used + 1) {
            return Some(WaitReason::WaitQosMaxSubJob);
        }
    }

    // max-wall-per-job (may clip job.time_limit)
    if let Some(q) = pick(world, order, |q| q.max_wall_pj) {
        if let Some(r) = clip_time_limit(job, q.max_wall_pj, WaitReason::WaitQosMaxWallPerJob, strict) {
            return Some(r);
        }
    }

    // max-cpu-minutes-per-job: an implied wall-time ceiling derived from
    // the per-job cpu-minutes budget and the job's requested width
    // (`max_cpu_mins / max(req_cpus, req_nodes)`), clipped the same way as
    // an explicit `max_wall_pj` candidate.
    if let Some(idx) = cpu_idx {
        if let Some(q) = pick(world, order, |q| q.max_tres_mins_pj.get(idx).copied().unwrap_or(Cap::UNLIMITED)) {
            if let Some(max_cpu_mins) = q.max_tres_mins_pj[idx].value() {
                let req_cpus = job.tres_req.get(idx).and_then(|c| c.value()).unwrap_or(0);
                let width = req_cpus.max(job.min_nodes as u64).max(1);
                let qos_time_limit = max_cpu_mins / width;
                if let Some(r) =
                    clip_time_limit(job, Cap::limited(qos_time_limit), WaitReason::WaitQosMaxCpuMinsPerJob, strict)
                {
                    return Some(r);
                }
            }
        }
    }

    // min-cpus-per-job
    if let Some(idx) = cpu_idx {
        if let Some(q) = pick(world, order, |q| q.min_cpus_pj) {
            let requested = job.tres_req.get(idx).and_then(|c| c.value()).unwrap_or(0);
            if let Some(min) = q.min_cpus_pj.value() {
                if requested < min {
                    return Some(WaitReason::WaitQosMinCpuPerJob);
                }
            }
        }
    }

    None
}

/// Applies the time-limit clipping discipline (§4.3) against one more
/// candidate cap, returning `Some(reason)` only when a user-set limit
/// exceeds the cap under strict checking. An admin-set limit is
/// authoritative and is left untouched (§4.8: "if the admin had set the
/// time limit, leave it").
fn clip_time_limit(job: &mut Job, cap: Cap, reason: WaitReason, strict: bool) -> Option<WaitReason> {
    let Some(limit) = cap.value() else {
        return None;
    };

    match job.limit_set.time {
        LimitSource::AdminSet => {}
        LimitSource::UserSet => {
            if strict && job.time_limit.map(|t| t > limit).unwrap_or(false) {
                return Some(reason);
            }
        }
        LimitSource::Unset | LimitSource::PolicySet => {
            let clipped = job.time_limit.map(|t| t.min(limit)).unwrap_or(limit);
            job.time_limit = Some(clipped);
            job.limit_set.time = LimitSource::PolicySet;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assoc_tree::World;
    use crate::model::{Association, Partition, TresCatalog};

    fn catalog() -> TresCatalog {
        TresCatalog::new(vec!["cpu".into(), "mem".into(), "node".into()])
    }

    fn assoc_with(grp_nodes: Cap, max_nodes_pj: Cap, max_wall_pj: Cap) -> Association {
        let mut a = Association::root(3);
        a.id = 1;
        a.is_root = false;
        a.parent = Some(0);
        a.grp_nodes = grp_nodes;
        a.max_nodes_pj = max_nodes_pj;
        a.max_wall_pj = max_wall_pj;
        a
    }

    #[test]
    fn s1_submit_within_limits_is_admitted_unchanged() {
        let mut world = World::new(catalog());
        world
            .associations
            .push(assoc_with(Cap::limited(10), Cap::limited(5), Cap::UNLIMITED));
        world.partitions.insert(
            "p".into(),
            Partition {
                name: "p".into(),
                max_time: Cap::limited(120),
                qos: None,
            },
        );

        let mut job = Job {
            assoc: Some(1),
            partition: "p".into(),
            min_nodes: 4,
            time_limit: Some(60),
            limit_set: crate::model::LimitSet {
                time: LimitSource::UserSet,
                ..Default::default()
            },
            tres_req: catalog().unlimited_vec(),
            ..Default::default()
        };

        let outcome = validate(&world, &mut job, false);
        assert!(outcome.admitted);
        assert_eq!(job.time_limit, Some(60));
        assert_eq!(job.limit_set.time, LimitSource::UserSet);
    }

    #[test]
    fn s2_time_clipped_by_partition_and_assoc() {
        let mut world = World::new(catalog());
        world
            .associations
            .push(assoc_with(Cap::limited(10), Cap::limited(5), Cap::limited(45)));
        world.partitions.insert(
            "p".into(),
            Partition {
                name: "p".into(),
                max_time: Cap::limited(30),
                qos: None,
            },
        );

        let mut job = Job {
            assoc: Some(1),
            partition: "p".into(),
            min_nodes: 2,
            time_limit: None,
            tres_req: catalog().unlimited_vec(),
            ..Default::default()
        };

        let outcome = validate(&world, &mut job, false);
        assert!(outcome.admitted);
        assert_eq!(job.time_limit, Some(30));
        assert_eq!(job.limit_set.time, LimitSource::PolicySet);
    }

    #[test]
    fn grp_nodes_violation_denies_with_assoc_reason() {
        let mut world = World::new(catalog());
        world
            .associations
            .push(assoc_with(Cap::limited(3), Cap::UNLIMITED, Cap::UNLIMITED));

        let mut job = Job {
            assoc: Some(1),
            min_nodes: 10,
            tres_req: catalog().unlimited_vec(),
            ..Default::default()
        };

        let outcome = validate(&world, &mut job, false);
        assert!(!outcome.admitted);
        assert_eq!(outcome.reason, Some(WaitReason::WaitAssocGrpNodes));
    }

    #[test]
    fn update_call_skips_tres_check_when_job_value_missing() {
        let mut world = World::new(catalog());
        let mut a = Association::root(3);
        a.id = 1;
        a.is_root = false;
        a.parent = Some(0);
        a.grp_tres[0] = Cap::limited(4); // cpu cap
        world.associations.push(a);

        let mut job = Job {
            assoc: Some(1),
            tres_req: vec![Cap::UNLIMITED, Cap::UNLIMITED, Cap::UNLIMITED],
            ..Default::default()
        };

        // update_call=true and no cpu value requested => skip, admitted
        let outcome = validate(&world, &mut job, true);
        assert!(outcome.admitted);
    }
}
