//! Pre-select runnable check (C6, §4.4): the cheap hold/clear pass run every
//! scheduling cycle before any placement is attempted.

use tracing::{debug, info};

use crate::assoc_tree::World;
use crate::ctx::AcctPolicyCtx;
use crate::hooks::AssocBinder;
use crate::model::{Job, LimitSource, WaitReason};
use crate::qos_order::resolve_in_world;

fn deny(job: &mut Job, reason: WaitReason, desc: impl Into<String>) -> bool {
    let desc = desc.into();
    info!(job_id = job.id, ?reason, %desc, "job held pending (pre-select)");
    job.state_reason = reason;
    job.state_desc = desc;
    false
}

/// `job_runnable_pre_select`. Only uses counters already known without an
/// allocation (`used_jobs`, `used_wall`, and the current `time_limit`).
pub fn job_runnable_pre_select<B: AssocBinder>(
    world: &World,
    ctx: &AcctPolicyCtx,
    binder: &B,
    job: &mut Job,
) -> bool {
    if !ctx.enforce.limits_enabled() {
        return true;
    }

    match binder.fill_in_assoc(job) {
        Ok(id) => job.assoc = Some(id),
        Err(_) => {
            return deny(job, WaitReason::FailAccount, "association binding failed");
        }
    }

    if job.is_accounting_held() {
        debug!(job_id = job.id, "clearing stale accounting hold before re-check");
        job.state_reason = WaitReason::NoReason;
    }

    let order = resolve_in_world(world, job);
    for qid in [order.primary, order.secondary].into_iter().flatten() {
        let Some(q) = world.qos(qid) else { continue };

        if q.grp_jobs.exceeded_by(q.usage.grp_used_jobs) {
            return deny(job, WaitReason::WaitQosGrpJobs, "qos group job count at limit");
        }
        if q.grp_wall.exceeded_by(q.usage.grp_used_wall) {
            return deny(job, WaitReason::WaitQosGrpWall, "qos group wall-time at limit");
        }
        let user = q.usage.user(job.user_id);
        if q.max_jobs_pu.exceeded_by(user.jobs) {
            return deny(job, WaitReason::WaitQosMaxJobsPerUser, "qos per-user job count at limit");
        }
        if wall_exceeds(job, q.max_wall_pj) {
            return deny(job, WaitReason::WaitQosMaxWallPerJob, "qos per-job wall-time limit exceeded");
        }
    }

    let Some(assoc_id) = job.assoc else { return true };
    for (i, id) in world.chain_from(assoc_id).into_iter().enumerate() {
        let Some(assoc) = world.assoc(id) else { continue };

        if assoc.grp_jobs.exceeded_by(assoc.usage.used_jobs) {
            return deny(job, WaitReason::WaitAssocGrpJobs, "assoc group job count at limit");
        }
        if assoc.grp_wall.exceeded_by(assoc.usage.grp_used_wall) {
            return deny(job, WaitReason::WaitAssocGrpWall, "assoc group wall-time at limit");
        }

        // `max_jobs` is only meaningful at the first level (limits are
        // pre-propagated, not re-checked per parent); there is no dedicated
        // wait-reason for it distinct from `grp_jobs`, so only `max_wall_pj`
        // trips a hold here.
        if i == 0 && wall_exceeds(job, assoc.max_wall_pj) {
            return deny(job, WaitReason::WaitAssocMaxWallPerJob, "assoc per-job wall-time limit exceeded");
        }
    }

    true
}

fn wall_exceeds(job: &Job, cap: crate::model::Cap) -> bool {
    let Some(limit) = cap.value() else { return false };
    job.limit_set.time != LimitSource::AdminSet && job.time_limit.map(|t| t > limit).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::EnforceFlags;
    use crate::error::EngineError;
    use crate::model::{Association, Cap, Qos, TresCatalog};

    struct FixedBinder(usize);
    impl AssocBinder for FixedBinder {
        fn fill_in_assoc(&self, _job: &Job) -> Result<usize, EngineError> {
            Ok(self.0)
        }
    }
    struct FailingBinder;
    impl AssocBinder for FailingBinder {
        fn fill_in_assoc(&self, job: &Job) -> Result<usize, EngineError> {
            Err(EngineError::UnresolvedAssociation {
                job_id: job.id,
                account: job.account.clone(),
                partition: Some(job.partition.clone()),
                user_id: job.user_id,
            })
        }
    }

    fn world() -> World {
        World::new(TresCatalog::new(vec!["cpu".into()]))
    }

    #[test]
    fn disabled_enforcement_always_runnable() {
        let ctx = AcctPolicyCtx::new(EnforceFlags::empty());
        let mut job = Job::default();
        assert!(job_runnable_pre_select(&world(), &ctx, &FixedBinder(0), &mut job));
    }

    #[test]
    fn failed_binding_sets_fail_account() {
        let ctx = AcctPolicyCtx::default();
        let mut job = Job::default();
        assert!(!job_runnable_pre_select(&world(), &ctx, &FailingBinder, &mut job));
        assert_eq!(job.state_reason, WaitReason::FailAccount);
    }

    #[test]
    fn stale_policy_hold_is_cleared_before_recheck() {
        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            state_reason: WaitReason::WaitQosGrpCpu,
            ..Default::default()
        };
        assert!(job_runnable_pre_select(&world(), &ctx, &FixedBinder(0), &mut job));
        assert_eq!(job.state_reason, WaitReason::NoReason);
    }

    #[test]
    fn qos_grp_jobs_at_limit_holds_the_job() {
        let ctx = AcctPolicyCtx::default();
        let mut w = world();
        let mut q = Qos::unlimited(1, "q", 1);
        q.grp_jobs = Cap::limited(2);
        q.usage.grp_used_jobs = 2;
        w.qos_table.insert(1, q);

        let mut job = Job {
            qos: Some(1),
            ..Default::default()
        };
        assert!(!job_runnable_pre_select(&w, &ctx, &FixedBinder(0), &mut job));
        assert_eq!(job.state_reason, WaitReason::WaitQosGrpJobs);
    }

    #[test]
    fn assoc_max_wall_exceeded_holds_unless_admin_set() {
        let ctx = AcctPolicyCtx::default();
        let mut w = world();
        let mut a = Association::root(1);
        a.id = 1;
        a.is_root = false;
        a.parent = Some(0);
        a.max_wall_pj = Cap::limited(30);
        w.associations.push(a);

        let mut job = Job {
            assoc: Some(1),
            time_limit: Some(60),
            ..Default::default()
        };
        assert!(!job_runnable_pre_select(&w, &ctx, &FixedBinder(1), &mut job));
        assert_eq!(job.state_reason, WaitReason::WaitAssocMaxWallPerJob);

        let mut admin_job = Job {
            assoc: Some(1),
            time_limit: Some(60),
            limit_set: crate::model::LimitSet {
                time: LimitSource::AdminSet,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(job_runnable_pre_select(&w, &ctx, &FixedBinder(1), &mut admin_job));
    }
}
