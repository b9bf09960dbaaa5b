//! Pending-job refresh (C9b, §4.8): re-validates a pending job after a QOS
//! or association edit.

use crate::assoc_tree::World;
use crate::ctx::AcctPolicyCtx;
use crate::hooks::JobAcctStorageHook;
use crate::model::{Job, WaitReason};
use crate::validate::validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Nothing about the job's effective limits changed.
    Unchanged,
    /// The validator clipped `time_limit` further; the storage hook was
    /// notified.
    Clipped,
    /// The job no longer validates at all under the new limits.
    Denied(WaitReason),
}

/// `update_pending_job`. Delegates to [`crate::validate::validate`] with
/// `update_call = true` so the skip rule for TRES fields the job never
/// requested still applies, then diffs `time_limit` before/after to decide
/// whether this was a material change worth a storage notification.
pub fn update_pending_job(
    world: &World,
    ctx: &AcctPolicyCtx,
    hook: &impl JobAcctStorageHook,
    job: &mut Job,
    now: u64,
) -> UpdateStatus {
    let before = job.time_limit;
    let outcome = validate(world, job, true);

    if !outcome.admitted {
        return UpdateStatus::Denied(outcome.reason.unwrap_or(WaitReason::NoReason));
    }

    if job.time_limit != before {
        ctx.touch_last_job_update(now);
        hook.job_start(job);
        return UpdateStatus::Clipped;
    }

    UpdateStatus::Unchanged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NullHooks;
    use crate::model::{Association, Cap, LimitSource, Partition, TresCatalog};

    fn world_with_tightened_assoc() -> World {
        let mut w = World::new(TresCatalog::new(vec!["cpu".into()]));
        let mut a = Association::root(1);
        a.id = 1;
        a.is_root = false;
        a.parent = Some(0);
        a.max_wall_pj = Cap::limited(20);
        w.associations.push(a);
        w.partitions.insert(
            "p".into(),
            Partition {
                name: "p".into(),
                max_time: Cap::UNLIMITED,
                qos: None,
            },
        );
        w
    }

    #[test]
    fn tighter_assoc_limit_clips_and_notifies() {
        let w = world_with_tightened_assoc();
        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            assoc: Some(1),
            partition: "p".into(),
            time_limit: Some(60),
            limit_set: crate::model::LimitSet {
                time: LimitSource::Unset,
                ..Default::default()
            },
            tres_req: w.catalog.unlimited_vec(),
            ..Default::default()
        };

        let status = update_pending_job(&w, &ctx, &NullHooks, &mut job, 555);
        assert_eq!(status, UpdateStatus::Clipped);
        assert_eq!(job.time_limit, Some(20));
        assert_eq!(job.limit_set.time, LimitSource::PolicySet);
        assert_eq!(ctx.last_job_update(), 555);
    }

    #[test]
    fn admin_set_time_limit_is_never_reclipped() {
        let w = world_with_tightened_assoc();
        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            assoc: Some(1),
            partition: "p".into(),
            time_limit: Some(60),
            limit_set: crate::model::LimitSet {
                time: LimitSource::AdminSet,
                ..Default::default()
            },
            tres_req: w.catalog.unlimited_vec(),
            ..Default::default()
        };

        let status = update_pending_job(&w, &ctx, &NullHooks, &mut job, 555);
        assert_eq!(status, UpdateStatus::Unchanged);
        assert_eq!(job.time_limit, Some(60));
        assert_eq!(job.limit_set.time, LimitSource::AdminSet);
        assert_eq!(ctx.last_job_update(), 0);
    }

    #[test]
    fn unchanged_job_reports_unchanged_and_does_not_touch_timestamp() {
        let w = world_with_tightened_assoc();
        let ctx = AcctPolicyCtx::default();
        let mut job = Job {
            assoc: Some(1),
            partition: "p".into(),
            time_limit: Some(10),
            limit_set: crate::model::LimitSet {
                time: LimitSource::Unset,
                ..Default::default()
            },
            tres_req: w.catalog.unlimited_vec(),
            ..Default::default()
        };

        let status = update_pending_job(&w, &ctx, &NullHooks, &mut job, 999);
        assert_eq!(status, UpdateStatus::Unchanged);
        assert_eq!(ctx.last_job_update(), 0);
    }
}
