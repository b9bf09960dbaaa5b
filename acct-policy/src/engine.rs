//! `Engine`: the public entry point wiring the static [`World`], the
//! threaded [`AcctPolicyCtx`], and the three consumed hooks (§6) behind the
//! assoc/qos lock (§5).

use std::path::Path;

use anyhow::Result;
use tracing::info;

use crate::assoc_tree::World;
use crate::config;
use crate::ctx::AcctPolicyCtx;
use crate::hooks::{AssocBinder, JobAcctStorageHook, PriorityHook};
use crate::lock::AssocQosLock;
use crate::max_nodes;
use crate::model::{Cap, Job, WaitReason};
use crate::pending_refresh::{self, UpdateStatus};
use crate::runnable_post;
use crate::runnable_pre;
use crate::timeout;
use crate::usage::{self, LifecycleEvent};
use crate::validate::{self, ValidateOutcome};

/// Wires together the static world and the three consumed hooks behind one
/// [`AssocQosLock`]. This is the only type most callers need to reach for;
/// everything else in this crate is reachable through it.
pub struct Engine {
    world: AssocQosLock<World>,
    ctx: AcctPolicyCtx,
    binder: Box<dyn AssocBinder + Send + Sync>,
    priority_hook: Box<dyn PriorityHook + Send + Sync>,
    storage_hook: Box<dyn JobAcctStorageHook + Send + Sync>,
}

impl Engine {
    pub fn new(
        world: World,
        ctx: AcctPolicyCtx,
        binder: Box<dyn AssocBinder + Send + Sync>,
        priority_hook: Box<dyn PriorityHook + Send + Sync>,
        storage_hook: Box<dyn JobAcctStorageHook + Send + Sync>,
    ) -> Self {
        info!("accounting-policy engine constructed");
        Engine {
            world: AssocQosLock::new(world),
            ctx,
            binder,
            priority_hook,
            storage_hook,
        }
    }

    /// Loads the static world from a YAML file (C11) and wires it up with
    /// the given hooks.
    pub fn from_config_file(
        path: &Path,
        binder: Box<dyn AssocBinder + Send + Sync>,
        priority_hook: Box<dyn PriorityHook + Send + Sync>,
        storage_hook: Box<dyn JobAcctStorageHook + Send + Sync>,
    ) -> Result<Self> {
        let (world, ctx) = config::load_from_file(path)?;
        Ok(Self::new(world, ctx, binder, priority_hook, storage_hook))
    }

    pub fn add_job_submit(&self, job: &mut Job) {
        let Some(assoc_id) = job.assoc else { return };
        let mut world = self.world.write();
        usage::apply(&mut world, job, assoc_id, LifecycleEvent::AddSubmit);
    }

    pub fn remove_job_submit(&self, job: &mut Job) {
        let Some(assoc_id) = job.assoc else { return };
        let mut world = self.world.write();
        usage::apply(&mut world, job, assoc_id, LifecycleEvent::RemSubmit);
    }

    pub fn job_begin(&self, job: &mut Job) {
        let Some(assoc_id) = job.assoc else { return };
        let mut world = self.world.write();
        usage::apply(&mut world, job, assoc_id, LifecycleEvent::JobBegin);
    }

    /// `job_fini`. The priority-end hook fires only once per job (the
    /// double-fini guard lives in [`crate::usage::apply`]) and always after
    /// the write lock has been released (§5).
    pub fn job_fini(&self, job: &mut Job) {
        let Some(assoc_id) = job.assoc else { return };
        let fire_hook = {
            let mut world = self.world.write();
            usage::apply(&mut world, job, assoc_id, LifecycleEvent::JobFini)
        };
        if fire_hook {
            self.priority_hook.job_end(job);
        }
    }

    pub fn alter_job(&self, job: &mut Job, new_time_limit: u64) {
        let Some(assoc_id) = job.assoc else { return };
        let old_time_limit = job.time_limit.unwrap_or(0);
        job.time_limit = Some(new_time_limit);
        let mut world = self.world.write();
        usage::alter_job(&mut world, job, assoc_id, old_time_limit);
    }

    pub fn validate(&self, job: &mut Job, update_call: bool) -> ValidateOutcome {
        let world = self.world.read();
        validate::validate(&world, job, update_call)
    }

    /// `job_runnable_state`: pure predicate over `state_reason`, taking no
    /// lock (§6).
    pub fn job_runnable_state(&self, job: &Job) -> bool {
        job.state_reason == WaitReason::NoReason
    }

    pub fn job_runnable_pre_select(&self, job: &mut Job) -> bool {
        let world = self.world.read();
        runnable_pre::job_runnable_pre_select(&world, &self.ctx, self.binder.as_ref(), job)
    }

    pub fn job_runnable_post_select(&self, job: &mut Job, node_cnt: u32, cpu_cnt: u64, pn_min_memory: u64) -> bool {
        let world = self.world.read();
        runnable_post::job_runnable_post_select(&world, &self.ctx, job, node_cnt, cpu_cnt, pn_min_memory)
    }

    pub fn job_time_out(&self, job: &mut Job, now: u64) -> bool {
        let world = self.world.read();
        timeout::job_time_out(&world, &self.ctx, job, now)
    }

    pub fn get_max_nodes(&self, job: &Job) -> (Cap, Option<WaitReason>) {
        let world = self.world.read();
        max_nodes::get_max_nodes(&world, job)
    }

    /// `update_pending_job`. The storage hook this delegates to is invoked
    /// from inside [`pending_refresh::update_pending_job`] while the read
    /// lock is held — see the Open-question resolution in `DESIGN.md` for
    /// why that is accepted for this one read-locked path.
    pub fn update_pending_job(&self, job: &mut Job, now: u64) -> UpdateStatus {
        let world = self.world.read();
        pending_refresh::update_pending_job(&world, &self.ctx, self.storage_hook.as_ref(), job, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::EnforceFlags;
    use crate::error::EngineError;
    use crate::hooks::NullHooks;
    use crate::model::{Association, Cap, Qos, TresCatalog};

    struct FixedAssoc(usize);

    impl AssocBinder for FixedAssoc {
        fn fill_in_assoc(&self, _job: &Job) -> Result<usize, EngineError> {
            Ok(self.0)
        }
    }

    fn engine_with_one_assoc() -> Engine {
        let mut world = World::new(TresCatalog::new(vec!["cpu".into()]));
        let mut assoc = Association::root(1);
        assoc.id = 1;
        assoc.is_root = false;
        assoc.parent = Some(0);
        world.associations.push(assoc);

        Engine::new(
            world,
            AcctPolicyCtx::new(EnforceFlags::LIMITS),
            Box::new(FixedAssoc(1)),
            Box::new(NullHooks),
            Box::new(NullHooks),
        )
    }

    #[test]
    fn submit_begin_fini_lifecycle_round_trips_usage() {
        let engine = engine_with_one_assoc();
        let mut job = Job {
            id: 1,
            assoc: Some(1),
            total_cpus: 4,
            end_time_exp: Some(u64::MAX),
            ..Default::default()
        };

        engine.add_job_submit(&mut job);
        engine.job_begin(&mut job);
        engine.job_fini(&mut job);

        assert!(job.end_time_exp.is_none());
    }

    #[test]
    fn job_runnable_state_reflects_state_reason() {
        let engine = engine_with_one_assoc();
        let mut job = Job::default();
        assert!(engine.job_runnable_state(&job));

        job.state_reason = WaitReason::WaitQosGrpNodes;
        assert!(!engine.job_runnable_state(&job));
    }

    #[test]
    fn get_max_nodes_reaches_into_world_via_the_read_lock() {
        let mut world = World::new(TresCatalog::new(vec!["cpu".into()]));
        let mut q = Qos::unlimited(1, "q", 1);
        q.max_nodes_pj = Cap::limited(2);
        world.qos_table.insert(1, q);

        let engine = Engine::new(
            world,
            AcctPolicyCtx::default(),
            Box::new(FixedAssoc(0)),
            Box::new(NullHooks),
            Box::new(NullHooks),
        );

        let job = Job {
            qos: Some(1),
            ..Default::default()
        };
        let (cap, reason) = engine.get_max_nodes(&job);
        assert_eq!(cap, Cap::limited(2));
        assert_eq!(reason, Some(WaitReason::WaitQosMaxNodePerJob));
    }

    #[test]
    fn pre_select_denies_when_binder_fails() {
        struct FailingBinder;
        impl AssocBinder for FailingBinder {
            fn fill_in_assoc(&self, _job: &Job) -> Result<usize, EngineError> {
                Err(EngineError::UnresolvedAssociation {
                    job_id: 1,
                    account: "a".into(),
                    partition: None,
                    user_id: 0,
                })
            }
        }

        let world = World::new(TresCatalog::new(vec!["cpu".into()]));
        let engine = Engine::new(
            world,
            AcctPolicyCtx::default(),
            Box::new(FailingBinder),
            Box::new(NullHooks),
            Box::new(NullHooks),
        );

        let mut job = Job::default();
        assert!(!engine.job_runnable_pre_select(&mut job));
        assert_eq!(job.state_reason, WaitReason::FailAccount);
    }
}
