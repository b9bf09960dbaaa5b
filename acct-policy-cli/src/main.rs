//! Fixture-driven harness for exercising the accounting-policy engine: loads
//! a YAML world (C11) and replays a scripted sequence of lifecycle/check
//! commands against it, printing the resulting `state_reason` or
//! `ValidateOutcome` for each step.
//!
//! Script format (one command per line, `#` starts a comment):
//!
//! ```text
//! job 1 account=physics partition=batch qos=1 time_limit=60 cpus=4 nodes=1
//! submit 1
//! begin 1
//! validate 1
//! maxnodes 1
//! timeout 1 3600
//! fini 1
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use acct_policy::error::EngineError;
use acct_policy::hooks::{AssocBinder, JobAcctStorageHook, PriorityHook};
use acct_policy::model::{Cap, Job};
use acct_policy::Engine;

/// Replays a fixture world and a scripted command sequence against the
/// accounting-policy engine.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to a YAML world configuration (see `acct_policy::config`).
    world: PathBuf,

    /// Path to a scripted command sequence.
    script: PathBuf,
}

/// Resolves a job's association by matching `job.account` (and, if set,
/// `job.partition`) against the associations loaded from the fixture world.
/// A real deployment's binder would consult the live association tree
/// directly; this harness precomputes the lookup table once at startup.
struct AccountBinder {
    by_account: HashMap<String, usize>,
}

impl AssocBinder for AccountBinder {
    fn fill_in_assoc(&self, job: &Job) -> Result<usize, EngineError> {
        self.by_account
            .get(&job.account)
            .copied()
            .ok_or_else(|| EngineError::UnresolvedAssociation {
                job_id: job.id,
                account: job.account.clone(),
                partition: Some(job.partition.clone()),
                user_id: job.user_id,
            })
    }
}

struct LoggingHooks;

impl PriorityHook for LoggingHooks {
    fn job_end(&self, job: &Job) {
        info!(job_id = job.id, "priority hook: job_end");
    }
}

impl JobAcctStorageHook for LoggingHooks {
    fn job_start(&self, job: &Job) {
        info!(job_id = job.id, "storage hook: job_start (limits changed)");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();

    let (world, ctx) = acct_policy::config::load_from_file(&args.world)
        .with_context(|| format!("loading world from {}", args.world.display()))?;

    let mut by_account = HashMap::new();
    for assoc in &world.associations {
        if !assoc.is_root {
            by_account.entry(assoc.account.clone()).or_insert(assoc.id);
        }
    }
    let binder = AccountBinder {
        by_account: by_account.clone(),
    };

    let engine = Engine::new(world, ctx, Box::new(binder), Box::new(LoggingHooks), Box::new(LoggingHooks));

    let script = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;

    let mut jobs: HashMap<u64, Job> = HashMap::new();
    run_script(&engine, &by_account, &script, &mut jobs)
}

fn run_script(engine: &Engine, by_account: &HashMap<String, usize>, script: &str, jobs: &mut HashMap<u64, Job>) -> Result<()> {
    for (line_no, raw) in script.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();

        run_command(engine, by_account, cmd, &rest, jobs)
            .with_context(|| format!("script line {}: {line}", line_no + 1))?;
    }
    Ok(())
}

fn run_command(
    engine: &Engine,
    by_account: &HashMap<String, usize>,
    cmd: &str,
    rest: &[&str],
    jobs: &mut HashMap<u64, Job>,
) -> Result<()> {
    match cmd {
        "job" => {
            let [id_str, fields @ ..] = rest else { bail!("`job` needs an id") };
            let id: u64 = id_str.parse().context("job id must be a number")?;
            let mut job = Job {
                id,
                ..Default::default()
            };
            for field in fields {
                apply_field(&mut job, field)?;
            }
            job.assoc = by_account.get(&job.account).copied();
            jobs.insert(id, job);
        }
        "submit" => {
            let job = job_mut(rest, jobs)?;
            engine.add_job_submit(job);
            info!(job_id = job.id, "add_job_submit");
        }
        "unsubmit" => {
            let job = job_mut(rest, jobs)?;
            engine.remove_job_submit(job);
            info!(job_id = job.id, "remove_job_submit");
        }
        "begin" => {
            let job = job_mut(rest, jobs)?;
            job.start_time.get_or_insert(0);
            engine.job_begin(job);
            info!(job_id = job.id, "job_begin");
        }
        "fini" => {
            let job = job_mut(rest, jobs)?;
            job.end_time_exp.get_or_insert(u64::MAX);
            engine.job_fini(job);
            info!(job_id = job.id, "job_fini");
        }
        "validate" => {
            let job = job_mut(rest, jobs)?;
            let outcome = engine.validate(job, false);
            println!("job {}: validate -> {outcome:?}", job.id);
        }
        "preselect" => {
            let job = job_mut(rest, jobs)?;
            let admitted = engine.job_runnable_pre_select(job);
            println!("job {}: pre-select -> admitted={admitted} reason={:?}", job.id, job.state_reason);
        }
        "postselect" => {
            let [id_str, node_cnt, cpu_cnt, mem] = rest else {
                bail!("`postselect` needs <id> <node_cnt> <cpu_cnt> <pn_min_memory>")
            };
            let job = lookup_job_mut(id_str, jobs)?;
            let node_cnt: u32 = node_cnt.parse().context("node_cnt must be a number")?;
            let cpu_cnt: u64 = cpu_cnt.parse().context("cpu_cnt must be a number")?;
            let mem: u64 = mem.parse().context("pn_min_memory must be a number")?;
            let admitted = engine.job_runnable_post_select(job, node_cnt, cpu_cnt, mem);
            println!("job {}: post-select -> admitted={admitted} reason={:?}", job.id, job.state_reason);
        }
        "timeout" => {
            let [id_str, now] = rest else { bail!("`timeout` needs <id> <now>") };
            let job = lookup_job_mut(id_str, jobs)?;
            let now: u64 = now.parse().context("now must be a number")?;
            let timed_out = engine.job_time_out(job, now);
            println!("job {}: time_out -> {timed_out}", job.id);
        }
        "maxnodes" => {
            let job = job_ref(rest, jobs)?;
            let (cap, reason) = engine.get_max_nodes(job);
            println!("job {}: max_nodes -> {} reason={reason:?}", job.id, describe_cap(cap));
        }
        "refresh" => {
            let [id_str, now] = rest else { bail!("`refresh` needs <id> <now>") };
            let job = lookup_job_mut(id_str, jobs)?;
            let now: u64 = now.parse().context("now must be a number")?;
            let status = engine.update_pending_job(job, now);
            println!("job {}: update_pending_job -> {status:?}", job.id);
        }
        other => {
            warn!(cmd = other, "unknown script command, skipping");
        }
    }
    Ok(())
}

fn apply_field(job: &mut Job, field: &str) -> Result<()> {
    let Some((key, value)) = field.split_once('=') else {
        bail!("expected key=value, got '{field}'");
    };
    match key {
        "account" => job.account = value.to_string(),
        "partition" => job.partition = value.to_string(),
        "user" => job.user_id = value.parse().context("user must be a number")?,
        "qos" => job.qos = Some(value.parse().context("qos must be a number")?),
        "time_limit" => job.time_limit = Some(value.parse().context("time_limit must be a number")?),
        "min_nodes" => job.min_nodes = value.parse().context("min_nodes must be a number")?,
        "cpus" => job.total_cpus = value.parse().context("cpus must be a number")?,
        "nodes" => job.node_cnt = value.parse().context("nodes must be a number")?,
        "mem" => job.pn_min_memory = value.parse().context("mem must be a number")?,
        other => bail!("unknown job field '{other}'"),
    }
    Ok(())
}

fn job_mut<'a>(rest: &[&str], jobs: &'a mut HashMap<u64, Job>) -> Result<&'a mut Job> {
    let [id_str] = rest else { bail!("expected exactly one job id") };
    lookup_job_mut(id_str, jobs)
}

fn job_ref<'a>(rest: &[&str], jobs: &'a HashMap<u64, Job>) -> Result<&'a Job> {
    let [id_str] = rest else { bail!("expected exactly one job id") };
    let id: u64 = id_str.parse().context("job id must be a number")?;
    jobs.get(&id).with_context(|| format!("no such job {id}; use `job {id} ...` first"))
}

fn lookup_job_mut<'a>(id_str: &str, jobs: &'a mut HashMap<u64, Job>) -> Result<&'a mut Job> {
    let id: u64 = id_str.parse().context("job id must be a number")?;
    jobs.get_mut(&id).with_context(|| format!("no such job {id}; use `job {id} ...` first"))
}

fn describe_cap(cap: Cap) -> String {
    match cap.value() {
        Some(v) => v.to_string(),
        None => "unlimited".to_string(),
    }
}
