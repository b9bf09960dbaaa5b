//! Configuration loading (C11, §12): one static accounting-policy world,
//! described in YAML, following this codebase's `XxxFile`/`XxxEntry`
//! private-struct-feeding-a-public-struct pattern.
//!
//! ```yaml
//! tres: [cpu, mem, node]
//! associations:
//!   - id: 1
//!     parent: root
//!     account: physics
//!     grp_nodes: 8
//! qos:
//!   - id: 1
//!     name: normal
//!     flags: [deny_limit]
//!     max_wall_pj: 120
//! partitions:
//!   - name: batch
//!     max_time: 240
//!     qos: 1
//! accounting_enforce: [limits, associations]
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::assoc_tree::World;
use crate::ctx::{AcctPolicyCtx, EnforceFlags};
use crate::model::{Association, Cap, Partition, Qos, QosFlags, TresCatalog};

// ── Private YAML deserialization types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EngineConfigFile {
    tres: Vec<String>,
    #[serde(default)]
    associations: Vec<AssocEntry>,
    #[serde(default)]
    qos: Vec<QosEntry>,
    #[serde(default)]
    partitions: Vec<PartitionEntry>,
    #[serde(default)]
    accounting_enforce: Vec<String>,
}

/// A `u64` limit field as it appears in YAML: a bare number, or the literal
/// tokens `INF`/`NO_VAL` the source system's two sentinels use for
/// "unlimited". Both collapse to [`Cap::UNLIMITED`] here; see
/// [`crate::model::tres`].
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CapToken {
    Num(u64),
    Token(String),
}

impl CapToken {
    fn to_cap(&self, context: &str) -> Result<Cap> {
        match self {
            CapToken::Num(n) => Ok(Cap::limited(*n)),
            CapToken::Token(s) if s.eq_ignore_ascii_case("inf") || s.eq_ignore_ascii_case("no_val") => {
                Ok(Cap::UNLIMITED)
            }
            CapToken::Token(s) => bail!("invalid limit token '{s}' in {context}"),
        }
    }
}

fn cap_of(value: &Option<CapToken>, context: &str) -> Result<Cap> {
    match value {
        None => Ok(Cap::UNLIMITED),
        Some(token) => token.to_cap(context),
    }
}

fn tres_vec_of(map: &Option<HashMap<String, CapToken>>, catalog: &TresCatalog, context: &str) -> Result<Vec<Cap>> {
    let mut out = catalog.unlimited_vec();
    let Some(map) = map else { return Ok(out) };
    for (name, token) in map {
        let idx = catalog
            .index_of(name)
            .with_context(|| format!("unknown tres '{name}' in {context}"))?;
        out[idx] = token.to_cap(context)?;
    }
    Ok(out)
}

#[derive(Debug, Deserialize, Default)]
struct LimitFields {
    grp_tres: Option<HashMap<String, CapToken>>,
    grp_tres_mins: Option<HashMap<String, CapToken>>,
    grp_tres_run_mins: Option<HashMap<String, CapToken>>,
    grp_jobs: Option<CapToken>,
    grp_submit_jobs: Option<CapToken>,
    grp_wall: Option<CapToken>,
    grp_mem: Option<CapToken>,
    grp_nodes: Option<CapToken>,
    max_tres_pj: Option<HashMap<String, CapToken>>,
    max_tres_mins_pj: Option<HashMap<String, CapToken>>,
    max_nodes_pj: Option<CapToken>,
    max_wall_pj: Option<CapToken>,
    max_jobs: Option<CapToken>,
    max_submit_jobs: Option<CapToken>,
    max_tres_pu: Option<HashMap<String, CapToken>>,
    max_nodes_pu: Option<CapToken>,
    max_submit_jobs_pu: Option<CapToken>,
    max_jobs_pu: Option<CapToken>,
    min_cpus_pj: Option<CapToken>,
}

#[derive(Debug, Deserialize)]
struct AssocEntry {
    id: u32,
    /// Either `"root"` or another entry's `id`.
    #[serde(default)]
    parent: Option<String>,
    account: String,
    user: Option<String>,
    partition: Option<String>,
    #[serde(flatten)]
    limits: LimitFields,
}

#[derive(Debug, Deserialize, Default)]
struct QosFlagsEntry(Vec<String>);

#[derive(Debug, Deserialize)]
struct QosEntry {
    id: u32,
    name: String,
    #[serde(default)]
    flags: QosFlagsEntry,
    #[serde(flatten)]
    limits: LimitFields,
}

#[derive(Debug, Deserialize)]
struct PartitionEntry {
    name: String,
    max_time: Option<CapToken>,
    qos: Option<u32>,
}

// ── Loader ──────────────────────────────────────────────────────────────────

/// Loads `path`, returning the static [`World`] plus an [`AcctPolicyCtx`]
/// carrying the `accounting_enforce` flags parsed from the file.
pub fn load_from_file(path: &Path) -> Result<(World, AcctPolicyCtx)> {
    info!(path = %path.display(), "loading accounting-policy configuration");

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot open configuration file: {}", path.display()))?;

    load_from_str(&content).with_context(|| format!("failed to load configuration from {}", path.display()))
}

/// As [`load_from_file`], but parses an already-read YAML string. Split out
/// so tests do not need a temp file for every malformed-input case.
pub fn load_from_str(content: &str) -> Result<(World, AcctPolicyCtx)> {
    let file: EngineConfigFile = serde_yaml::from_str(content).context("failed to parse YAML")?;

    if file.associations.is_empty() {
        bail!("configuration has no association entries (there must be at least one, besides the implicit root)");
    }

    let catalog = TresCatalog::new(file.tres.clone());
    let mut world = World::new(catalog);

    // Pass 1: insert every association at its eventual arena index, parent
    // resolved to `root` (index 0) as a placeholder.
    let mut id_to_index = HashMap::new();
    for entry in &file.associations {
        let index = world.associations.len();
        id_to_index.insert(entry.id, index);

        let mut assoc = Association::root(world.catalog.len());
        assoc.id = index;
        assoc.is_root = false;
        assoc.parent = Some(0);
        assoc.account = entry.account.clone();
        assoc.user = entry.user.clone();
        assoc.partition = entry.partition.clone();
        apply_limits(&mut assoc, &entry.limits, &world.catalog, &format!("association id {}", entry.id))?;
        world.associations.push(assoc);
    }

    // Pass 2: resolve real parent links now that every id is known.
    for entry in &file.associations {
        let Some(parent_token) = &entry.parent else { continue };
        if parent_token.eq_ignore_ascii_case("root") {
            continue;
        }
        let parent_id: u32 = parent_token
            .parse()
            .with_context(|| format!("association id {}: parent '{parent_token}' is not 'root' or a numeric id", entry.id))?;
        let parent_index = *id_to_index
            .get(&parent_id)
            .with_context(|| format!("association id {}: unknown parent id {parent_id}", entry.id))?;
        let own_index = id_to_index[&entry.id];
        world.associations[own_index].parent = Some(parent_index);
    }

    for entry in &file.qos {
        let mut qos = Qos::unlimited(entry.id, entry.name.clone(), world.catalog.len());
        qos.flags = parse_qos_flags(&entry.flags)?;
        apply_qos_limits(&mut qos, &entry.limits, &world.catalog, &format!("qos id {}", entry.id))?;
        world.qos_table.insert(entry.id, qos);
    }

    for entry in &file.partitions {
        if let Some(qos_id) = entry.qos {
            if !world.qos_table.contains_key(&qos_id) {
                bail!("partition '{}' references unknown qos id {qos_id}", entry.name);
            }
        }
        let partition = Partition {
            name: entry.name.clone(),
            max_time: cap_of(&entry.max_time, &format!("partition '{}'", entry.name))?,
            qos: entry.qos,
        };
        world.partitions.insert(entry.name.clone(), partition);
    }

    let enforce = parse_enforce_flags(&file.accounting_enforce)?;
    let ctx = AcctPolicyCtx::new(enforce);

    debug!(
        associations = world.associations.len() - 1,
        qos = world.qos_table.len(),
        partitions = world.partitions.len(),
        "configuration loaded"
    );
    info!(
        associations = world.associations.len() - 1,
        qos = world.qos_table.len(),
        partitions = world.partitions.len(),
        enforce = ?enforce,
        "accounting-policy world ready"
    );

    Ok((world, ctx))
}

fn apply_limits(assoc: &mut Association, limits: &LimitFields, catalog: &TresCatalog, context: &str) -> Result<()> {
    assoc.grp_tres = tres_vec_of(&limits.grp_tres, catalog, context)?;
    assoc.grp_tres_mins = tres_vec_of(&limits.grp_tres_mins, catalog, context)?;
    assoc.grp_tres_run_mins = tres_vec_of(&limits.grp_tres_run_mins, catalog, context)?;
    assoc.grp_jobs = cap_of(&limits.grp_jobs, context)?;
    assoc.grp_submit_jobs = cap_of(&limits.grp_submit_jobs, context)?;
    assoc.grp_wall = cap_of(&limits.grp_wall, context)?;
    assoc.grp_mem = cap_of(&limits.grp_mem, context)?;
    assoc.grp_nodes = cap_of(&limits.grp_nodes, context)?;
    assoc.max_tres_pj = tres_vec_of(&limits.max_tres_pj, catalog, context)?;
    assoc.max_tres_mins_pj = tres_vec_of(&limits.max_tres_mins_pj, catalog, context)?;
    assoc.max_nodes_pj = cap_of(&limits.max_nodes_pj, context)?;
    assoc.max_wall_pj = cap_of(&limits.max_wall_pj, context)?;
    assoc.max_jobs = cap_of(&limits.max_jobs, context)?;
    assoc.max_submit_jobs = cap_of(&limits.max_submit_jobs, context)?;
    Ok(())
}

fn apply_qos_limits(qos: &mut Qos, limits: &LimitFields, catalog: &TresCatalog, context: &str) -> Result<()> {
    qos.grp_tres = tres_vec_of(&limits.grp_tres, catalog, context)?;
    qos.grp_tres_mins = tres_vec_of(&limits.grp_tres_mins, catalog, context)?;
    qos.grp_tres_run_mins = tres_vec_of(&limits.grp_tres_run_mins, catalog, context)?;
    qos.grp_jobs = cap_of(&limits.grp_jobs, context)?;
    qos.grp_submit_jobs = cap_of(&limits.grp_submit_jobs, context)?;
    qos.grp_wall = cap_of(&limits.grp_wall, context)?;
    qos.grp_mem = cap_of(&limits.grp_mem, context)?;
    qos.grp_nodes = cap_of(&limits.grp_nodes, context)?;
    qos.max_tres_pj = tres_vec_of(&limits.max_tres_pj, catalog, context)?;
    qos.max_tres_mins_pj = tres_vec_of(&limits.max_tres_mins_pj, catalog, context)?;
    qos.max_nodes_pj = cap_of(&limits.max_nodes_pj, context)?;
    qos.max_wall_pj = cap_of(&limits.max_wall_pj, context)?;
    qos.max_jobs_pu = cap_of(&limits.max_jobs_pu, context)?;
    qos.min_cpus_pj = cap_of(&limits.min_cpus_pj, context)?;
    qos.max_tres_pu = tres_vec_of(&limits.max_tres_pu, catalog, context)?;
    qos.max_nodes_pu = cap_of(&limits.max_nodes_pu, context)?;
    qos.max_submit_jobs_pu = cap_of(&limits.max_submit_jobs_pu, context)?;
    Ok(())
}

fn parse_qos_flags(entry: &QosFlagsEntry) -> Result<QosFlags> {
    let mut flags = QosFlags::empty();
    for token in &entry.0 {
        flags |= match token.as_str() {
            "part_qos" => QosFlags::PART_QOS,
            "deny_limit" => QosFlags::DENY_LIMIT,
            other => bail!("unknown qos flag '{other}'"),
        };
    }
    Ok(flags)
}

fn parse_enforce_flags(tokens: &[String]) -> Result<EnforceFlags> {
    let mut flags = EnforceFlags::empty();
    for token in tokens {
        flags |= match token.as_str() {
            "limits" => EnforceFlags::LIMITS,
            "safe" => EnforceFlags::SAFE,
            "associations" => EnforceFlags::ASSOCIATIONS,
            other => bail!("unknown accounting_enforce flag '{other}'"),
        };
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    const EXAMPLE: &str = r#"
tres: [cpu, mem, node]
associations:
  - id: 1
    parent: root
    account: physics
    grp_nodes: 8
  - id: 2
    parent: "1"
    account: physics
    user: alice
    max_wall_pj: 120
qos:
  - id: 1
    name: normal
    flags: [deny_limit]
    max_wall_pj: 60
    grp_tres:
      cpu: 100
partitions:
  - name: batch
    max_time: 240
    qos: 1
accounting_enforce: [limits, associations]
"#;

    #[test]
    fn loads_example_yaml() {
        let (world, ctx) = load_from_str(EXAMPLE).unwrap();
        assert_eq!(world.catalog.len(), 3);
        assert_eq!(world.associations.len(), 3); // root + 2 entries
        assert_eq!(world.associations[1].grp_nodes, Cap::limited(8));
        assert_eq!(world.associations[2].parent, Some(1));
        assert_eq!(world.associations[2].max_wall_pj, Cap::limited(120));

        let qos = world.qos(1).unwrap();
        assert!(qos.deny_limit());
        assert_eq!(qos.max_wall_pj, Cap::limited(60));
        assert_eq!(qos.grp_tres[world.catalog.index_of("cpu").unwrap()], Cap::limited(100));

        let partition = world.partitions.get("batch").unwrap();
        assert_eq!(partition.max_time, Cap::limited(240));
        assert_eq!(partition.qos, Some(1));

        assert!(ctx.enforce.limits_enabled());
        assert!(ctx.enforce.associations_required());
        assert!(!ctx.enforce.safe());
    }

    #[test]
    fn missing_limit_fields_default_to_unlimited() {
        let yaml = r#"
tres: [cpu]
associations:
  - id: 1
    parent: root
    account: bare
"#;
        let (world, _) = load_from_str(yaml).unwrap();
        let a = &world.associations[1];
        assert!(a.grp_nodes.is_unlimited());
        assert!(a.max_wall_pj.is_unlimited());
        assert_eq!(a.grp_tres, vec![Cap::UNLIMITED]);
    }

    #[test]
    fn empty_associations_is_a_load_error() {
        let yaml = "tres: [cpu]\nassociations: []\n";
        let err = load_from_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("no association entries"));
    }

    #[test]
    fn unknown_parent_reference_is_a_load_error() {
        let yaml = r#"
tres: [cpu]
associations:
  - id: 1
    parent: "99"
    account: orphan
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("unknown parent id 99"));
    }

    #[test]
    fn unknown_qos_reference_on_partition_is_a_load_error() {
        let yaml = r#"
tres: [cpu]
associations:
  - id: 1
    parent: root
    account: a
partitions:
  - name: p
    qos: 7
"#;
        let err = load_from_str(yaml).unwrap_err();
        assert!(format!("{err:#}").contains("unknown qos id 7"));
    }

    #[test]
    fn missing_file_returns_error() {
        let result = load_from_file(Path::new("/nonexistent/path/world.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        let result = load_from_file(f.path());
        assert!(result.is_err());
    }

    #[test]
    fn inf_and_no_val_tokens_mean_unlimited() {
        let yaml = r#"
tres: [cpu]
associations:
  - id: 1
    parent: root
    account: a
    grp_wall: INF
    max_wall_pj: NO_VAL
"#;
        let (world, _) = load_from_str(yaml).unwrap();
        assert!(world.associations[1].grp_wall.is_unlimited());
        assert!(world.associations[1].max_wall_pj.is_unlimited());
    }

    #[test]
    fn load_from_file_round_trips_through_a_temp_file() {
        let f = yaml_tempfile(EXAMPLE);
        let (world, _) = load_from_file(f.path()).unwrap();
        assert_eq!(world.associations.len(), 3);
    }
}
