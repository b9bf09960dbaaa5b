//! Max-nodes query (C9a, §4.7): the tightest node cap reachable for a job,
//! so the selector does not waste a placement attempt.

use crate::assoc_tree::World;
use crate::model::{Cap, Job, Qos, WaitReason};
use crate::qos_order::{resolve_in_world, QosOrder};

/// Per-field QOS-pair merge: primary's value if it sets one, else
/// secondary's (§4.1 "first wins, second fills" applied to a single field —
/// S6 is order-dependent, not a symmetric two-sided minimum, so primary
/// freezing a field must shut out a tighter secondary value).
fn effective(world: &World, order: QosOrder, limit_of: impl Fn(&Qos) -> Cap) -> Cap {
    if let Some(p) = order.primary.and_then(|id| world.qos(id)) {
        let v = limit_of(p);
        if !v.is_unlimited() {
            return v;
        }
    }
    order
        .secondary
        .and_then(|id| world.qos(id))
        .map(limit_of)
        .unwrap_or(Cap::UNLIMITED)
}

fn narrow(cap: &mut Cap, reason: &mut Option<WaitReason>, candidate: Cap, candidate_reason: WaitReason) {
    if candidate.tighter_than(*cap) {
        *cap = candidate;
        *reason = Some(candidate_reason);
    }
}

/// `get_max_nodes`. Within the QOS pair each field is resolved by override
/// order (§4.1); across QOS and the assoc chain, every node-scoped cap that
/// applies narrows the running result — `grp_nodes` from any level,
/// `max_nodes_pj` only from the chain's first level.
pub fn get_max_nodes(world: &World, job: &Job) -> (Cap, Option<WaitReason>) {
    let order = resolve_in_world(world, job);

    let mut cap = Cap::UNLIMITED;
    let mut reason = None;

    narrow(
        &mut cap,
        &mut reason,
        effective(world, order, |q| q.max_nodes_pj),
        WaitReason::WaitQosMaxNodePerJob,
    );
    narrow(
        &mut cap,
        &mut reason,
        effective(world, order, |q| q.max_nodes_pu),
        WaitReason::WaitQosMaxNodePerUser,
    );
    narrow(
        &mut cap,
        &mut reason,
        effective(world, order, |q| q.grp_nodes),
        WaitReason::WaitQosGrpNodes,
    );

    if let Some(assoc_id) = job.assoc {
        for (i, id) in world.chain_from(assoc_id).into_iter().enumerate() {
            let Some(assoc) = world.assoc(id) else { continue };
            if i == 0 {
                narrow(&mut cap, &mut reason, assoc.max_nodes_pj, WaitReason::WaitAssocMaxNodePerJob);
            }
            narrow(&mut cap, &mut reason, assoc.grp_nodes, WaitReason::WaitAssocGrpNodes);
        }
    }

    (cap, reason)
}
