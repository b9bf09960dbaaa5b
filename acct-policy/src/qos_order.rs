//! QOS ordering resolver (C3, §4.1).

use crate::assoc_tree::World;
use crate::model::{Job, Partition};

/// An ordered pair of QOS ids; either slot may be absent. `primary`'s
/// limits are frozen once resolved — only `secondary` may fill a slot
/// `primary` left unlimited ("first wins, second fills").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QosOrder {
    pub primary: Option<u32>,
    pub secondary: Option<u32>,
}

/// Resolves the `(primary, secondary)` pair for `job` given its partition.
/// Pure and idempotent (P6): calling it twice on the same inputs returns an
/// identical pair.
pub fn resolve(job: &Job, partition: Option<&Partition>) -> QosOrder {
    let job_qos = job.qos;
    let part_qos = partition.and_then(|p| p.qos);

    let order = match (job_qos, part_qos) {
        (None, None) => QosOrder::default(),
        (Some(j), None) => QosOrder {
            primary: Some(j),
            secondary: None,
        },
        (None, Some(p)) => QosOrder {
            primary: Some(p),
            secondary: None,
        },
        (Some(j), Some(p)) => QosOrder {
            primary: Some(j),
            secondary: Some(p),
        },
    };

    dedup_same_object(order)
}

/// Given both slots resolved, re-orders by the `PART_QOS` override flag and
/// drops the secondary if it would equal the primary.
pub fn resolve_with_flag(job_qos: u32, part_qos: u32, job_qos_is_part_override: bool) -> QosOrder {
    let order = if job_qos_is_part_override {
        QosOrder {
            primary: Some(job_qos),
            secondary: Some(part_qos),
        }
    } else {
        QosOrder {
            primary: Some(part_qos),
            secondary: Some(job_qos),
        }
    };
    dedup_same_object(order)
}

fn dedup_same_object(order: QosOrder) -> QosOrder {
    if order.primary.is_some() && order.primary == order.secondary {
        QosOrder {
            primary: order.primary,
            secondary: None,
        }
    } else {
        order
    }
}

/// Resolves the order for `job`, consulting the job's own QOS's
/// [`crate::model::QosFlags::PART_QOS`] bit when both a job QOS and a
/// partition QOS are present.
pub fn resolve_in_world(world: &World, job: &Job) -> QosOrder {
    let partition = world.partitions.get(&job.partition);
    let part_qos = partition.and_then(|p| p.qos);

    match (job.qos, part_qos) {
        (None, None) => QosOrder::default(),
        (Some(j), None) => QosOrder {
            primary: Some(j),
            secondary: None,
        },
        (None, Some(p)) => QosOrder {
            primary: Some(p),
            secondary: None,
        },
        (Some(j), Some(p)) => {
            let job_overrides = world.qos(j).map(|q| q.part_qos()).unwrap_or(false);
            resolve_with_flag(j, p, job_overrides)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neither_present_yields_empty_pair() {
        let job = Job::default();
        assert_eq!(resolve(&job, None), QosOrder::default());
    }

    #[test]
    fn only_job_qos_present() {
        let job = Job {
            qos: Some(5),
            ..Default::default()
        };
        assert_eq!(
            resolve(&job, None),
            QosOrder {
                primary: Some(5),
                secondary: None
            }
        );
    }

    #[test]
    fn only_partition_qos_present() {
        let job = Job::default();
        let part = Partition {
            qos: Some(7),
            ..Default::default()
        };
        assert_eq!(
            resolve(&job, Some(&part)),
            QosOrder {
                primary: Some(7),
                secondary: None
            }
        );
    }

    #[test]
    fn part_qos_flag_promotes_job_qos_to_primary() {
        assert_eq!(
            resolve_with_flag(1, 2, true),
            QosOrder {
                primary: Some(1),
                secondary: Some(2)
            }
        );
    }

    #[test]
    fn default_order_puts_partition_qos_first() {
        assert_eq!(
            resolve_with_flag(1, 2, false),
            QosOrder {
                primary: Some(2),
                secondary: Some(1)
            }
        );
    }

    #[test]
    fn same_object_drops_secondary() {
        assert_eq!(
            resolve_with_flag(3, 3, true),
            QosOrder {
                primary: Some(3),
                secondary: None
            }
        );
    }

    #[test]
    fn resolver_is_idempotent() {
        let job = Job {
            qos: Some(2),
            partition: "p".into(),
            ..Default::default()
        };
        let part = Partition {
            name: "p".into(),
            qos: Some(9),
            ..Default::default()
        };
        assert_eq!(resolve(&job, Some(&part)), resolve(&job, Some(&part)));
    }
}
