//! Partition: the minimal slice the engine needs — a wall-time cap and an
//! optional second-ranked QOS.

use super::tres::Cap;

#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub name: String,
    /// Minutes.
    pub max_time: Cap,
    pub qos: Option<u32>,
}
