//! Core ID type for the sparse map.

use serde::{Deserialize, Serialize};

/// Unique identifier for a committed map point.
///
/// Ids are assigned sequentially on insertion and serve as lightweight
/// handles for cross-referencing observations without shared ownership.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PointId(pub u64);

impl PointId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}
