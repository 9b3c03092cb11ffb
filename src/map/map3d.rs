//! Container for the sparse 3D map.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::point::MapPoint;
use super::types::PointId;

/// A readable copy of one map point, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColoredPoint {
    pub id: PointId,
    pub position: Vector3<f64>,
    pub color: [f32; 3],
}

/// Per-image association: which points an image supports, and at which
/// keypoints.
pub type ViewObservations = BTreeMap<usize, Vec<(PointId, usize)>>;

/// The sparse map: committed points indexed by id.
///
/// Storage is a `BTreeMap` so iteration, snapshots and fusion queries are
/// deterministic across runs.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Map3D {
    points: BTreeMap<PointId, MapPoint>,
    next_id: u64,
}

impl Map3D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Commit a new point and return its id.
    pub fn insert(
        &mut self,
        position: Vector3<f64>,
        color: [f32; 3],
        observations: impl IntoIterator<Item = (usize, usize)>,
    ) -> PointId {
        let id = PointId::new(self.next_id);
        self.next_id += 1;
        self.points
            .insert(id, MapPoint::new(id, position, color, observations));
        id
    }

    pub fn get(&self, id: PointId) -> Option<&MapPoint> {
        self.points.get(&id)
    }

    pub fn get_mut(&mut self, id: PointId) -> Option<&mut MapPoint> {
        self.points.get_mut(&id)
    }

    pub fn points(&self) -> impl Iterator<Item = &MapPoint> {
        self.points.values()
    }

    /// The committed point closest to `position` within `max_dist`, if any.
    /// Distance ties resolve to the lower id.
    pub fn nearest_within(&self, position: &Vector3<f64>, max_dist: f64) -> Option<PointId> {
        let mut best: Option<(PointId, f64)> = None;
        for (id, point) in &self.points {
            let dist = (point.position - position).norm();
            if dist <= max_dist && best.map_or(true, |(_, d)| dist < d) {
                best = Some((*id, dist));
            }
        }
        best.map(|(id, _)| id)
    }

    /// A consistent copy of all points.
    pub fn colored_points(&self) -> Vec<ColoredPoint> {
        self.points
            .values()
            .map(|p| ColoredPoint {
                id: p.id,
                position: p.position,
                color: p.color,
            })
            .collect()
    }

    /// Group observations by observing image.
    pub fn observations_by_view(&self) -> ViewObservations {
        let mut by_view: ViewObservations = BTreeMap::new();
        for point in self.points.values() {
            for (&image_id, &keypoint_idx) in &point.observations {
                by_view
                    .entry(image_id)
                    .or_default()
                    .push((point.id, keypoint_idx));
            }
        }
        by_view
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.next_id = 0;
    }
}

impl std::fmt::Debug for Map3D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map3D")
            .field("num_points", &self.points.len())
            .finish()
    }
}
