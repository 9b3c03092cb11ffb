//! A committed 3D point and its supporting observations.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use super::types::PointId;

/// A sparse map point: world position, mean color, and the keypoints that
/// support it.
///
/// `observations` maps an observing image id to the keypoint index in that
/// image. Every committed point carries at least two observations; merging
/// a nearby triangulation absorbs its observations instead of creating a
/// duplicate point.
#[derive(Clone, Serialize, Deserialize)]
pub struct MapPoint {
    pub id: PointId,
    /// 3D position, world frame.
    pub position: Vector3<f64>,
    /// Mean RGB over all absorbed observations, each channel in 0..=255.
    pub color: [f32; 3],
    /// Observing image id to keypoint index.
    pub observations: BTreeMap<usize, usize>,
}

impl MapPoint {
    pub fn new(
        id: PointId,
        position: Vector3<f64>,
        color: [f32; 3],
        observations: impl IntoIterator<Item = (usize, usize)>,
    ) -> Self {
        Self {
            id,
            position,
            color,
            observations: observations.into_iter().collect(),
        }
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    /// Record that `image_id` observes this point at `keypoint_idx`.
    ///
    /// An image contributes at most one observation; repeats keep the first.
    pub fn add_observation(&mut self, image_id: usize, keypoint_idx: usize) -> bool {
        if self.observations.contains_key(&image_id) {
            return false;
        }
        self.observations.insert(image_id, keypoint_idx);
        true
    }

    /// Merge another triangulation of the same physical point into this one.
    ///
    /// New observations are added and the color becomes the observation-
    /// weighted running mean. The committed position stays as-is.
    pub fn absorb(
        &mut self,
        observations: impl IntoIterator<Item = (usize, usize)>,
        color: [f32; 3],
    ) {
        let before = self.num_observations() as f32;
        let mut added = 0.0f32;
        for (image_id, keypoint_idx) in observations {
            if self.add_observation(image_id, keypoint_idx) {
                added += 1.0;
            }
        }
        if added == 0.0 {
            return;
        }
        let total = before + added;
        for c in 0..3 {
            self.color[c] = (self.color[c] * before + color[c] * added) / total;
        }
    }
}

impl std::fmt::Debug for MapPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapPoint")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("observations", &self.observations.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> MapPoint {
        MapPoint::new(
            PointId::new(0),
            Vector3::new(1.0, 2.0, 3.0),
            [100.0, 100.0, 100.0],
            [(0, 5), (1, 9)],
        )
    }

    #[test]
    fn test_add_observation_once_per_image() {
        let mut mp = point();
        assert!(mp.add_observation(2, 7));
        assert!(!mp.add_observation(2, 8));
        assert_eq!(mp.num_observations(), 3);
        assert_eq!(mp.observations.get(&2), Some(&7));
    }

    #[test]
    fn test_absorb_adds_observations_and_averages_color() {
        let mut mp = point();
        mp.absorb([(2, 1), (3, 4)], [200.0, 200.0, 200.0]);

        assert_eq!(mp.num_observations(), 4);
        // Two old observations at 100, two new at 200.
        assert_eq!(mp.color, [150.0, 150.0, 150.0]);
    }

    #[test]
    fn test_absorb_ignores_known_images() {
        let mut mp = point();
        mp.absorb([(0, 99)], [255.0, 255.0, 255.0]);

        assert_eq!(mp.num_observations(), 2);
        assert_eq!(mp.observations.get(&0), Some(&5));
        assert_eq!(mp.color, [100.0, 100.0, 100.0]);
    }
}
