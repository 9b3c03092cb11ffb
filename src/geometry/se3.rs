//! SE(3) rigid-body transforms.
//!
//! Poses follow the camera-to-world convention (`T_wc`): `transform_point`
//! maps camera-frame coordinates into the world frame, and `translation` is
//! the camera center in world coordinates.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A rigid-body transform: rotation followed by translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build a pose from three Euler angles (roll, pitch, yaw) and a
    /// translation. This is the form pose priors arrive in.
    pub fn from_euler_angles(angles: &Vector3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation: UnitQuaternion::from_euler_angles(angles.x, angles.y, angles.z),
            translation,
        }
    }

    /// The inverse transform.
    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    /// Apply the transform to a point.
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity_is_noop() {
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_relative_eq!(SE3::identity().transform_point(&p), p);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let pose = SE3::from_euler_angles(
            &Vector3::new(0.1, -0.4, 1.2),
            Vector3::new(3.0, -1.0, 0.5),
        );
        let p = Vector3::new(0.7, 2.0, 5.0);

        let q = pose.inverse().transform_point(&pose.transform_point(&p));
        assert_relative_eq!(q, p, epsilon = 1e-12);
    }

    #[test]
    fn test_euler_angles_match_nalgebra() {
        let pose = SE3::from_euler_angles(&Vector3::new(0.3, 0.2, 0.1), Vector3::zeros());
        let (roll, pitch, yaw) = pose.rotation.euler_angles();

        assert_relative_eq!(roll, 0.3, epsilon = 1e-12);
        assert_relative_eq!(pitch, 0.2, epsilon = 1e-12);
        assert_relative_eq!(yaw, 0.1, epsilon = 1e-12);
    }
}
