//! Camera calibration and per-image data.
//!
//! Intrinsics are set once per camera channel at ingestion and shared by
//! every image on that channel. Each image carries an externally supplied
//! pose prior which is used as-is; no pose is ever solved for.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::geometry::SE3;

/// Pinhole calibration for one camera channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// The calibration matrix K.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// The inverse calibration matrix, in closed form.
    pub fn k_inv(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Unproject a pixel to normalized camera coordinates (z = 1).
    pub fn normalize(&self, x: f64, y: f64) -> Vector3<f64> {
        Vector3::new((x - self.cx) / self.fx, (y - self.cy) / self.fy, 1.0)
    }

    /// Project a camera-frame point to pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane.
    pub fn project(&self, p_cam: &Vector3<f64>) -> Option<(f64, f64)> {
        if p_cam.z <= 0.0 {
            return None;
        }
        Some((
            self.fx * p_cam.x / p_cam.z + self.cx,
            self.fy * p_cam.y / p_cam.z + self.cy,
        ))
    }
}

/// One ingested capture: identity, channel, timestamp and pose prior.
///
/// The prior is six values, Euler angles plus a translation, in the frame
/// convention of [`SE3`]. Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    /// Recording session this capture belongs to.
    pub record: String,
    /// Camera channel index, resolving the shared intrinsics.
    pub channel: usize,
    pub filename: String,
    /// Capture time in seconds. Drives cross-channel pairing.
    pub timestamp: f64,
    /// Euler angles (roll, pitch, yaw) of the pose prior.
    pub rotation: Vector3<f64>,
    /// Camera center of the pose prior, world frame.
    pub translation: Vector3<f64>,
}

impl ImageData {
    /// The pose prior as a camera-to-world transform.
    pub fn pose(&self) -> SE3 {
        SE3::from_euler_angles(&self.rotation, self.translation)
    }
}

/// A posed camera derived from an image's prior at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub channel: usize,
    /// Camera-to-world pose, fixed for the lifetime of the reconstruction.
    pub pose: SE3,
}

/// Snapshot of one camera's pose and calibration, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub channel: usize,
    pub pose: SE3,
    pub intrinsics: CameraIntrinsics,
}
