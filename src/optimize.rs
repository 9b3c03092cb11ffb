//! Pluggable map refinement.
//!
//! Joint refinement of the map (minimizing total reprojection error) is a
//! replaceable stage, not part of the reconstruction loop proper. The
//! engine invokes whatever [`MapOptimizer`] it was given once the
//! incremental pass is done; the default implementation changes nothing.

use anyhow::Result;

use crate::camera::{CameraIntrinsics, CameraView};
use crate::features::Features;
use crate::map::Map3D;

/// Refines committed map points against their observations.
///
/// Implementations may move point positions but must keep the observation
/// structure intact. Camera poses are externally supplied priors and are
/// not solved for anywhere in this crate; an implementation that refines
/// them operates on its own copy.
pub trait MapOptimizer: Send {
    fn optimize(
        &self,
        map: &mut Map3D,
        views: &[CameraView],
        intrinsics: &[CameraIntrinsics],
        features: &[Features],
    ) -> Result<()>;
}

/// The inert default: leaves the map untouched.
pub struct NoopOptimizer;

impl MapOptimizer for NoopOptimizer {
    fn optimize(
        &self,
        _map: &mut Map3D,
        _views: &[CameraView],
        _intrinsics: &[CameraIntrinsics],
        _features: &[Features],
    ) -> Result<()> {
        Ok(())
    }
}
