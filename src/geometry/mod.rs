//! Geometry utilities: SE(3) transforms, triangulation, epipolar distances.

pub mod se3;
pub mod triangulation;

pub use se3::SE3;
pub use triangulation::{
    epipolar_line_distance, fundamental_matrix, reprojection_error, skew, triangulate_dlt,
};
