//! Two-view triangulation and epipolar geometry.
//!
//! Both cameras' poses are known ahead of time, so triangulation reduces to
//! a linear DLT solve per correspondence, followed by reprojection checks in
//! the calling code. The epipolar helpers here derive the fundamental matrix
//! from the pose priors and score correspondences by their distance to the
//! epipolar line.

use nalgebra::{Matrix3, Matrix4, SMatrix, Vector3};

use crate::camera::CameraIntrinsics;

use super::SE3;

/// Constructs the skew-symmetric matrix [v]x such that [v]x u = v x u.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y, //
        v.z, 0.0, -v.x, //
        -v.y, v.x, 0.0,
    )
}

/// Build a 3x4 projection matrix [R | t] from a world-to-camera pose.
fn projection_matrix(pose_cw: &SE3) -> SMatrix<f64, 3, 4> {
    let r = pose_cw.rotation.to_rotation_matrix();
    let t = &pose_cw.translation;

    SMatrix::<f64, 3, 4>::from_columns(&[
        r.matrix().column(0).into(),
        r.matrix().column(1).into(),
        r.matrix().column(2).into(),
        (*t).into(),
    ])
}

/// Triangulate a 3D point from two normalized observations using DLT.
///
/// `xn1`/`xn2` are normalized camera coordinates (z = 1) of the same point
/// seen from `pose1`/`pose2` (camera-to-world). Returns `None` when the
/// linear system is degenerate, which happens for parallel rays or a zero
/// baseline.
pub fn triangulate_dlt(
    xn1: &Vector3<f64>,
    xn2: &Vector3<f64>,
    pose1: &SE3,
    pose2: &SE3,
) -> Option<Vector3<f64>> {
    let p1 = projection_matrix(&pose1.inverse());
    let p2 = projection_matrix(&pose2.inverse());

    // Each view contributes two rows of A in A * X = 0.
    let mut a = Matrix4::<f64>::zeros();
    for j in 0..4 {
        a[(0, j)] = xn1.x * p1[(2, j)] - p1[(0, j)];
        a[(1, j)] = xn1.y * p1[(2, j)] - p1[(1, j)];
        a[(2, j)] = xn2.x * p2[(2, j)] - p2[(0, j)];
        a[(3, j)] = xn2.y * p2[(2, j)] - p2[(1, j)];
    }

    // The solution is the right singular vector of the smallest singular
    // value.
    let svd = a.svd(true, true);
    let v = svd.v_t?.transpose();
    let x3d_h = v.column(3);

    if x3d_h[3].abs() < 1e-10 {
        return None;
    }

    Some(Vector3::new(
        x3d_h[0] / x3d_h[3],
        x3d_h[1] / x3d_h[3],
        x3d_h[2] / x3d_h[3],
    ))
}

/// Pixel reprojection error of a world point in one view.
///
/// Returns `None` when the point lies at or behind the camera plane, which
/// callers treat as a failed triangulation.
pub fn reprojection_error(
    p_world: &Vector3<f64>,
    pose: &SE3,
    intrinsics: &CameraIntrinsics,
    observed: (f64, f64),
) -> Option<f64> {
    let p_cam = pose.inverse().transform_point(p_world);
    let (u, v) = intrinsics.project(&p_cam)?;
    let du = u - observed.0;
    let dv = v - observed.1;
    Some((du * du + dv * dv).sqrt())
}

/// Fundamental matrix between two posed views: F = K2^-T [t]x R K1^-1.
///
/// The relative pose is taken from the two camera-to-world pose priors,
/// mapping view-1 camera coordinates into view 2.
pub fn fundamental_matrix(
    pose1: &SE3,
    k1: &CameraIntrinsics,
    pose2: &SE3,
    k2: &CameraIntrinsics,
) -> Matrix3<f64> {
    let pose2_inv = pose2.inverse();
    let r12 = (pose2_inv.rotation * pose1.rotation).to_rotation_matrix();
    let t12 = pose2_inv.transform_point(&pose1.translation);

    let essential = skew(&t12) * r12.matrix();
    k2.k_inv().transpose() * essential * k1.k_inv()
}

/// Symmetric point-to-epipolar-line distance of a correspondence, in pixels.
///
/// Measures `p2` against the line `F p1` and `p1` against `F^T p2`, and
/// returns the larger of the two. Degenerate lines score as infinite so the
/// correspondence is always pruned.
pub fn epipolar_line_distance(f: &Matrix3<f64>, p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let x1 = Vector3::new(p1.0, p1.1, 1.0);
    let x2 = Vector3::new(p2.0, p2.1, 1.0);

    let d21 = point_line_distance(&(f * x1), &x2);
    let d12 = point_line_distance(&(f.transpose() * x2), &x1);
    d21.max(d12)
}

fn point_line_distance(line: &Vector3<f64>, p: &Vector3<f64>) -> f64 {
    let den = (line.x * line.x + line.y * line.y).sqrt();
    if den < 1e-12 {
        return f64::INFINITY;
    }
    (line.dot(p)).abs() / den
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
            width: 640,
            height: 480,
        }
    }

    fn normalized(pose: &SE3, p_world: &Vector3<f64>) -> Vector3<f64> {
        let p_cam = pose.inverse().transform_point(p_world);
        Vector3::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z, 1.0)
    }

    #[test]
    fn test_skew_annihilates_own_vector() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let s = skew(&v);

        assert!((s * v).norm() < 1e-12);
        assert!((s + s.transpose()).norm() < 1e-12);
    }

    #[test]
    fn test_triangulate_dlt_recovers_point() {
        let pose1 = SE3::identity();
        let mut pose2 = SE3::identity();
        pose2.translation = Vector3::new(1.0, 0.0, 0.0);

        let p_world = Vector3::new(0.3, -0.2, 5.0);
        let xn1 = normalized(&pose1, &p_world);
        let xn2 = normalized(&pose2, &p_world);

        let triangulated = triangulate_dlt(&xn1, &xn2, &pose1, &pose2).unwrap();
        assert_relative_eq!(triangulated, p_world, epsilon = 1e-8);
    }

    #[test]
    fn test_triangulate_dlt_with_rotation() {
        let k = intrinsics();
        let pose1 = SE3::identity();
        let pose2 = SE3::new(
            nalgebra::UnitQuaternion::from_euler_angles(0.0, -0.1, 0.02),
            Vector3::new(1.2, 0.3, -0.2),
        );

        let p_world = Vector3::new(-0.4, 0.6, 7.0);
        let uv1 = k.project(&pose1.inverse().transform_point(&p_world)).unwrap();
        let uv2 = k.project(&pose2.inverse().transform_point(&p_world)).unwrap();

        let xn1 = k.normalize(uv1.0, uv1.1);
        let xn2 = k.normalize(uv2.0, uv2.1);

        let triangulated = triangulate_dlt(&xn1, &xn2, &pose1, &pose2).unwrap();
        assert_relative_eq!(triangulated, p_world, epsilon = 1e-7);
    }

    #[test]
    fn test_epipolar_distance_zero_for_true_correspondence() {
        let k = intrinsics();
        let pose1 = SE3::identity();
        let pose2 = SE3::new(
            nalgebra::UnitQuaternion::from_euler_angles(0.0, 0.05, 0.0),
            Vector3::new(0.8, 0.1, 0.0),
        );

        let p_world = Vector3::new(0.5, 0.2, 6.0);
        let uv1 = k.project(&pose1.inverse().transform_point(&p_world)).unwrap();
        let uv2 = k.project(&pose2.inverse().transform_point(&p_world)).unwrap();

        let f = fundamental_matrix(&pose1, &k, &pose2, &k);
        assert!(epipolar_line_distance(&f, uv1, uv2) < 1e-6);
    }

    #[test]
    fn test_epipolar_distance_flags_outlier() {
        let k = intrinsics();
        let pose1 = SE3::identity();
        let pose2 = SE3::new(
            nalgebra::UnitQuaternion::identity(),
            Vector3::new(1.0, 0.0, 0.0),
        );

        let p_world = Vector3::new(0.5, 0.2, 6.0);
        let uv1 = k.project(&pose1.inverse().transform_point(&p_world)).unwrap();
        let uv2 = k.project(&pose2.inverse().transform_point(&p_world)).unwrap();

        let f = fundamental_matrix(&pose1, &k, &pose2, &k);
        // Push the second observation well off its epipolar line.
        let off = (uv2.0, uv2.1 + 40.0);
        assert!(epipolar_line_distance(&f, uv1, off) > 10.0);
    }

    #[test]
    fn test_reprojection_error() {
        let k = intrinsics();
        let pose = SE3::identity();
        let p_world = Vector3::new(0.1, 0.2, 4.0);
        let uv = k.project(&p_world).unwrap();

        let exact = reprojection_error(&p_world, &pose, &k, uv).unwrap();
        assert!(exact < 1e-12);

        let shifted = reprojection_error(&p_world, &pose, &k, (uv.0 + 3.0, uv.1 + 4.0)).unwrap();
        assert_relative_eq!(shifted, 5.0, epsilon = 1e-9);

        let behind = Vector3::new(0.0, 0.0, -1.0);
        assert!(reprojection_error(&behind, &pose, &k, (0.0, 0.0)).is_none());
    }
}
