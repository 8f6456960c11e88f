use nalgebra as na;

use crate::my_types::*;

/// slam book eq. 2.4
pub fn skew(v: na::Vector3<f64>) -> Matrix3d {
    let mut ss = Matrix3d::zeros();
    ss[(0, 1)] = -v[2];
    ss[(0, 2)] = v[1];
    ss[(1, 0)] = v[2];
    ss[(1, 2)] = -v[0];
    ss[(2, 0)] = -v[1];
    ss[(2, 1)] = v[0];
    ss
}

/// Rotation vector to unit quaternion, closed form.
/// ref Quaternion kinematics for the error-state Kalman filter
/// eq. 101
pub fn exp_quaternion(theta: Vector3d) -> Quaterniond {
    Quaterniond::from_scaled_axis(theta)
}

/// Compose a body-frame small-angle correction onto `q` and renormalize.
pub fn apply_rotation_correction(q: &Quaterniond, delta_theta: Vector3d) -> Quaterniond {
    let mut corrected = q * exp_quaternion(delta_theta);
    corrected.renormalize();
    corrected
}

/// Average a square matrix with its transpose in place.
pub fn symmetrize(m: &mut Matrixd) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = v;
            m[(j, i)] = v;
        }
    }
}

/// Largest absolute difference between `m` and its transpose.
pub fn asymmetry(m: &Matrixd) -> f64 {
    let mut worst: f64 = 0.;
    for i in 0..m.nrows() {
        for j in (i + 1)..m.ncols() {
            worst = worst.max((m[(i, j)] - m[(j, i)]).abs());
        }
    }
    worst
}
