use nalgebra::{matrix, Matrix2};

use crate::camera::*;
use crate::my_types::*;

const UNDISTORT_ITERS: usize = 20;
const UNDISTORT_TOLERANCE: f64 = 1e-14;

/// Radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// Distorted normalized coordinates and their 2x2 derivative.
    fn apply(&self, p: Vector2d) -> (Vector2d, Matrix2<f64>) {
        let (x, y) = (p[0], p[1]);
        let r2 = x * x + y * y;
        let radial = 1. + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let d_radial = self.k1 + r2 * (2. * self.k2 + 3. * self.k3 * r2);

        let xd = x * radial + 2. * self.p1 * x * y + self.p2 * (r2 + 2. * x * x);
        let yd = y * radial + self.p1 * (r2 + 2. * y * y) + 2. * self.p2 * x * y;

        let cross = 2. * x * y * d_radial + 2. * self.p1 * x + 2. * self.p2 * y;
        let derivative = matrix!(
            radial + 2. * x * x * d_radial + 2. * self.p1 * y + 6. * self.p2 * x, cross;
            cross, radial + 2. * y * y * d_radial + 6. * self.p1 * y + 2. * self.p2 * x;
        );
        (Vector2d::new(xd, yd), derivative)
    }

    fn is_zero(&self) -> bool {
        *self == Distortion::default()
    }
}

#[derive(Debug)]
pub struct PinholeModel {
    pub camera_matrix: Matrix3d,
    pub distortion: Distortion,
}

impl PinholeModel {
    pub fn new(camera_matrix: Matrix3d) -> Self {
        PinholeModel {
            camera_matrix,
            distortion: Distortion::default(),
        }
    }

    pub fn with_distortion(camera_matrix: Matrix3d, distortion: Distortion) -> Self {
        PinholeModel {
            camera_matrix,
            distortion,
        }
    }

    /// `fx, fy, ox, oy` intrinsics followed by `k1, k2, p1, p2, k3`.
    pub fn from_parameters(
        fx: f64,
        fy: f64,
        ox: f64,
        oy: f64,
        k1: f64,
        k2: f64,
        p1: f64,
        p2: f64,
        k3: f64,
    ) -> Self {
        Self::with_distortion(
            Matrix3d::new(fx, 0., ox, 0., fy, oy, 0., 0., 1.),
            Distortion { k1, k2, p1, p2, k3 },
        )
    }

    fn focal(&self) -> Matrix2<f64> {
        self.camera_matrix.fixed_view::<2, 2>(0, 0).into_owned()
    }
}

impl CameraModel for PinholeModel {
    fn back_project(&self, pixel: Vector2d) -> Option<Vector3d> {
        let distorted = Vector2d::new(
            (pixel[0] - self.camera_matrix[(0, 2)]) / self.camera_matrix[(0, 0)],
            (pixel[1] - self.camera_matrix[(1, 2)]) / self.camera_matrix[(1, 1)],
        );
        if self.distortion.is_zero() {
            return Some(Vector3d::new(distorted[0], distorted[1], 1.));
        }

        // Newton iterations on distort(p) = distorted
        let mut p = distorted;
        for _ in 0..UNDISTORT_ITERS {
            let (d, derivative) = self.distortion.apply(p);
            let error = d - distorted;
            if error.norm_squared() < UNDISTORT_TOLERANCE.powi(2) {
                return Some(Vector3d::new(p[0], p[1], 1.));
            }
            p -= derivative.try_inverse()? * error;
            if !p.iter().all(|x| x.is_finite()) {
                return None;
            }
        }
        let (d, _) = self.distortion.apply(p);
        if (d - distorted).norm() < 1e-9 {
            Some(Vector3d::new(p[0], p[1], 1.))
        } else {
            None
        }
    }

    fn project_with_derivative(
        &self,
        ray: Vector3d,
        compute_derivative: bool,
    ) -> (Option<Vector2d>, Option<Matrix23d>) {
        // ray is behind camera
        if ray[2] <= 0. {
            return (None, None);
        }
        let z_inv = 1. / ray[2];
        let normalized = Vector2d::new(z_inv * ray[0], z_inv * ray[1]);
        let (distorted, distortion_derivative) = self.distortion.apply(normalized);
        let pixel = self.focal() * distorted
            + Vector2d::new(self.camera_matrix[(0, 2)], self.camera_matrix[(1, 2)]);
        // derivative of uv wrt xyz
        let pixel_derivative = if compute_derivative {
            // derivative of normalized uv wrt xyz
            let x_xbar_derivative = matrix!(
                z_inv,
                0.,
                -ray[0] * z_inv.powi(2);
                0.,
                z_inv,
                -ray[1] * z_inv.powi(2);
            );
            Some(self.focal() * distortion_derivative * x_xbar_derivative)
        } else {
            None
        };
        (Some(pixel), pixel_derivative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn euroc_cam0() -> PinholeModel {
        PinholeModel::from_parameters(
            458.654,
            457.296,
            367.215,
            248.375,
            -0.28340811,
            0.07395907,
            0.00019359,
            1.76187114e-05,
            0.,
        )
    }

    #[test]
    fn test_pinhole() {
        let intrinsics = Matrix3d::new(1000., 0., 360., 0., 1000., 240., 0., 0., 1.);
        let ray = Vector3d::new(-0.25, 0.11, 2.).normalize();
        let camera = PinholeModel::new(intrinsics);
        let pixel = camera.project(ray).unwrap();
        assert!((pixel - Vector2d::new(235., 295.)).norm() < 1e-6);

        let ray_computed = camera.back_project(pixel).unwrap();
        assert!((ray_computed - Vector3d::new(-0.125, 0.055, 1.)).norm() < 1e-10);

        assert!(camera.project(Vector3d::new(0., 0., -1.)).is_none());
    }

    #[test]
    fn test_distorted_round_trip() {
        let camera = euroc_cam0();
        for &(x, y) in &[(0., 0.), (0.3, -0.2), (-0.5, 0.4), (0.1, 0.6)] {
            let ray = Vector3d::new(x, y, 1.);
            let pixel = camera.project(ray * 3.).unwrap();
            let back = camera.back_project(pixel).unwrap();
            assert_relative_eq!(back, ray, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_derivative_matches_finite_differences() {
        let camera = euroc_cam0();
        let point = Vector3d::new(0.4, -0.3, 2.5);
        let (_, derivative) = camera.project_with_derivative(point, true);
        let derivative = derivative.unwrap();
        let h = 1e-6;
        for k in 0..3 {
            let mut delta = Vector3d::zeros();
            delta[k] = h;
            let plus = camera.project(point + delta).unwrap();
            let minus = camera.project(point - delta).unwrap();
            let numeric = (plus - minus) / (2. * h);
            assert_relative_eq!(derivative.column(k).into_owned(), numeric, epsilon = 1e-4);
        }
    }
}
