use std::fmt::Debug;

use nalgebra::Matrix2x3;
use thiserror::Error;

use crate::camera::CameraPose;
use crate::my_types::*;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TriangulationError {
    #[error("need at least 2 views, got {0}")]
    TooFewViews(usize),
    #[error("parallax of {0:.4} rad is too small")]
    InsufficientParallax(f64),
    #[error("ray intersection is ill-conditioned")]
    IllConditioned,
    #[error("triangulated point is behind view {0}")]
    BehindCamera(usize),
}

/// One observation of a feature: where the camera was and the undistorted
/// ray `(x, y, 1)` it saw.
#[derive(Debug, Clone, Copy)]
pub struct CameraView {
    pub pose: CameraPose,
    pub ray: Vector3d,
}

pub trait Triangulator: Debug + Send {
    /// Global-frame position of the feature seen in `views`.
    fn triangulate(&self, views: &[CameraView]) -> Result<Vector3d, TriangulationError>;
}

/// Least-squares intersection of the viewing rays, refined by Gauss-Newton
/// on the normalized reprojection error.
#[derive(Debug, Clone)]
pub struct MidpointTriangulator {
    /// Smallest angle between any two rays, radians
    pub min_parallax: f64,
    pub refine_iterations: usize,
    /// Ratio of smallest to largest eigenvalue of the normal matrix
    pub min_conditioning: f64,
}

impl Default for MidpointTriangulator {
    fn default() -> Self {
        Self {
            min_parallax: 1f64.to_radians(),
            refine_iterations: 5,
            min_conditioning: 1e-6,
        }
    }
}

impl MidpointTriangulator {
    pub fn new(min_parallax: f64) -> Self {
        Self {
            min_parallax,
            ..Self::default()
        }
    }

    fn linear(&self, views: &[CameraView]) -> Result<Vector3d, TriangulationError> {
        let mut a = Matrix3d::zeros();
        let mut b = Vector3d::zeros();
        for view in views {
            let d = (view.pose.orientation * view.ray).normalize();
            let projector = Matrix3d::identity() - d * d.transpose();
            a += projector;
            b += projector * view.pose.position;
        }
        let eigenvalues = a.symmetric_eigenvalues();
        let (min, max) = (eigenvalues.min(), eigenvalues.max());
        if max <= 0. || min / max < self.min_conditioning {
            return Err(TriangulationError::IllConditioned);
        }
        a.try_inverse()
            .map(|inverse| inverse * b)
            .ok_or(TriangulationError::IllConditioned)
    }

    fn refine(&self, views: &[CameraView], mut point: Vector3d) -> Vector3d {
        for _ in 0..self.refine_iterations {
            let mut h = Matrix3d::zeros();
            let mut g = Vector3d::zeros();
            for view in views {
                let p_c = view.pose.world_to_camera(&point);
                if p_c[2] <= 0. {
                    return point;
                }
                let z_inv = 1. / p_c[2];
                let residual =
                    Vector2d::new(view.ray[0] - p_c[0] * z_inv, view.ray[1] - p_c[1] * z_inv);
                let d_proj = Matrix2x3::new(
                    z_inv,
                    0.,
                    -p_c[0] * z_inv * z_inv,
                    0.,
                    z_inv,
                    -p_c[1] * z_inv * z_inv,
                );
                let jacobian = d_proj * view.pose.orientation.transpose();
                h += jacobian.transpose() * jacobian;
                g += jacobian.transpose() * residual;
            }
            let step = match h.try_inverse() {
                Some(inverse) => inverse * g,
                None => return point,
            };
            point += step;
            if step.norm() < 1e-12 * (1. + point.norm()) {
                break;
            }
        }
        point
    }
}

fn max_parallax(views: &[CameraView]) -> f64 {
    let directions: Vec<Vector3d> = views
        .iter()
        .map(|v| (v.pose.orientation * v.ray).normalize())
        .collect();
    let mut best: f64 = 0.;
    for (i, a) in directions.iter().enumerate() {
        for b in &directions[i + 1..] {
            best = best.max(a.dot(b).clamp(-1., 1.).acos());
        }
    }
    best
}

impl Triangulator for MidpointTriangulator {
    fn triangulate(&self, views: &[CameraView]) -> Result<Vector3d, TriangulationError> {
        if views.len() < 2 {
            return Err(TriangulationError::TooFewViews(views.len()));
        }
        let parallax = max_parallax(views);
        if parallax < self.min_parallax {
            return Err(TriangulationError::InsufficientParallax(parallax));
        }
        let point = self.refine(views, self.linear(views)?);
        for (i, view) in views.iter().enumerate() {
            if view.pose.world_to_camera(&point)[2] <= 0. {
                return Err(TriangulationError::BehindCamera(i));
            }
        }
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn view_of(point: &Vector3d, position: Vector3d, yaw: f64) -> CameraView {
        // camera looking along the global x axis, rotated about z by `yaw`
        let r_cb = Matrix3d::new(0., -1., 0., 0., 0., -1., 1., 0., 0.);
        let r_gb = Quaterniond::from_euler_angles(0., 0., yaw)
            .to_rotation_matrix()
            .into_inner();
        let pose = CameraPose::from_body(&r_gb, &position, &r_cb, &Vector3d::zeros());
        let p_c = pose.world_to_camera(point);
        CameraView {
            pose,
            ray: p_c / p_c[2],
        }
    }

    #[test]
    fn test_exact_triangulation() {
        let point = Vector3d::new(5., 0.7, -0.4);
        let views: Vec<_> = (0..4)
            .map(|i| view_of(&point, Vector3d::new(0., 0.3 * i as f64, 0.1 * i as f64), 0.05 * i as f64))
            .collect();
        let estimate = MidpointTriangulator::default().triangulate(&views).unwrap();
        assert_relative_eq!(estimate, point, epsilon = 1e-9);
    }

    #[test]
    fn test_noisy_rays_are_refined() {
        let point = Vector3d::new(4., -1., 0.5);
        let mut views: Vec<_> = (0..5)
            .map(|i| view_of(&point, Vector3d::new(0., 0.25 * i as f64, 0.), 0.))
            .collect();
        views[1].ray[0] += 2e-3;
        views[3].ray[1] -= 2e-3;
        let estimate = MidpointTriangulator::default().triangulate(&views).unwrap();
        assert!((estimate - point).norm() < 0.1);
    }

    #[test]
    fn test_degenerate_geometry() {
        let point = Vector3d::new(5., 0., 0.);
        let triangulator = MidpointTriangulator::default();

        let one = vec![view_of(&point, Vector3d::zeros(), 0.)];
        assert_eq!(
            triangulator.triangulate(&one),
            Err(TriangulationError::TooFewViews(1))
        );

        // pure rotation gives parallel rays
        let rotation_only = vec![
            view_of(&point, Vector3d::zeros(), 0.),
            view_of(&point, Vector3d::zeros(), 0.1),
        ];
        assert!(matches!(
            triangulator.triangulate(&rotation_only),
            Err(TriangulationError::InsufficientParallax(_))
        ));
    }
}
