use std::fmt::Debug;

use crate::my_types::*;

#[derive(Debug)]
pub struct Camera {
    pub kind: CameraKind,
    pub model: Box<dyn CameraModel>,
    pub image_shape: ImageShape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraKind {
    Pinhole,
}

pub trait CameraModel: Debug + Send {
    /// Pixel to an undistorted ray `(x, y, 1)` in the camera frame.
    fn back_project(&self, pixel: Vector2d) -> Option<Vector3d>;

    /// Camera-frame point to pixel, with the 2x3 derivative of the pixel
    /// with respect to the point when requested.
    fn project_with_derivative(
        &self,
        ray: Vector3d,
        compute_derivative: bool,
    ) -> (Option<Vector2d>, Option<Matrix23d>);

    fn project(&self, ray: Vector3d) -> Option<Vector2d> {
        self.project_with_derivative(ray, false).0
    }
}

impl Camera {
    pub fn is_inside(&self, pixel: &Vector2d) -> bool {
        let (width, height) = self.image_shape;
        pixel[0] >= 0. && pixel[1] >= 0. && pixel[0] < width as f64 && pixel[1] < height as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CameraPose {
    /// Take a vector from the camera frame to world frame
    pub orientation: Matrix3d,
    pub position: Vector3d,
}

impl CameraPose {
    /// `r_cb` takes body vectors to the camera frame, `p_bc` is the camera
    /// origin in the body frame.
    pub fn from_body(
        body_orientation: &Matrix3d,
        body_position: &Vector3d,
        r_cb: &Matrix3d,
        p_bc: &Vector3d,
    ) -> Self {
        Self {
            orientation: body_orientation * r_cb.transpose(),
            position: body_position + body_orientation * p_bc,
        }
    }

    pub fn world_to_camera(&self, point: &Vector3d) -> Vector3d {
        self.orientation.transpose() * (point - self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_pose_from_body() {
        let r_gb = Quaterniond::from_euler_angles(0.1, 0.2, 0.3)
            .to_rotation_matrix()
            .into_inner();
        let p_gb = Vector3d::new(1., -2., 0.5);
        let r_cb = Matrix3d::new(0., -1., 0., 0., 0., -1., 1., 0., 0.);
        let p_bc = Vector3d::new(0.05, 0.01, -0.02);
        let pose = CameraPose::from_body(&r_gb, &p_gb, &r_cb, &p_bc);

        let point = Vector3d::new(4., 1., 2.);
        let p_b = r_gb.transpose() * (point - p_gb);
        let expected = r_cb * (p_b - p_bc);
        assert_relative_eq!(pose.world_to_camera(&point), expected, epsilon = 1e-12);
    }
}
