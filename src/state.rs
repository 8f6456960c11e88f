use crate::math::apply_rotation_correction;
use crate::my_types::*;
use crate::window::SlidingWindow;

// Error state of the current body, in covariance order.
pub const ERR_THETA: usize = 0; // Attitude, body frame rotation vector.
pub const ERR_POS: usize = 3;
pub const ERR_VEL: usize = 6;
pub const ERR_BG: usize = 9; // Gyroscope bias.
pub const ERR_BA: usize = 12; // Accelerometer bias.
pub const ERR_BODY_SIZE: usize = 15;

// Error state of one clone.
pub const CLONE_THETA: usize = 0;
pub const CLONE_POS: usize = 3;
pub const CLONE_ERR_SIZE: usize = 6;

// Flattened nominal vector, [w, x, y, z] quaternions.
pub const NOMINAL_BODY_SIZE: usize = 16;
pub const CLONE_NOMINAL_SIZE: usize = 7;

pub fn clone_offset(position: usize) -> usize {
    ERR_BODY_SIZE + CLONE_ERR_SIZE * position
}

pub fn error_dim(window_len: usize) -> usize {
    ERR_BODY_SIZE + CLONE_ERR_SIZE * window_len
}

/// Best estimate of the current body state.
#[derive(Clone, Debug, PartialEq)]
pub struct NominalState {
    /// Takes a vector from the body frame to the global frame
    pub orientation: Quaterniond,
    pub position: Vector3d,
    pub velocity: Vector3d,
    pub gyro_bias: Vector3d,
    pub acce_bias: Vector3d,
    /// Camera origin in the body frame
    pub camera_offset: Vector3d,
}

impl Default for NominalState {
    fn default() -> Self {
        Self {
            orientation: Quaterniond::identity(),
            position: Vector3d::zeros(),
            velocity: Vector3d::zeros(),
            gyro_bias: Vector3d::zeros(),
            acce_bias: Vector3d::zeros(),
            camera_offset: Vector3d::zeros(),
        }
    }
}

impl NominalState {
    pub fn rotation(&self) -> Matrix3d {
        self.orientation.to_rotation_matrix().into_inner()
    }

    pub fn is_finite(&self) -> bool {
        self.orientation.coords.iter().all(|x| x.is_finite())
            && [
                self.position,
                self.velocity,
                self.gyro_bias,
                self.acce_bias,
                self.camera_offset,
            ]
            .iter()
            .all(|v| v.iter().all(|x| x.is_finite()))
    }

    /// Fold an error-state correction into the body and every clone.
    pub fn apply_correction(&mut self, window: &mut SlidingWindow, delta: &Vectord) {
        debug_assert_eq!(delta.len(), error_dim(window.len()));
        self.orientation = apply_rotation_correction(
            &self.orientation,
            delta.fixed_rows::<3>(ERR_THETA).into_owned(),
        );
        self.position += delta.fixed_rows::<3>(ERR_POS);
        self.velocity += delta.fixed_rows::<3>(ERR_VEL);
        self.gyro_bias += delta.fixed_rows::<3>(ERR_BG);
        self.acce_bias += delta.fixed_rows::<3>(ERR_BA);

        for (i, clone) in window.iter_mut().enumerate() {
            let offset = clone_offset(i);
            clone.orientation = apply_rotation_correction(
                &clone.orientation,
                delta.fixed_rows::<3>(offset + CLONE_THETA).into_owned(),
            );
            clone.position += delta.fixed_rows::<3>(offset + CLONE_POS);
        }
    }

    /// The full nominal vector, `16 + 7 * window.len()` long.
    pub fn to_vector(&self, window: &SlidingWindow) -> Vectord {
        let mut v = Vectord::zeros(NOMINAL_BODY_SIZE + CLONE_NOMINAL_SIZE * window.len());
        v.fixed_rows_mut::<4>(0)
            .copy_from(&quaternion_wxyz(&self.orientation));
        v.fixed_rows_mut::<3>(4).copy_from(&self.position);
        v.fixed_rows_mut::<3>(7).copy_from(&self.velocity);
        v.fixed_rows_mut::<3>(10).copy_from(&self.gyro_bias);
        v.fixed_rows_mut::<3>(13).copy_from(&self.acce_bias);
        for (i, clone) in window.iter().enumerate() {
            let offset = NOMINAL_BODY_SIZE + CLONE_NOMINAL_SIZE * i;
            v.fixed_rows_mut::<4>(offset)
                .copy_from(&quaternion_wxyz(&clone.orientation));
            v.fixed_rows_mut::<3>(offset + 4).copy_from(&clone.position);
        }
        v
    }
}

fn quaternion_wxyz(q: &Quaterniond) -> nalgebra::Vector4<f64> {
    nalgebra::Vector4::new(q.w, q.i, q.j, q.k)
}
