use crate::math::{exp_quaternion, skew};
use crate::my_types::*;
use crate::noise::*;
use crate::state::*;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuSample {
    pub time: f64,
    /// Angular velocity, body frame, rad/s
    pub gyro: Vector3d,
    /// Specific force, body frame, m/s^2
    pub acce: Vector3d,
}

impl ImuSample {
    pub fn is_finite(&self) -> bool {
        self.time.is_finite()
            && self.gyro.iter().all(|x| x.is_finite())
            && self.acce.iter().all(|x| x.is_finite())
    }
}

/// Advance the nominal body state from `previous` to `current`.
///
/// Attitude uses the mean bias-corrected rate over the interval, velocity
/// and position are trapezoidal in the gravity-compensated acceleration.
pub fn integrate_nominal(
    state: &mut NominalState,
    previous: &ImuSample,
    current: &ImuSample,
    gravity: &Vector3d,
) {
    let dt = current.time - previous.time;
    let omega = 0.5 * (previous.gyro + current.gyro) - state.gyro_bias;

    let r0 = state.rotation();
    let mut orientation = state.orientation * exp_quaternion(omega * dt);
    orientation.renormalize();
    let r1 = orientation.to_rotation_matrix().into_inner();

    let acc0 = r0 * (previous.acce - state.acce_bias) + gravity;
    let acc1 = r1 * (current.acce - state.acce_bias) + gravity;
    let velocity = state.velocity + 0.5 * (acc0 + acc1) * dt;

    state.position += 0.5 * (state.velocity + velocity) * dt;
    state.velocity = velocity;
    state.orientation = orientation;
}

/// Discrete error transition `phi` and process noise `Q` over `dt`.
///
/// `gyro` and `acce` are bias corrected, `rotation` takes body vectors to
/// the global frame.
pub fn error_transition(
    rotation: &Matrix3d,
    gyro: &Vector3d,
    acce: &Vector3d,
    dt: f64,
    nc: &Matrixd,
) -> (Matrixd, Matrixd) {
    let b = ERR_BODY_SIZE;
    let mut f = Matrixd::zeros(b, b);
    f.fixed_view_mut::<3, 3>(ERR_THETA, ERR_THETA)
        .copy_from(&-skew(*gyro));
    f.fixed_view_mut::<3, 3>(ERR_THETA, ERR_BG)
        .copy_from(&-Matrix3d::identity());
    f.fixed_view_mut::<3, 3>(ERR_POS, ERR_VEL)
        .copy_from(&Matrix3d::identity());
    f.fixed_view_mut::<3, 3>(ERR_VEL, ERR_THETA)
        .copy_from(&(-rotation * skew(*acce)));
    f.fixed_view_mut::<3, 3>(ERR_VEL, ERR_BA)
        .copy_from(&-rotation);

    let mut g = Matrixd::zeros(b, NOISE_SIZE);
    g.fixed_view_mut::<3, 3>(ERR_THETA, NOISE_GYRO)
        .copy_from(&-Matrix3d::identity());
    g.fixed_view_mut::<3, 3>(ERR_VEL, NOISE_ACCE)
        .copy_from(&-rotation);
    g.fixed_view_mut::<3, 3>(ERR_BG, NOISE_GYRO_WALK)
        .copy_from(&Matrix3d::identity());
    g.fixed_view_mut::<3, 3>(ERR_BA, NOISE_ACCE_WALK)
        .copy_from(&Matrix3d::identity());

    let f_dt = f * dt;
    let phi = Matrixd::identity(b, b) + &f_dt + &f_dt * &f_dt * 0.5;
    let q = &phi * &g * nc * g.transpose() * phi.transpose() * dt;
    (phi, q)
}
