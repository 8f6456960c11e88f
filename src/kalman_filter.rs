use tracing::{debug, instrument, warn};

use crate::camera::{CameraModel, CameraPose};
use crate::config::Config;
use crate::covariance::ErrorCovariance;
use crate::error::{FilterError, MalformedInput, TrackRejection};
use crate::feature::FeatureTrackManager;
use crate::measurement::{MeasurementContext, TrackMeasurement};
use crate::my_types::*;
use crate::noise::NoiseModel;
use crate::propagation::{error_transition, integrate_nominal, ImuSample};
use crate::state::*;
use crate::triangulation::{MidpointTriangulator, Triangulator};
use crate::window::{CloneId, SlidingWindow};

/// Outcome of one image cycle.
#[derive(Debug, Clone)]
pub struct ImageReport {
    pub clone_id: CloneId,
    /// Tracks whose residual entered the update
    pub consumed: usize,
    pub outliers: usize,
    pub degenerate: usize,
    pub too_short: usize,
    /// Tracks dropped because their only observation was marginalized
    pub retired: usize,
    /// Observations discarded before tracking for being non-finite or behind the camera
    pub dropped_observations: usize,
    pub residual_rows: usize,
    pub marginalized: Vec<CloneId>,
    /// Triangulated positions of the consumed tracks
    pub landmarks: Vec<(FeatureId, Vector3d)>,
}

impl ImageReport {
    fn new(clone_id: CloneId) -> Self {
        Self {
            clone_id,
            consumed: 0,
            outliers: 0,
            degenerate: 0,
            too_short: 0,
            retired: 0,
            dropped_observations: 0,
            residual_rows: 0,
            marginalized: vec![],
            landmarks: vec![],
        }
    }
}

/// Multi-state constraint Kalman filter for one IMU and one camera.
///
/// IMU samples go to [`propagate`](Msckf::propagate), feature observations
/// of each image to [`process_image`](Msckf::process_image). Both take
/// `&mut self`; an instance shared between threads belongs behind a single
/// mutex.
#[derive(Debug)]
pub struct Msckf {
    state: NominalState,
    window: SlidingWindow,
    covariance: ErrorCovariance,
    tracks: FeatureTrackManager,
    noise: NoiseModel,
    camera: Box<dyn CameraModel>,
    triangulator: Box<dyn Triangulator>,
    /// Takes a vector from the body frame to the camera frame
    r_cb: Matrix3d,
    gravity: Vector3d,
    max_imu_gap: f64,
    last_imu: Option<ImuSample>,
    /// Latest IMU or image timestamp
    current_time: Option<f64>,
    diverged: bool,
}

impl Msckf {
    pub fn new(config: &Config, camera: Box<dyn CameraModel>) -> Result<Self, FilterError> {
        let mut filter = Self {
            state: NominalState::default(),
            window: SlidingWindow::new(config.window_size),
            covariance: ErrorCovariance::identity(0.),
            tracks: FeatureTrackManager::new(),
            noise: NoiseModel::default(),
            camera,
            triangulator: Box::new(MidpointTriangulator::new(
                config.min_parallax_deg.to_radians(),
            )),
            r_cb: Matrix3d::identity(),
            gravity: Vector3d::new(0., 0., -config.gravity),
            max_imu_gap: config.max_imu_gap,
            last_imu: None,
            current_time: None,
            diverged: false,
        };
        filter.set_noise(config.noise())?;
        filter.set_covariance_identity(config.initial_covariance)?;
        Ok(filter)
    }

    pub fn set_nominal_state(
        &mut self,
        orientation: Quaterniond,
        position: Vector3d,
        velocity: Vector3d,
        gyro_bias: Vector3d,
        acce_bias: Vector3d,
    ) {
        self.state.orientation = orientation;
        self.state.position = position;
        self.state.velocity = velocity;
        self.state.gyro_bias = gyro_bias;
        self.state.acce_bias = acce_bias;
    }

    /// Camera origin in the body frame and the lens model.
    pub fn set_calibration(&mut self, camera_offset: Vector3d, camera: Box<dyn CameraModel>) {
        self.state.camera_offset = camera_offset;
        self.camera = camera;
    }

    pub fn set_imu_camera_rotation(&mut self, r_cb: Matrix3d) {
        self.r_cb = r_cb;
    }

    pub fn set_noise(&mut self, noise: NoiseModel) -> Result<(), FilterError> {
        if !noise.is_valid() {
            return Err(MalformedInput::InvalidParameter("noise parameters").into());
        }
        self.noise = noise;
        Ok(())
    }

    pub fn set_measure_noise(&mut self, pixel_noise: f64) -> Result<(), FilterError> {
        self.set_noise(NoiseModel {
            pixel_noise,
            ..self.noise
        })
    }

    /// `scale` times identity over the whole error state, clones included.
    pub fn set_covariance_identity(&mut self, scale: f64) -> Result<(), FilterError> {
        if !scale.is_finite() || scale < 0. {
            return Err(MalformedInput::InvalidParameter("covariance scale").into());
        }
        self.covariance.set_identity(scale);
        Ok(())
    }

    /// Integrate one IMU sample. The first sample only seeds the integrator.
    pub fn propagate(
        &mut self,
        time: f64,
        angular_velocity: Vector3d,
        linear_acceleration: Vector3d,
    ) -> Result<(), FilterError> {
        self.ensure_healthy()?;
        let sample = ImuSample {
            time,
            gyro: angular_velocity,
            acce: linear_acceleration,
        };
        if !sample.is_finite() {
            return Err(MalformedInput::NonFinite("IMU sample").into());
        }
        if let Some(current) = self.current_time {
            if time < current {
                return Err(MalformedInput::OutOfOrder {
                    previous: current,
                    current: time,
                }
                .into());
            }
        }
        let previous = match self.last_imu {
            Some(previous) => previous,
            None => {
                self.last_imu = Some(sample);
                self.advance_time(time);
                return Ok(());
            }
        };

        let dt = time - previous.time;
        if dt < 0. {
            return Err(MalformedInput::OutOfOrder {
                previous: previous.time,
                current: time,
            }
            .into());
        }
        if dt == 0. {
            self.last_imu = Some(sample);
            return Ok(());
        }
        if dt > self.max_imu_gap {
            warn!(dt, "IMU gap too large, restarting integration");
            self.last_imu = Some(sample);
            self.advance_time(time);
            return Err(MalformedInput::ImuGap {
                dt,
                max: self.max_imu_gap,
            }
            .into());
        }

        let rotation = self.state.rotation();
        let gyro = 0.5 * (previous.gyro + sample.gyro) - self.state.gyro_bias;
        let acce = 0.5 * (previous.acce + sample.acce) - self.state.acce_bias;
        let (phi, q) = error_transition(
            &rotation,
            &gyro,
            &acce,
            dt,
            &self.noise.continuous_covariance(),
        );
        integrate_nominal(&mut self.state, &previous, &sample, &self.gravity);
        self.covariance.propagate(&phi, &q);
        self.last_imu = Some(sample);
        self.advance_time(time);

        let checked = if self.state.is_finite() {
            self.covariance.check()
        } else {
            Err(FilterError::NumericalDegradation(
                "nominal state is not finite".into(),
            ))
        };
        self.latch(checked)
    }

    /// Run one image cycle: clone, track, measure, correct, marginalize.
    ///
    /// `observations` are undistorted rays `(x, y, 1)` in the camera frame.
    #[instrument(skip(self, observations), fields(features = observations.len()))]
    pub fn process_image(
        &mut self,
        time: f64,
        observations: &[(FeatureId, Vector3d)],
    ) -> Result<ImageReport, FilterError> {
        self.ensure_healthy()?;
        if !time.is_finite() {
            return Err(MalformedInput::NonFinite("image timestamp").into());
        }
        if let Some(current) = self.current_time {
            if time < current {
                return Err(MalformedInput::OutOfOrder {
                    previous: current,
                    current: time,
                }
                .into());
            }
        }

        let mut usable = Vec::with_capacity(observations.len());
        let mut dropped = 0;
        for &(id, ray) in observations {
            if ray.iter().all(|x| x.is_finite()) && ray[2] > 0. {
                usable.push((id, ray / ray[2]));
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(dropped, "discarding unusable feature observations");
        }

        let clone_id = self.window.push(
            time,
            self.state.orientation,
            self.state.position,
            self.state.velocity,
        );
        self.covariance.insert_clone_block();
        self.advance_time(time);
        let mut report = ImageReport::new(clone_id);
        report.dropped_observations = dropped;

        let mut ready = self.tracks.observe(clone_id, &usable);
        if self.window.overflow() > 0 {
            ready.extend(self.tracks.take_mature(&self.window.ids()));
        }

        let measurements = self.measure(&ready, &mut report);
        if !measurements.is_empty() {
            let updated = self.update(&measurements);
            report.residual_rows = self.latch(updated)?;
            report.consumed = measurements.len();
            report.landmarks = measurements
                .iter()
                .map(|m| (m.feature_id, m.landmark))
                .collect();
        }

        self.marginalize(&mut report);
        debug!(
            clone = clone_id.0,
            ready = ready.len(),
            consumed = report.consumed,
            outliers = report.outliers,
            degenerate = report.degenerate,
            rows = report.residual_rows,
            "image processed"
        );
        Ok(report)
    }

    fn measure(
        &self,
        ready: &[crate::feature::FeatureTrack],
        report: &mut ImageReport,
    ) -> Vec<TrackMeasurement> {
        let context = MeasurementContext {
            window: &self.window,
            camera: self.camera.as_ref(),
            triangulator: self.triangulator.as_ref(),
            r_cb: &self.r_cb,
            camera_offset: &self.state.camera_offset,
            covariance: self.covariance.matrix(),
            variance: self.noise.measurement_variance(),
        };
        let mut measurements = vec![];
        for track in ready {
            match context.measure(track) {
                Ok(measurement) => measurements.push(measurement),
                Err(TrackRejection::TooShort(_)) => report.too_short += 1,
                Err(rejection @ TrackRejection::Outlier { .. }) => {
                    debug!(feature = track.id, %rejection);
                    report.outliers += 1;
                }
                Err(rejection) => {
                    debug!(feature = track.id, %rejection);
                    report.degenerate += 1;
                }
            }
        }
        measurements
    }

    /// EKF correction with the stacked measurements. Returns the number of
    /// residual rows used.
    fn update(&mut self, measurements: &[TrackMeasurement]) -> Result<usize, FilterError> {
        let n = self.covariance.dim();
        let rows: usize = measurements.iter().map(|m| m.residual.len()).sum();
        let mut h = Matrixd::zeros(rows, n);
        let mut r = Vectord::zeros(rows);
        let mut row = 0;
        for m in measurements {
            let k = m.residual.len();
            h.rows_mut(row, k).copy_from(&m.jacobian);
            r.rows_mut(row, k).copy_from(&m.residual);
            row += k;
        }
        let (h, r) = if rows > n { compress(h, r) } else { (h, r) };

        let variance = self.noise.measurement_variance();
        let ph_t = self.covariance.matrix() * h.transpose();
        let s = &h * &ph_t + Matrixd::identity(h.nrows(), h.nrows()) * variance;
        let cholesky = s.cholesky().ok_or_else(|| {
            FilterError::NumericalDegradation(
                "innovation covariance is not positive definite".into(),
            )
        })?;
        // K = P Hᵀ S⁻¹ = (S⁻¹ H P)ᵀ
        let gain = cholesky.solve(&ph_t.transpose()).transpose();
        let delta = &gain * &r;
        if !delta.iter().all(|x| x.is_finite()) {
            return Err(FilterError::NumericalDegradation(
                "state correction is not finite".into(),
            ));
        }

        self.state.apply_correction(&mut self.window, &delta);
        self.covariance.joseph_update(&gain, &h, variance);
        self.covariance.check()?;
        Ok(h.nrows())
    }

    /// Drop the oldest clones until the window fits its bound.
    fn marginalize(&mut self, report: &mut ImageReport) {
        let count = self.window.overflow();
        if count == 0 {
            return;
        }
        self.covariance.remove_clone_blocks(0, count);
        for _ in 0..count {
            if let Some(clone) = self.window.pop_oldest() {
                report.retired += self.tracks.retire_slot(clone.id).len();
                report.marginalized.push(clone.id);
            }
        }
    }

    fn ensure_healthy(&self) -> Result<(), FilterError> {
        if self.diverged {
            Err(FilterError::Diverged)
        } else {
            Ok(())
        }
    }

    /// Fatal errors poison the instance.
    fn latch<T>(&mut self, result: Result<T, FilterError>) -> Result<T, FilterError> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(error = %e, "filter diverged");
                self.diverged = true;
            }
        }
        result
    }

    fn advance_time(&mut self, time: f64) {
        self.current_time = Some(self.current_time.map_or(time, |t| t.max(time)));
    }

    pub fn orientation(&self) -> Quaterniond {
        self.state.orientation
    }

    pub fn rotation(&self) -> Matrix3d {
        self.state.rotation()
    }

    pub fn position(&self) -> Vector3d {
        self.state.position
    }

    pub fn velocity(&self) -> Vector3d {
        self.state.velocity
    }

    pub fn gyro_bias(&self) -> Vector3d {
        self.state.gyro_bias
    }

    pub fn acce_bias(&self) -> Vector3d {
        self.state.acce_bias
    }

    pub fn camera_offset(&self) -> Vector3d {
        self.state.camera_offset
    }

    pub fn imu_camera_rotation(&self) -> Matrix3d {
        self.r_cb
    }

    pub fn state(&self) -> &NominalState {
        &self.state
    }

    /// Flattened nominal state, `16 + 7 * window length` entries.
    pub fn nominal_vector(&self) -> Vectord {
        self.state.to_vector(&self.window)
    }

    pub fn error_dim(&self) -> usize {
        self.covariance.dim()
    }

    pub fn covariance(&self) -> &Matrixd {
        self.covariance.matrix()
    }

    pub fn window(&self) -> &SlidingWindow {
        &self.window
    }

    pub fn tracks(&self) -> &FeatureTrackManager {
        &self.tracks
    }

    pub fn current_time(&self) -> Option<f64> {
        self.current_time
    }

    pub fn is_diverged(&self) -> bool {
        self.diverged
    }

    /// Pixel of a point given in the camera frame.
    pub fn project_camera_point(&self, point: Vector3d) -> Option<Vector2d> {
        self.camera.project(point)
    }

    /// Pixel of a global point as seen from the current pose.
    pub fn project_global_point(&self, point: Vector3d) -> Option<Vector2d> {
        let pose = CameraPose::from_body(
            &self.state.rotation(),
            &self.state.position,
            &self.r_cb,
            &self.state.camera_offset,
        );
        self.camera.project(pose.world_to_camera(&point))
    }

    pub fn dump_nominal_state(&self, full: bool) -> String {
        let s = &self.state;
        let mut out = format!(
            "q: {:?}\np: {:?}\nv: {:?}\nbg: {:?}\nba: {:?}\np_bc: {:?}\n",
            s.orientation.coords.as_slice(),
            s.position.as_slice(),
            s.velocity.as_slice(),
            s.gyro_bias.as_slice(),
            s.acce_bias.as_slice(),
            s.camera_offset.as_slice(),
        );
        if full {
            out += &self.dump_sliding_window();
        }
        out
    }

    pub fn dump_sliding_window(&self) -> String {
        let mut out = format!("window {}/{}\n", self.window.len(), self.window.max_len());
        for clone in self.window.iter() {
            out += &format!(
                "  #{} t={:.6} q: {:?} p: {:?} v: {:?}\n",
                clone.id.0,
                clone.time,
                clone.orientation.coords.as_slice(),
                clone.position.as_slice(),
                clone.velocity.as_slice(),
            );
        }
        out
    }

    /// The body block only, or the whole matrix when `full`.
    pub fn dump_covariance(&self, full: bool) -> String {
        let m = self.covariance.matrix();
        if full {
            format!("{m:.3e}")
        } else {
            format!(
                "{:.3e}",
                m.view((0, 0), (ERR_BODY_SIZE, ERR_BODY_SIZE)).into_owned()
            )
        }
    }
}

/// Replace a tall measurement system by its triangular factor: with
/// `H = Q₁ T`, the update with `(T, Q₁ᵀ r)` is identical and cheaper.
fn compress(h: Matrixd, mut r: Vectord) -> (Matrixd, Vectord) {
    let n = h.ncols();
    let qr = h.qr();
    qr.q_tr_mul(&mut r);
    (qr.r(), r.rows(0, n).into_owned())
}
