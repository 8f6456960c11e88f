use std::collections::BTreeMap;

use anyhow::{Context as AnyhowContext, Result};
use tracing::{debug, warn};
use tracing::Span;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::camera::*;
use crate::dataset::*;
use crate::error::FilterError;
use crate::kalman_filter::*;
use crate::my_types::*;

/// Running totals over all processed images.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VioStats {
    pub imu_samples: usize,
    pub images: usize,
    pub skipped_images: usize,
    pub rejected_samples: usize,
    pub consumed_tracks: usize,
    pub outlier_tracks: usize,
    pub residual_rows: usize,
}

#[derive(Debug)]
pub struct VIO {
    /// The time of the last sensor data
    last_time: Option<f64>,
    last_gyro: Option<(f64, Vector3d)>,
    last_acc: Option<(f64, Vector3d)>,
    orientation_initialized: bool,
    /// Level the initial orientation with the first accelerometer reading
    align_gravity: bool,
    filter: Msckf,
    camera: Camera,
    stats: VioStats,
    /// Latest triangulated position of every feature used in an update
    landmarks: BTreeMap<FeatureId, Vector3d>,
}

impl VIO {
    /// `camera` is used to un-project incoming pixels, the filter keeps its
    /// own model for residuals.
    pub fn new(filter: Msckf, camera: Camera) -> Self {
        Self {
            last_time: None,
            last_gyro: None,
            last_acc: None,
            orientation_initialized: false,
            align_gravity: false,
            filter,
            camera,
            stats: VioStats::default(),
            landmarks: BTreeMap::new(),
        }
    }

    /// Assume the body starts at rest and take the initial roll and pitch
    /// from gravity. Yaw stays as set on the filter.
    pub fn with_gravity_alignment(mut self) -> Self {
        self.align_gravity = true;
        self
    }

    /// Returns false when the sample was not used.
    pub fn process_data(&mut self, data: &SensorData) -> Result<bool> {
        if let Some(last_time) = self.last_time {
            if data.time < last_time {
                warn!("discard unordered sample");
                self.stats.rejected_samples += 1;
                return Ok(false);
            }
        }
        self.last_time = Some(data.time);

        match data.sensor {
            InputSensor::Features(ref features) => {
                Span::current().pb_inc(1);
                if !self.orientation_initialized {
                    self.stats.skipped_images += 1;
                    return Ok(false);
                }
                return self.process_features(data.time, features);
            }
            InputSensor::Gyroscope(gyro) => {
                self.last_gyro = Some((data.time, gyro));
            }
            InputSensor::Accelerometer(acc) => {
                self.last_acc = Some((data.time, acc));
            }
        }

        // Gyroscope and accelerometer samples come paired one-to-one, in
        // either order.
        if let (Some((time_gyro, gyro)), Some((time_acc, acc))) = (self.last_gyro, self.last_acc) {
            if time_acc >= time_gyro {
                if !self.orientation_initialized && self.align_gravity {
                    self.align_with_gravity(&acc);
                }
                self.process_imu(time_gyro, gyro, acc)?;
                self.orientation_initialized = true;
                // allow reuse of acc data
                self.last_gyro = None;
            }
        }

        Ok(true)
    }

    pub fn process_imu(&mut self, time: f64, gyro: Vector3d, acc: Vector3d) -> Result<()> {
        self.stats.imu_samples += 1;
        let result = self.filter.propagate(time, gyro, acc);
        self.handle(result).map(|_| ())
    }

    pub fn process_features(&mut self, time: f64, features: &[PixelFeature]) -> Result<bool> {
        let observations: Vec<(FeatureId, Vector3d)> = features
            .iter()
            .filter_map(|f| {
                let ray = self.camera.model.back_project(f.pixel())?;
                Some((f.id, ray))
            })
            .collect();
        if observations.len() < features.len() {
            debug!(
                dropped = features.len() - observations.len(),
                "features could not be un-projected"
            );
        }

        let result = self.filter.process_image(time, &observations);
        let report = match self.handle(result)? {
            Some(report) => report,
            None => return Ok(false),
        };
        self.stats.images += 1;
        self.stats.consumed_tracks += report.consumed;
        self.stats.outlier_tracks += report.outliers;
        self.stats.residual_rows += report.residual_rows;
        self.landmarks.extend(report.landmarks);
        Ok(true)
    }

    fn align_with_gravity(&mut self, acc: &Vector3d) {
        let Some(level) = Quaterniond::rotation_between(acc, &Vector3d::z()) else {
            warn!("cannot level on a degenerate accelerometer sample");
            return;
        };
        let yaw = self.filter.orientation().euler_angles().2;
        let (roll, pitch, _) = level.euler_angles();
        let state = self.filter.state().clone();
        self.filter.set_nominal_state(
            Quaterniond::from_euler_angles(roll, pitch, yaw),
            state.position,
            state.velocity,
            state.gyro_bias,
            state.acce_bias,
        );
        debug!(roll, pitch, "orientation initialized from gravity");
    }

    /// Malformed input skips the sample, anything else stops the run.
    fn handle<T>(&mut self, result: Result<T, FilterError>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(FilterError::MalformedInput(e)) => {
                warn!(error = %e, "skipping sample");
                self.stats.rejected_samples += 1;
                Ok(None)
            }
            Err(e) => Err(e).context("filter failed"),
        }
    }

    pub fn filter(&self) -> &Msckf {
        &self.filter
    }

    pub fn stats(&self) -> &VioStats {
        &self.stats
    }

    pub fn landmarks(&self) -> &BTreeMap<FeatureId, Vector3d> {
        &self.landmarks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::pinhole::PinholeModel;

    fn camera_model() -> Box<PinholeModel> {
        Box::new(PinholeModel::new(Matrix3d::new(
            450., 0., 360., 0., 450., 240., 0., 0., 1.,
        )))
    }

    fn vio() -> VIO {
        let filter = Msckf::new(&Config::default(), camera_model()).unwrap();
        let camera = Camera {
            kind: CameraKind::Pinhole,
            model: camera_model(),
            image_shape: (720, 480),
        };
        VIO::new(filter, camera)
    }

    fn data(time: f64, sensor: InputSensor) -> SensorData {
        SensorData { time, sensor }
    }

    #[test]
    fn test_images_wait_for_imu() {
        let mut vio = vio();
        let features = InputSensor::Features(vec![]);
        assert!(!vio.process_data(&data(0., features.clone())).unwrap());
        assert_eq!(vio.stats().skipped_images, 1);

        let g = Vector3d::new(0., 0., 9.81);
        vio.process_data(&data(0.01, InputSensor::Accelerometer(g))).unwrap();
        vio.process_data(&data(0.01, InputSensor::Gyroscope(Vector3d::zeros()))).unwrap();
        assert_eq!(vio.stats().imu_samples, 1);
        assert!(vio.process_data(&data(0.02, features)).unwrap());
        assert_eq!(vio.stats().images, 1);
        assert_eq!(vio.filter().window().len(), 1);
    }

    #[test]
    fn test_gyro_first_pairing() {
        let mut vio = vio();
        let g = Vector3d::new(0., 0., 9.81);
        for i in 0..5 {
            let t = i as f64 * 0.005;
            vio.process_data(&data(t, InputSensor::Gyroscope(Vector3d::zeros()))).unwrap();
            vio.process_data(&data(t, InputSensor::Accelerometer(g))).unwrap();
        }
        assert_eq!(vio.stats().imu_samples, 5);
        assert_eq!(vio.filter().current_time(), Some(0.02));
    }

    #[test]
    fn test_gravity_alignment() {
        let mut vio = vio().with_gravity_alignment();
        let tilt = Quaterniond::from_euler_angles(0.2, -0.1, 0.);
        let acc = tilt.inverse() * Vector3d::new(0., 0., 9.81);
        vio.process_data(&data(0., InputSensor::Gyroscope(Vector3d::zeros()))).unwrap();
        vio.process_data(&data(0., InputSensor::Accelerometer(acc))).unwrap();
        let leveled = vio.filter().orientation() * acc;
        assert!((leveled - Vector3d::new(0., 0., 9.81)).norm() < 1e-9);
    }

    #[test]
    fn test_unordered_sample_is_discarded() {
        let mut vio = vio();
        vio.process_data(&data(1., InputSensor::Gyroscope(Vector3d::zeros()))).unwrap();
        assert!(!vio.process_data(&data(0.5, InputSensor::Gyroscope(Vector3d::zeros()))).unwrap());
        assert_eq!(vio.stats().rejected_samples, 1);
    }

    #[test]
    fn test_pixels_are_unprojected() {
        let mut vio = vio();
        let g = Vector3d::new(0., 0., 9.81);
        vio.process_data(&data(0., InputSensor::Accelerometer(g))).unwrap();
        vio.process_data(&data(0., InputSensor::Gyroscope(Vector3d::zeros()))).unwrap();
        let features = vec![PixelFeature {
            id: 9,
            pixel: [360., 240.],
        }];
        vio.process_data(&data(0.05, InputSensor::Features(features))).unwrap();
        let track = vio.filter().tracks().get(9).unwrap();
        let ray = track.observations.values().next().unwrap();
        assert!((ray - Vector3d::new(0., 0., 1.)).norm() < 1e-12);
    }
}
