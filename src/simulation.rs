use std::collections::VecDeque;
use std::f64::consts::PI;

use anyhow::{anyhow, Result};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::camera::{Camera, CameraPose};
use crate::dataset::*;
use crate::my_types::*;
use crate::noise::NoiseModel;

/// Camera looking along body x, image x to the right (body -y), image y
/// down (body -z).
pub fn forward_camera_rotation() -> Matrix3d {
    Matrix3d::new(0., -1., 0., 0., 0., -1., 1., 0., 0.)
}

#[derive(Clone, Debug)]
pub struct SimulationOptions {
    pub duration: f64,
    pub imu_rate: f64,
    pub camera_rate: f64,
    pub landmark_count: usize,
    /// Body circles the origin at this radius
    pub radius: f64,
    pub angular_rate: f64,
    /// Amplitude of the vertical oscillation
    pub bounce: f64,
    /// Radius of the landmark cylinder
    pub wall_radius: f64,
    pub gravity: f64,
    /// Sensor noise, `None` for exact measurements
    pub noise: Option<NoiseModel>,
    pub seed: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            duration: 10.,
            imu_rate: 200.,
            camera_rate: 20.,
            landmark_count: 400,
            radius: 1.,
            angular_rate: 0.5,
            bounce: 0.1,
            wall_radius: 6.,
            gravity: 9.81,
            noise: Some(NoiseModel::default()),
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroundTruth {
    pub orientation: Quaterniond,
    pub position: Vector3d,
    pub velocity: Vector3d,
    /// Global frame
    pub acceleration: Vector3d,
    /// Body frame
    pub angular_velocity: Vector3d,
}

/// Circle around the global z axis facing outwards, with a vertical
/// oscillation at twice the turn rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CircularTrajectory {
    pub radius: f64,
    pub angular_rate: f64,
    pub bounce: f64,
}

impl CircularTrajectory {
    pub fn at(&self, t: f64) -> GroundTruth {
        let (r, w, h) = (self.radius, self.angular_rate, self.bounce);
        let (s, c) = (w * t).sin_cos();
        let (s2, c2) = (2. * w * t).sin_cos();
        GroundTruth {
            orientation: Quaterniond::from_euler_angles(0., 0., w * t),
            position: Vector3d::new(r * c, r * s, h * s2),
            velocity: Vector3d::new(-r * w * s, r * w * c, 2. * w * h * c2),
            acceleration: Vector3d::new(-r * w * w * c, -r * w * w * s, -4. * w * w * h * s2),
            angular_velocity: Vector3d::new(0., 0., w),
        }
    }
}

struct SensorNoise {
    gyro: Normal<f64>,
    acce: Normal<f64>,
    pixel: Normal<f64>,
}

/// Synthetic run: the body circles inside a cylinder of landmarks, facing
/// outwards, while bobbing up and down.
pub struct Simulation {
    options: SimulationOptions,
    camera: Camera,
    r_cb: Matrix3d,
    camera_offset: Vector3d,
    landmarks: Vec<Vector3d>,
    rng: Xoshiro256PlusPlus,
    noise: Option<SensorNoise>,
    imu_index: u64,
    image_index: u64,
    pending: VecDeque<SensorData>,
}

impl Simulation {
    pub fn new(
        options: SimulationOptions,
        camera: Camera,
        r_cb: Matrix3d,
        camera_offset: Vector3d,
    ) -> Result<Self> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(options.seed);
        let landmarks = (0..options.landmark_count)
            .map(|_| {
                let angle = rng.gen_range(0.0..2. * PI);
                let height = rng.gen_range(-2.0..2.0);
                Vector3d::new(
                    options.wall_radius * angle.cos(),
                    options.wall_radius * angle.sin(),
                    height,
                )
            })
            .collect();
        let noise = match &options.noise {
            Some(noise) => {
                let normal = |std: f64| Normal::new(0., std).map_err(|e| anyhow!("{e}"));
                Some(SensorNoise {
                    gyro: normal(noise.gyro_noise * options.imu_rate.sqrt())?,
                    acce: normal(noise.acce_noise * options.imu_rate.sqrt())?,
                    pixel: normal(noise.pixel_noise)?,
                })
            }
            None => None,
        };
        Ok(Self {
            options,
            camera,
            r_cb,
            camera_offset,
            landmarks,
            rng,
            noise,
            imu_index: 0,
            image_index: 0,
            pending: VecDeque::new(),
        })
    }

    pub fn trajectory(&self) -> CircularTrajectory {
        CircularTrajectory {
            radius: self.options.radius,
            angular_rate: self.options.angular_rate,
            bounce: self.options.bounce,
        }
    }

    pub fn ground_truth(&self, t: f64) -> GroundTruth {
        self.trajectory().at(t)
    }

    pub fn landmarks(&self) -> &[Vector3d] {
        &self.landmarks
    }

    pub fn imu_camera_rotation(&self) -> Matrix3d {
        self.r_cb
    }

    pub fn camera_offset(&self) -> Vector3d {
        self.camera_offset
    }

    fn gravity(&self) -> Vector3d {
        Vector3d::new(0., 0., -self.options.gravity)
    }

    fn sample_vector(rng: &mut Xoshiro256PlusPlus, normal: &Normal<f64>) -> Vector3d {
        Vector3d::new(normal.sample(rng), normal.sample(rng), normal.sample(rng))
    }

    fn imu_samples(&mut self, t: f64) {
        let truth = self.ground_truth(t);
        let mut gyro = truth.angular_velocity;
        let mut acce = truth.orientation.inverse() * (truth.acceleration - self.gravity());
        if let Some(noise) = &self.noise {
            gyro += Self::sample_vector(&mut self.rng, &noise.gyro);
            acce += Self::sample_vector(&mut self.rng, &noise.acce);
        }
        self.pending.push_back(SensorData {
            time: t,
            sensor: InputSensor::Gyroscope(gyro),
        });
        self.pending.push_back(SensorData {
            time: t,
            sensor: InputSensor::Accelerometer(acce),
        });
    }

    fn image(&mut self, t: f64) {
        let truth = self.ground_truth(t);
        let pose = CameraPose::from_body(
            &truth.orientation.to_rotation_matrix().into_inner(),
            &truth.position,
            &self.r_cb,
            &self.camera_offset,
        );
        let mut features = vec![];
        for (id, landmark) in self.landmarks.iter().enumerate() {
            let p_c = pose.world_to_camera(landmark);
            let Some(mut pixel) = self.camera.model.project(p_c) else {
                continue;
            };
            if let Some(noise) = &self.noise {
                pixel += Vector2d::new(
                    noise.pixel.sample(&mut self.rng),
                    noise.pixel.sample(&mut self.rng),
                );
            }
            if self.camera.is_inside(&pixel) {
                features.push(PixelFeature {
                    id,
                    pixel: [pixel[0], pixel[1]],
                });
            }
        }
        self.pending.push_back(SensorData {
            time: t,
            sensor: InputSensor::Features(features),
        });
    }
}

impl SensorSource for Simulation {
    fn next(&mut self) -> Result<Option<SensorData>> {
        while self.pending.is_empty() {
            let imu_time = self.imu_index as f64 / self.options.imu_rate;
            let image_time = self.image_index as f64 / self.options.camera_rate;
            let t = imu_time.min(image_time);
            if t > self.options.duration {
                return Ok(None);
            }
            // IMU first on ties so the filter is propagated up to the image
            if imu_time <= image_time {
                self.imu_samples(imu_time);
                self.imu_index += 1;
            } else {
                self.image(image_time);
                self.image_index += 1;
            }
        }
        Ok(self.pending.pop_front())
    }

    fn length(&self) -> u64 {
        (self.options.duration * self.options.camera_rate) as u64 + 1
    }
}
