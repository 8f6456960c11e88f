use serde::Deserialize;

use crate::my_types::*;

/// Continuous-time IMU noise densities and the visual measurement noise.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct NoiseModel {
    /// Gyroscope white noise, rad / (s sqrt(Hz))
    pub gyro_noise: f64,
    /// Accelerometer white noise, m / (s^2 sqrt(Hz))
    pub acce_noise: f64,
    /// Gyroscope bias random walk, rad / (s^2 sqrt(Hz))
    pub gyro_bias_walk: f64,
    /// Accelerometer bias random walk, m / (s^3 sqrt(Hz))
    pub acce_bias_walk: f64,
    /// Standard deviation of a feature observation, pixels
    pub pixel_noise: f64,
}

pub const NOISE_GYRO: usize = 0;
pub const NOISE_ACCE: usize = 3;
pub const NOISE_GYRO_WALK: usize = 6;
pub const NOISE_ACCE_WALK: usize = 9;
pub const NOISE_SIZE: usize = 12;

impl NoiseModel {
    /// The spectral density matrix `Nc`, ordered gyro, acce, gyro walk, acce walk.
    pub fn continuous_covariance(&self) -> Matrixd {
        let mut nc = Matrixd::zeros(NOISE_SIZE, NOISE_SIZE);
        let densities = [
            (NOISE_GYRO, self.gyro_noise),
            (NOISE_ACCE, self.acce_noise),
            (NOISE_GYRO_WALK, self.gyro_bias_walk),
            (NOISE_ACCE_WALK, self.acce_bias_walk),
        ];
        for (offset, density) in densities {
            nc.fixed_view_mut::<3, 3>(offset, offset)
                .copy_from(&(density.powi(2) * Matrix3d::identity()));
        }
        nc
    }

    pub fn measurement_variance(&self) -> f64 {
        self.pixel_noise.powi(2)
    }

    pub fn is_valid(&self) -> bool {
        [
            self.gyro_noise,
            self.acce_noise,
            self.gyro_bias_walk,
            self.acce_bias_walk,
        ]
        .iter()
        .all(|x| x.is_finite() && *x >= 0.)
            && self.pixel_noise.is_finite()
            && self.pixel_noise > 0.
    }
}

impl Default for NoiseModel {
    fn default() -> Self {
        // EuRoC ADIS16448 datasheet values
        Self {
            gyro_noise: 1.6968e-4,
            acce_noise: 2.0e-3,
            gyro_bias_walk: 1.9393e-5,
            acce_bias_walk: 3.0e-3,
            pixel_noise: 1.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_continuous_covariance_layout() {
        let noise = NoiseModel {
            gyro_noise: 1.,
            acce_noise: 2.,
            gyro_bias_walk: 3.,
            acce_bias_walk: 4.,
            pixel_noise: 0.5,
        };
        let nc = noise.continuous_covariance();
        assert_eq!(nc.shape(), (12, 12));
        assert_eq!(nc[(0, 0)], 1.);
        assert_eq!(nc[(NOISE_ACCE + 1, NOISE_ACCE + 1)], 4.);
        assert_eq!(nc[(NOISE_GYRO_WALK + 2, NOISE_GYRO_WALK + 2)], 9.);
        assert_eq!(nc[(NOISE_ACCE_WALK, NOISE_ACCE_WALK)], 16.);
        assert_eq!(nc[(0, 1)], 0.);
        assert_eq!(noise.measurement_variance(), 0.25);
    }

    #[test]
    fn test_validity() {
        assert!(NoiseModel::default().is_valid());
        let zero_pixel = NoiseModel {
            pixel_noise: 0.,
            ..NoiseModel::default()
        };
        assert!(!zero_pixel.is_valid());
        let nan_gyro = NoiseModel {
            gyro_noise: f64::NAN,
            ..NoiseModel::default()
        };
        assert!(!nan_gyro.is_valid());
    }
}
