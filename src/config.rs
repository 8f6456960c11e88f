use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use serde::Deserialize;

use crate::noise::NoiseModel;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[derive(clap::Parser)]
#[serde(default)]
pub struct Config {
    #[clap(long, default_value = "0")]
    pub seed: u64,

    #[clap(long, default_value = "9.81")]
    pub gravity: f64,

    /// Maximum number of clones kept in the sliding window
    #[clap(long, default_value = "20")]
    pub window_size: usize,

    #[clap(long, default_value = "1.6968e-4")]
    pub gyro_noise: f64,

    #[clap(long, default_value = "2.0e-3")]
    pub acce_noise: f64,

    #[clap(long, default_value = "1.9393e-5")]
    pub gyro_bias_walk: f64,

    #[clap(long, default_value = "3.0e-3")]
    pub acce_bias_walk: f64,

    /// Feature observation noise in pixels
    #[clap(long, default_value = "1.0")]
    pub pixel_noise: f64,

    /// Diagonal of the initial error covariance
    #[clap(long, default_value = "1e-4")]
    pub initial_covariance: f64,

    /// Longest IMU interval, in seconds, that is still integrated
    #[clap(long, default_value = "0.5")]
    pub max_imu_gap: f64,

    #[clap(long, default_value = "1.0")]
    pub min_parallax_deg: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["msckf-mono"])
    }
}

impl Config {
    pub fn noise(&self) -> NoiseModel {
        NoiseModel {
            gyro_noise: self.gyro_noise,
            acce_noise: self.acce_noise,
            gyro_bias_walk: self.gyro_bias_walk,
            acce_bias_walk: self.acce_bias_walk,
            pixel_noise: self.pixel_noise,
        }
    }

    /// Read a JSON object; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .context(format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&text)
            .context(format!("Invalid config file {}", path.display()))
    }
}
