pub mod camera;
pub mod chi_square;
pub mod config;
pub mod covariance;
pub mod dataset;
pub mod error;
pub mod feature;
pub mod kalman_filter;
pub mod math;
pub mod measurement;
pub mod my_types;
pub mod noise;
pub mod pinhole;
pub mod propagation;
pub mod simulation;
pub mod state;
pub mod triangulation;
pub mod vio;
pub mod window;
