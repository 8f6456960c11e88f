use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::LevelFilter, prelude::*};

use msckf_mono::camera::{Camera, CameraKind};
use msckf_mono::config::*;
use msckf_mono::dataset::*;
use msckf_mono::kalman_filter::Msckf;
use msckf_mono::my_types::*;
use msckf_mono::pinhole::PinholeModel;
use msckf_mono::simulation::*;
use msckf_mono::vio::VIO;

#[derive(Parser)]
pub struct Args {
    /// Folder with a `data.jsonl` recording
    #[clap(short)]
    pub input_folder: Option<String>,
    /// Run on a synthetic trajectory of this length instead of a recording
    #[clap(long)]
    pub simulate_seconds: Option<f64>,
    /// JSON file replacing the command line filter settings
    #[clap(long)]
    pub config_file: Option<String>,
    #[clap(flatten)]
    pub config: Config,
}

/// EuRoC MAV cam0.
fn euroc_camera() -> Camera {
    Camera {
        kind: CameraKind::Pinhole,
        model: Box::new(PinholeModel::from_parameters(
            458.654,
            457.296,
            367.215,
            248.375,
            -0.28340811,
            0.07395907,
            0.00019359,
            1.76187114e-05,
            0.,
        )),
        image_shape: (752, 480),
    }
}

/// cam0 extrinsics: rotation body to camera and camera origin in the body frame.
fn euroc_extrinsics() -> (Matrix3d, Vector3d) {
    let r_bc = Matrix3d::new(
        0.0148655429818,
        -0.999880929698,
        0.00414029679422,
        0.999557249008,
        0.0149672133247,
        0.025715529948,
        -0.0257744366974,
        0.00375618835797,
        0.999660727178,
    );
    let p_bc = Vector3d::new(-0.0216401454975, -0.064676986768, 0.00981073058949);
    (r_bc.transpose(), p_bc)
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let config = match &args.config_file {
        Some(path) => Config::from_json_file(Path::new(path))?,
        None => args.config.clone(),
    };

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stdout_writer())
                .with_filter(LevelFilter::INFO),
        )
        .with(indicatif_layer)
        .init();

    let mut filter = Msckf::new(&config, euroc_camera().model)?;

    // load data
    let mut trajectory = None;
    let mut source: Box<dyn SensorSource> = match (&args.input_folder, args.simulate_seconds) {
        (Some(folder), None) => {
            let (r_cb, p_bc) = euroc_extrinsics();
            filter.set_imu_camera_rotation(r_cb);
            filter.set_calibration(p_bc, euroc_camera().model);
            Box::new(Dataset::new(Path::new(folder))?)
        }
        (_, seconds) => {
            let options = SimulationOptions {
                duration: seconds.unwrap_or(20.),
                gravity: config.gravity,
                noise: Some(config.noise()),
                seed: config.seed,
                ..SimulationOptions::default()
            };
            let sim = Simulation::new(
                options,
                euroc_camera(),
                forward_camera_rotation(),
                Vector3d::zeros(),
            )?;
            filter.set_imu_camera_rotation(sim.imu_camera_rotation());
            filter.set_calibration(sim.camera_offset(), euroc_camera().model);
            let truth = sim.ground_truth(0.);
            filter.set_nominal_state(
                truth.orientation,
                truth.position,
                truth.velocity,
                Vector3d::zeros(),
                Vector3d::zeros(),
            );
            trajectory = Some(sim.trajectory());
            Box::new(sim)
        }
    };

    let mut vio = VIO::new(filter, euroc_camera());
    if trajectory.is_none() {
        vio = vio.with_gravity_alignment();
    }

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(source.length());
    let header_span_enter = header_span.enter();

    let mut last_time = 0.;
    while let Some(data) = source.next().context("Failed to read sensor data")? {
        last_time = data.time;
        vio.process_data(&data)?;
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    let filter = vio.filter();
    info!("{:?}", vio.stats());
    info!("{} landmarks mapped", vio.landmarks().len());
    info!("final state at {:.3}s\n{}", last_time, filter.dump_nominal_state(false));
    if let Some(trajectory) = trajectory {
        let truth = trajectory.at(last_time);
        info!(
            position_error = (filter.position() - truth.position).norm(),
            velocity_error = (filter.velocity() - truth.velocity).norm(),
            attitude_error_deg = filter.orientation().angle_to(&truth.orientation).to_degrees(),
            "error against ground truth"
        );
    }

    Ok(())
}
