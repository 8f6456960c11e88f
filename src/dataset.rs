use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use log::{debug, warn};
use serde::Deserialize;

use crate::my_types::*;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct PixelFeature {
    pub id: FeatureId,
    pub pixel: [f64; 2],
}

impl PixelFeature {
    pub fn pixel(&self) -> Vector2d {
        Vector2d::new(self.pixel[0], self.pixel[1])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputSensor {
    Gyroscope(Vector3d),
    Accelerometer(Vector3d),
    /// Tracked features of one image, in distorted pixel coordinates
    Features(Vec<PixelFeature>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SensorData {
    pub time: f64,
    pub sensor: InputSensor,
}

/// A time-ordered stream of sensor samples.
pub trait SensorSource {
    /// `None` at the end of the stream.
    fn next(&mut self) -> Result<Option<SensorData>>;

    /// Number of images, used for progress reporting.
    fn length(&self) -> u64;
}

/// Reader for `data.jsonl` recordings.
pub struct Dataset {
    reader: BufReader<File>,
    line: String,
    length: u64,
}

impl Dataset {
    pub fn new(path: &Path) -> Result<Dataset> {
        let file_path = path.join("data.jsonl");
        let length = BufReader::new(
            File::open(&file_path).context(format!("Cannot open {}", file_path.display()))?,
        )
        .lines()
        .map_while(|line| line.ok())
        .filter(|line| line.contains("\"features\""))
        .count() as u64;
        let file = File::open(&file_path)?;
        Ok(Dataset {
            reader: BufReader::new(file),
            line: String::new(),
            length,
        })
    }
}

impl SensorSource for Dataset {
    fn next(&mut self) -> Result<Option<SensorData>> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return Ok(None),
                Err(err) => bail!("Failed to read line {}", err),
                _ => {}
            }
            if self.line.trim().is_empty() {
                continue;
            }
            if let Some(data) = parse_line(&self.line)? {
                return Ok(Some(data));
            }
        }
    }

    fn length(&self) -> u64 {
        self.length
    }
}

/// `Ok(None)` for lines that carry nothing the filter consumes.
pub fn parse_line(line: &str) -> Result<Option<SensorData>> {
    let value: serde_json::Value = serde_json::from_str(line)
        .context(format!("JSON deserialization failed for line: {}", line))?;
    let value = value
        .as_object()
        .ok_or(anyhow!("JSON line is not a map"))?;

    if value.contains_key("groundTruth") {
        return Ok(None);
    }
    let time = value
        .get("time")
        .and_then(|t| t.as_f64())
        .ok_or(anyhow!("Time is not a number"))?;

    if let Some(sensor) = value.get("sensor") {
        let v: Vec<f64> = sensor["values"]
            .as_array()
            .ok_or(anyhow!("Sensor values not an array"))?
            .iter()
            .map(|x| x.as_f64().ok_or(anyhow!("Sensor value is not a number")))
            .collect::<Result<_>>()?;
        if v.len() < 3 {
            bail!("Sensor values array must contain at least 3 elements");
        }
        let v = Vector3d::new(v[0], v[1], v[2]);

        let sensor_type = sensor["type"]
            .as_str()
            .ok_or(anyhow!("Sensor type missing"))?;
        let sensor = match sensor_type {
            "gyroscope" => InputSensor::Gyroscope(v),
            "accelerometer" => InputSensor::Accelerometer(v),
            _ => {
                warn!("Unknown sensor type: {}", sensor_type);
                return Ok(None);
            }
        };
        Ok(Some(SensorData { time, sensor }))
    } else if let Some(features) = value.get("features") {
        let features: Vec<PixelFeature> = serde_json::from_value(features.clone())
            .context("Malformed feature list")?;
        debug!("{} features at {}", features.len(), time);
        Ok(Some(SensorData {
            time,
            sensor: InputSensor::Features(features),
        }))
    } else {
        warn!("Unrecognised data format {}", line.trim_end());
        Ok(None)
    }
}
