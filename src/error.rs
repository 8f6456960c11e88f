use thiserror::Error;

use crate::triangulation::TriangulationError;
use crate::window::CloneId;

/// Errors surfaced by the filter to its caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// The call was skipped and the filter state is unchanged.
    #[error("malformed input: {0}")]
    MalformedInput(#[from] MalformedInput),
    /// The covariance could not be repaired. The filter instance is no longer usable.
    #[error("numerical degradation: {0}")]
    NumericalDegradation(String),
    #[error("filter diverged earlier and must be re-initialized")]
    Diverged,
}

impl FilterError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FilterError::MalformedInput(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedInput {
    #[error("non-finite {0}")]
    NonFinite(&'static str),
    #[error("invalid {0}")]
    InvalidParameter(&'static str),
    #[error("timestamp {current} precedes the latest processed time {previous}")]
    OutOfOrder { previous: f64, current: f64 },
    #[error("IMU gap of {dt} s exceeds the maximum of {max} s")]
    ImuGap { dt: f64, max: f64 },
}

/// Reasons a ready track contributes nothing to an update.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TrackRejection {
    #[error("track has only {0} observation(s)")]
    TooShort(usize),
    #[error("degenerate geometry: {0}")]
    Degenerate(#[from] TriangulationError),
    #[error("feature lies behind clone {0:?}")]
    BehindCamera(CloneId),
    #[error("chi-square gate rejected statistic {statistic:.3} > {threshold:.3} ({dof} dof)")]
    Outlier {
        statistic: f64,
        threshold: f64,
        dof: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_malformed_input_is_recoverable() {
        let e: FilterError = MalformedInput::NonFinite("gyroscope").into();
        assert!(!e.is_fatal());
        assert!(FilterError::Diverged.is_fatal());
        assert!(FilterError::NumericalDegradation("negative variance".into()).is_fatal());
        assert_eq!(e.to_string(), "malformed input: non-finite gyroscope");
    }
}
