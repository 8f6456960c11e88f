use crate::camera::{CameraModel, CameraPose};
use crate::chi_square;
use crate::error::TrackRejection;
use crate::feature::FeatureTrack;
use crate::math::skew;
use crate::my_types::*;
use crate::state::*;
use crate::triangulation::{CameraView, Triangulator};
use crate::window::SlidingWindow;

/// Everything a track is measured against. Borrowed from the filter for
/// the duration of one image cycle.
pub struct MeasurementContext<'a> {
    pub window: &'a SlidingWindow,
    pub camera: &'a dyn CameraModel,
    pub triangulator: &'a dyn Triangulator,
    /// Takes a vector from the body frame to the camera frame
    pub r_cb: &'a Matrix3d,
    pub camera_offset: &'a Vector3d,
    pub covariance: &'a Matrixd,
    /// Pixel measurement variance
    pub variance: f64,
}

/// Residual and Jacobian of one track with the feature position projected out.
#[derive(Debug, Clone)]
pub struct TrackMeasurement {
    pub feature_id: FeatureId,
    pub landmark: Vector3d,
    pub residual: Vectord,
    /// `dof x error_dim`, non-zero only in the columns of observing clones
    pub jacobian: Matrixd,
    pub statistic: f64,
    pub dof: usize,
}

/// Stacked reprojection residual before null-space projection.
#[derive(Debug, Clone)]
pub struct Linearization {
    pub residual: Vectord,
    /// With respect to the error state
    pub h_x: Matrixd,
    /// With respect to the feature position
    pub h_f: Matrixd,
}

impl<'a> MeasurementContext<'a> {
    pub fn measure(&self, track: &FeatureTrack) -> Result<TrackMeasurement, TrackRejection> {
        let views = self.views(track);
        if views.len() < 2 {
            return Err(TrackRejection::TooShort(views.len()));
        }
        let landmark = self.triangulator.triangulate(&views)?;

        let linearization = self.linearize(track, &landmark)?;
        let (residual, jacobian) = project_out_feature(linearization);
        let dof = residual.len();
        let statistic = self.statistic(&residual, &jacobian);
        let threshold = chi_square::critical_value(dof);
        if !chi_square::passes(statistic, dof) {
            return Err(TrackRejection::Outlier {
                statistic,
                threshold,
                dof,
            });
        }
        Ok(TrackMeasurement {
            feature_id: track.id,
            landmark,
            residual,
            jacobian,
            statistic,
            dof,
        })
    }

    /// Camera view of every observation whose clone is still in the window.
    fn views(&self, track: &FeatureTrack) -> Vec<CameraView> {
        track
            .observations
            .iter()
            .filter_map(|(&id, ray)| {
                let clone = self.window.get(id)?;
                let pose = CameraPose::from_body(
                    &clone.orientation.to_rotation_matrix().into_inner(),
                    &clone.position,
                    self.r_cb,
                    self.camera_offset,
                );
                Some(CameraView { pose, ray: *ray })
            })
            .collect()
    }

    /// Residual `observed - predicted` in pixels and its Jacobians, two rows
    /// per observation.
    pub fn linearize(
        &self,
        track: &FeatureTrack,
        landmark: &Vector3d,
    ) -> Result<Linearization, TrackRejection> {
        let n = self.covariance.nrows();
        let observations: Vec<_> = track
            .observations
            .iter()
            .filter_map(|(&id, ray)| {
                Some((id, self.window.position_of(id)?, self.window.get(id)?, ray))
            })
            .collect();
        let rows = 2 * observations.len();
        let mut residual = Vectord::zeros(rows);
        let mut h_x = Matrixd::zeros(rows, n);
        let mut h_f = Matrixd::zeros(rows, 3);

        for (j, (id, position, clone, ray)) in observations.into_iter().enumerate() {
            let r_bg = clone.orientation.to_rotation_matrix().into_inner().transpose();
            let p_b = r_bg * (landmark - clone.position);
            let p_c = self.r_cb * (p_b - self.camera_offset);

            let (predicted, derivative) = self.camera.project_with_derivative(p_c, true);
            let (predicted, derivative) = match (predicted, derivative) {
                (Some(p), Some(d)) => (p, d),
                _ => return Err(TrackRejection::BehindCamera(id)),
            };
            let observed = self
                .camera
                .project(*ray)
                .ok_or(TrackRejection::BehindCamera(id))?;
            residual
                .fixed_rows_mut::<2>(2 * j)
                .copy_from(&(observed - predicted));

            let j_cam = derivative * self.r_cb;
            let offset = clone_offset(position);
            h_x.fixed_view_mut::<2, 3>(2 * j, offset + CLONE_THETA)
                .copy_from(&(j_cam * skew(p_b)));
            h_x.fixed_view_mut::<2, 3>(2 * j, offset + CLONE_POS)
                .copy_from(&(-j_cam * r_bg));
            h_f.fixed_view_mut::<2, 3>(2 * j, 0)
                .copy_from(&(j_cam * r_bg));
        }
        Ok(Linearization { residual, h_x, h_f })
    }

    /// `rᵀ (H P Hᵀ + σ² I)⁻¹ r`
    fn statistic(&self, residual: &Vectord, jacobian: &Matrixd) -> f64 {
        let m = residual.len();
        let s = jacobian * self.covariance * jacobian.transpose()
            + Matrixd::identity(m, m) * self.variance;
        match s.cholesky() {
            Some(cholesky) => residual.dot(&cholesky.solve(residual)),
            None => f64::INFINITY,
        }
    }
}

/// Multiply the stacked system by the left null space of `H_f`, leaving a
/// residual that depends only on the pose errors.
///
/// `H_f = Q [R; 0]`, so the rows of `Qᵀ r`, `Qᵀ H_x` below the first three
/// are free of the feature error.
pub fn project_out_feature(linearization: Linearization) -> (Vectord, Matrixd) {
    let Linearization {
        mut residual,
        mut h_x,
        h_f,
    } = linearization;
    let rows = residual.len();
    let qr = h_f.qr();
    qr.q_tr_mul(&mut residual);
    qr.q_tr_mul(&mut h_x);
    let kept = rows.saturating_sub(3);
    (
        residual.rows(3.min(rows), kept).into_owned(),
        h_x.rows(3.min(rows), kept).into_owned(),
    )
}
