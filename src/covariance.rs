use crate::error::FilterError;
use crate::math::symmetrize;
use crate::my_types::*;
use crate::state::*;

/// Variances this far below zero are rounding noise and get clamped.
pub const DIAGONAL_TOLERANCE: f64 = 1e-9;

/// Error covariance of the body state followed by one 6x6 block per clone.
///
/// Block `i` belongs to the clone at position `i` of the sliding window, so
/// [`insert_clone_block`](Self::insert_clone_block) and
/// [`remove_clone_blocks`](Self::remove_clone_blocks) must mirror every push
/// and pop of the window. They are the only places the dimension changes.
#[derive(Clone, Debug)]
pub struct ErrorCovariance {
    matrix: Matrixd,
}

impl ErrorCovariance {
    pub fn identity(scale: f64) -> Self {
        Self {
            matrix: Matrixd::identity(ERR_BODY_SIZE, ERR_BODY_SIZE) * scale,
        }
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn clone_count(&self) -> usize {
        (self.dim() - ERR_BODY_SIZE) / CLONE_ERR_SIZE
    }

    pub fn matrix(&self) -> &Matrixd {
        &self.matrix
    }

    /// Reset to a scaled identity of the current dimension, clones included.
    pub fn set_identity(&mut self, scale: f64) {
        let n = self.dim();
        self.matrix = Matrixd::identity(n, n) * scale;
    }

    /// `P_II <- phi P_II phi^T + Q` and `P_IC <- phi P_IC`. Clone blocks
    /// stay frozen.
    pub fn propagate(&mut self, phi: &Matrixd, q: &Matrixd) {
        let n = self.dim();
        let b = ERR_BODY_SIZE;
        let p_ii = self.matrix.view((0, 0), (b, b)).into_owned();
        let p_ii = phi * p_ii * phi.transpose() + q;
        self.matrix.view_mut((0, 0), (b, b)).copy_from(&p_ii);

        if n > b {
            let p_ic = phi * self.matrix.view((0, b), (b, n - b));
            self.matrix.view_mut((0, b), (b, n - b)).copy_from(&p_ic);
            self.matrix
                .view_mut((b, 0), (n - b, b))
                .copy_from(&p_ic.transpose());
        }
        symmetrize(&mut self.matrix);
    }

    /// Grow by one clone copying the current attitude and position errors.
    ///
    /// With `J` selecting `[δθ, δp]` from the body, the grown matrix is
    /// `[[P, P Jᵀ], [J P, J P Jᵀ]]`: the clone is fully correlated with the
    /// body and carries no uncertainty of its own.
    pub fn insert_clone_block(&mut self) {
        let n = self.dim();
        let c = CLONE_ERR_SIZE;
        let mut grown = Matrixd::zeros(n + c, n + c);
        grown.view_mut((0, 0), (n, n)).copy_from(&self.matrix);
        let rows = self.matrix.rows(ERR_THETA, c).into_owned();
        grown.view_mut((n, 0), (c, n)).copy_from(&rows);
        grown.view_mut((0, n), (n, c)).copy_from(&rows.transpose());
        grown
            .view_mut((n, n), (c, c))
            .copy_from(&self.matrix.view((ERR_THETA, ERR_THETA), (c, c)));
        self.matrix = grown;
    }

    /// Drop `count` clone blocks starting at window position `position`.
    pub fn remove_clone_blocks(&mut self, position: usize, count: usize) {
        if count == 0 {
            return;
        }
        assert!(position + count <= self.clone_count());
        let start = clone_offset(position);
        let len = CLONE_ERR_SIZE * count;
        let matrix = std::mem::replace(&mut self.matrix, Matrixd::zeros(0, 0));
        self.matrix = matrix.remove_rows(start, len).remove_columns(start, len);
    }

    /// Joseph form update `(I - KH) P (I - KH)ᵀ + K R Kᵀ` with `R = variance * I`.
    pub fn joseph_update(&mut self, gain: &Matrixd, h: &Matrixd, variance: f64) {
        let n = self.dim();
        let i_kh = Matrixd::identity(n, n) - gain * h;
        self.matrix = &i_kh * &self.matrix * i_kh.transpose()
            + gain * gain.transpose() * variance;
        symmetrize(&mut self.matrix);
    }

    /// Clamp rounding-level negative variances, fail on anything worse.
    pub fn check(&mut self) -> Result<(), FilterError> {
        if self.matrix.iter().any(|x| !x.is_finite()) {
            return Err(FilterError::NumericalDegradation(
                "covariance has non-finite entries".into(),
            ));
        }
        for i in 0..self.dim() {
            let d = self.matrix[(i, i)];
            if d < -DIAGONAL_TOLERANCE {
                return Err(FilterError::NumericalDegradation(format!(
                    "variance {d:e} at index {i} is negative"
                )));
            }
            if d < 0. {
                self.matrix[(i, i)] = 0.;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::asymmetry;
    use approx::assert_relative_eq;

    fn random_spd(n: usize, seed: u64) -> Matrixd {
        use rand::{Rng, SeedableRng};
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(seed);
        let a = Matrixd::from_fn(n, n, |_, _| rng.gen_range(-1.0..1.0));
        &a * a.transpose() + Matrixd::identity(n, n) * 0.1
    }

    #[test]
    fn test_insert_and_remove_blocks() {
        let mut cov = ErrorCovariance {
            matrix: random_spd(15, 1),
        };
        let body = cov.matrix.clone();

        cov.insert_clone_block();
        assert_eq!(cov.dim(), 21);
        assert_eq!(cov.clone_count(), 1);
        assert_relative_eq!(
            cov.matrix.view((15, 15), (6, 6)).into_owned(),
            body.view((0, 0), (6, 6)).into_owned()
        );
        assert_relative_eq!(
            cov.matrix.view((15, 0), (6, 15)).into_owned(),
            body.rows(0, 6).into_owned()
        );
        assert_eq!(asymmetry(&cov.matrix), 0.);

        cov.insert_clone_block();
        cov.insert_clone_block();
        assert_eq!(cov.dim(), 33);
        let before = cov.matrix.clone();

        cov.remove_clone_blocks(0, 1);
        assert_eq!(cov.dim(), 27);
        // body block and the remaining clones are untouched
        assert_relative_eq!(
            cov.matrix.view((0, 0), (15, 15)).into_owned(),
            before.view((0, 0), (15, 15)).into_owned()
        );
        assert_relative_eq!(
            cov.matrix.view((15, 15), (12, 12)).into_owned(),
            before.view((21, 21), (12, 12)).into_owned()
        );
        assert_relative_eq!(
            cov.matrix.view((0, 15), (15, 12)).into_owned(),
            before.view((0, 21), (15, 12)).into_owned()
        );

        cov.remove_clone_blocks(0, 2);
        assert_eq!(cov.dim(), 15);
    }

    #[test]
    fn test_propagate_keeps_clone_blocks() {
        let mut cov = ErrorCovariance {
            matrix: random_spd(15, 2),
        };
        cov.insert_clone_block();
        let before = cov.matrix.clone();
        let phi = Matrixd::identity(15, 15) + random_spd(15, 3) * 0.01;
        let q = Matrixd::identity(15, 15) * 1e-4;
        cov.propagate(&phi, &q);

        assert_relative_eq!(
            cov.matrix.view((15, 15), (6, 6)).into_owned(),
            before.view((15, 15), (6, 6)).into_owned()
        );
        let expected_cross = &phi * before.view((0, 15), (15, 6));
        assert_relative_eq!(
            cov.matrix.view((0, 15), (15, 6)).into_owned(),
            expected_cross,
            epsilon = 1e-12
        );
        assert_eq!(asymmetry(&cov.matrix), 0.);
        assert!(cov.check().is_ok());
    }

    #[test]
    fn test_joseph_update_shrinks_variance() {
        let mut cov = ErrorCovariance::identity(1.);
        let mut h = Matrixd::zeros(1, 15);
        h[(0, ERR_POS)] = 1.;
        let s = 1. + 0.5;
        let gain = cov.matrix.columns(ERR_POS, 1).into_owned() / s;
        cov.joseph_update(&gain, &h, 0.5);
        assert_relative_eq!(cov.matrix[(ERR_POS, ERR_POS)], 1. - 1. / s, epsilon = 1e-12);
        assert_relative_eq!(cov.matrix[(ERR_VEL, ERR_VEL)], 1.);
    }

    #[test]
    fn test_check_clamps_or_fails() {
        let mut cov = ErrorCovariance::identity(1.);
        cov.matrix[(3, 3)] = -1e-12;
        assert!(cov.check().is_ok());
        assert_eq!(cov.matrix[(3, 3)], 0.);

        cov.matrix[(4, 4)] = -1e-3;
        assert!(matches!(
            cov.check(),
            Err(FilterError::NumericalDegradation(_))
        ));

        let mut cov = ErrorCovariance::identity(1.);
        cov.matrix[(0, 1)] = f64::NAN;
        assert!(cov.check().is_err());
    }

    #[test]
    fn test_set_identity_keeps_dimension() {
        let mut cov = ErrorCovariance::identity(1.);
        cov.insert_clone_block();
        cov.set_identity(2.);
        assert_eq!(cov.dim(), 21);
        assert_eq!(cov.matrix[(20, 20)], 2.);
        assert_eq!(cov.matrix[(0, 20)], 0.);
    }
}
