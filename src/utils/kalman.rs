// Predict/update steps follow the classic formulation with a Cholesky
// factorized innovation covariance, in the manner of
// https://github.com/nwojke/deep_sort/blob/master/deep_sort/kalman_filter.py
//
use crate::Errors;
use anyhow::Result;
use nalgebra::{SMatrix, SVector};
use std::f64::consts::PI;

/// Interacting multiple model filter (CV, CA and CT motion models)
pub mod imm;

/// Motion model system setup: transition, process noise and observation
pub mod models;

/// Gaussian estimate: mean and covariance
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanState<const X: usize> {
    pub mean: SVector<f64, X>,
    pub covariance: SMatrix<f64, X, X>,
}

impl<const X: usize> KalmanState<X> {
    pub fn new(mean: SVector<f64, X>, covariance: SMatrix<f64, X, X>) -> Self {
        Self { mean, covariance }
    }

    pub fn is_finite(&self) -> bool {
        self.mean.iter().all(|v| v.is_finite()) && self.covariance.iter().all(|v| v.is_finite())
    }
}

/// Result of a measurement update
///
#[derive(Debug, Clone, Copy)]
pub struct KalmanUpdate<const X: usize> {
    pub state: KalmanState<X>,
    /// Gaussian density of the innovation under its predicted covariance
    pub likelihood: f64,
    /// Squared Mahalanobis distance of the innovation
    pub distance: f64,
}

/// Prediction to an already propagated `mean`: `P = F P Fᵀ + Q`.
///
/// For a linear model `mean` is `F x`; for the extended filter it is the
/// nonlinear transition of `x` and `F` its Jacobian.
///
pub fn predict<const X: usize>(
    state: &KalmanState<X>,
    mean: SVector<f64, X>,
    motion_matrix: &SMatrix<f64, X, X>,
    motion_cov: &SMatrix<f64, X, X>,
) -> KalmanState<X> {
    let covariance = motion_matrix * state.covariance * motion_matrix.transpose() + motion_cov;
    KalmanState { mean, covariance }
}

/// Measurement update against `z` with observation matrix `H` and noise `R`.
///
/// Fails when the innovation covariance cannot be Cholesky-factorized or the
/// posterior is not finite; callers are expected to keep the prediction then.
///
pub fn update<const X: usize, const Z: usize>(
    predicted: &KalmanState<X>,
    update_matrix: &SMatrix<f64, Z, X>,
    measurement: &SVector<f64, Z>,
    measurement_cov: &SMatrix<f64, Z, Z>,
) -> Result<KalmanUpdate<X>> {
    let (mean, covariance) = (predicted.mean, predicted.covariance);
    let projected_mean = update_matrix * mean;
    let projected_cov = update_matrix * covariance * update_matrix.transpose() + measurement_cov;

    let choletsky = projected_cov
        .cholesky()
        .ok_or(Errors::SingularInnovationCovariance)?;

    // S is symmetric, so Kᵀ = S⁻¹ H P
    let kalman_gain = choletsky
        .solve(&(update_matrix * covariance))
        .transpose();

    let innovation = measurement - projected_mean;
    let whitened = choletsky.solve(&innovation);
    let distance = innovation.dot(&whitened);

    let det: f64 = choletsky.l().diagonal().iter().map(|d| d * d).product();
    let norm = ((2.0 * PI).powi(Z as i32) * det).sqrt();
    let likelihood = (-0.5 * distance).exp() / norm;

    let mean = mean + kalman_gain * innovation;
    let covariance = covariance - kalman_gain * projected_cov * kalman_gain.transpose();
    let covariance = (covariance + covariance.transpose()) * 0.5;

    let state = KalmanState { mean, covariance };
    if !state.is_finite() || !likelihood.is_finite() {
        return Err(Errors::NonFiniteEstimate.into());
    }

    Ok(KalmanUpdate {
        state,
        likelihood,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use crate::utils::kalman::{predict, update, KalmanState};
    use crate::Errors;
    use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

    fn cv_motion(dt: f64) -> Matrix4<f64> {
        let mut f = Matrix4::identity();
        f[(0, 2)] = dt;
        f[(1, 3)] = dt;
        f
    }

    fn position_update_matrix() -> Matrix2x4<f64> {
        let mut h = Matrix2x4::zeros();
        h[(0, 0)] = 1.0;
        h[(1, 1)] = 1.0;
        h
    }

    #[test]
    fn predict_moves_mean_and_grows_covariance() {
        let state = KalmanState::new(Vector4::new(0.0, 0.0, 1.0, 2.0), Matrix4::identity());
        let q = Matrix4::identity() * 0.1;
        let f = cv_motion(2.0);
        let p = predict(&state, f * state.mean, &f, &q);
        assert_eq!(p.mean, Vector4::new(2.0, 4.0, 1.0, 2.0));
        assert!(p.covariance[(0, 0)] > state.covariance[(0, 0)]);
    }

    #[test]
    fn update_pulls_towards_measurement() {
        let state = KalmanState::new(Vector4::new(0.0, 0.0, 0.0, 0.0), Matrix4::identity());
        let r = Matrix2::identity();
        let res = update(
            &state,
            &position_update_matrix(),
            &Vector2::new(2.0, 0.0),
            &r,
        )
        .unwrap();
        // equal prior and measurement variance: halfway
        assert!((res.state.mean[0] - 1.0).abs() < 1e-9);
        assert!((res.state.covariance[(0, 0)] - 0.5).abs() < 1e-9);
        assert!((res.distance - 2.0).abs() < 1e-9);
        let expected = (-1.0f64).exp() / (2.0 * std::f64::consts::PI * 2.0);
        assert!((res.likelihood - expected).abs() < 1e-12);
    }

    #[test]
    fn singular_innovation_is_reported() {
        let state = KalmanState::new(Vector4::zeros(), Matrix4::zeros());
        let err = update(
            &state,
            &position_update_matrix(),
            &Vector2::new(1.0, 1.0),
            &Matrix2::zeros(),
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::SingularInnovationCovariance)
        );
    }
}
