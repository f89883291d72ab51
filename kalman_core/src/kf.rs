//! Kalman filter: predict and update steps on the helix state.
//!
//! # Design choices
//! - Prediction is the analytic helix propagation of [`crate::propagation`];
//!   the covariance follows P' = J·P·Jᵀ + Q with Q from the material policy.
//! - The update is an extended-KF update: h(x̂) from the observation model and
//!   its Jacobian H, both rebuilt per prediction.
//! - All inversions go through [`spd_inverse`], which refuses
//!   ill-conditioned matrices instead of letting NaN leak into the state.
//!
//! ## Update equations
//! S = H·P·Hᵀ + R,  K = P·Hᵀ·S⁻¹,  x' = x + K·(m − h(x)),
//! P' = (I − K·H)·P·(I − K·H)ᵀ + K·R·Kᵀ   (Joseph form of (I − K·H)·P)

use crate::{
    error::{FitError, Result},
    observation::{Measurement, Prediction},
    propagation::{propagate_cov, HelixPropagator},
    types::{GainMatrix, MeasCov, MeasVec, PropagatorMatrix, State, StateCov, StateVector},
};
use nalgebra::SMatrix;

/// Smallest accepted ratio between the smallest and largest Cholesky pivot.
pub const MIN_PIVOT_RATIO: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Linear algebra guards
// ---------------------------------------------------------------------------

/// Inverse of a symmetric positive-definite matrix, with a conditioning check
/// on the Cholesky pivots.
pub fn spd_inverse<const N: usize>(
    m: &SMatrix<f64, N, N>,
    context: &'static str,
) -> Result<SMatrix<f64, N, N>> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NumericalFailure(context));
    }
    let sym = (m + m.transpose()) * 0.5;
    let chol = sym.cholesky().ok_or(FitError::NumericalFailure(context))?;
    let pivots = chol.l_dirty().diagonal();
    let max = pivots.max();
    let min = pivots.min();
    if !(min > 0.0 && min / max > MIN_PIVOT_RATIO) {
        return Err(FitError::NumericalFailure(context));
    }
    let inv = chol.inverse();
    if inv.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NumericalFailure(context));
    }
    Ok(inv)
}

/// Symmetrise a covariance and check its diagonal.
pub fn checked_covariance(cov: StateCov, context: &'static str) -> Result<StateCov> {
    let sym = (cov + cov.transpose()) * 0.5;
    if sym.iter().any(|v| !v.is_finite()) || sym.diagonal().iter().any(|&d| d < 0.0) {
        return Err(FitError::NumericalFailure(context));
    }
    Ok(sym)
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Result of a KF predict step.
#[derive(Clone, Copy, Debug)]
pub struct PredictResult {
    pub state: State,
    /// Propagator J that produced `state`; the smoother needs it later.
    pub propagator: PropagatorMatrix,
}

/// Result of a KF update step.
#[derive(Clone, Copy, Debug)]
pub struct KfUpdateResult {
    pub state: State,
    /// Innovation ν = m − h(x̂)
    pub innovation: MeasVec,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: MeasCov,
    pub kalman_gain: GainMatrix,
    /// νᵀ·S⁻¹·ν
    pub chi2: f64,
}

/// Trait for a Kalman filter model (predict + update).
pub trait KalmanFilter {
    /// Predict `state` a longitudinal step `dz` ahead, losing `de`, adding
    /// process noise `noise`.
    fn predict(
        &self,
        state: &State,
        dz: f64,
        de: f64,
        mass: f64,
        noise: &StateCov,
    ) -> Result<PredictResult>;

    /// Update the predicted state with `measurement`.
    fn update(
        &self,
        predicted: &State,
        measurement: &Measurement,
        prediction: &Prediction,
    ) -> Result<KfUpdateResult>;
}

// ---------------------------------------------------------------------------
// Helix model
// ---------------------------------------------------------------------------

/// Extended Kalman filter on the 5-parameter helix.
#[derive(Clone, Copy, Debug)]
pub struct HelixKalmanFilter {
    pub propagator: HelixPropagator,
}

impl HelixKalmanFilter {
    pub fn new(field_tesla: f64) -> Self {
        Self {
            propagator: HelixPropagator::new(field_tesla),
        }
    }

    /// K = P·Hᵀ·(H·P·Hᵀ + R)⁻¹
    pub fn kalman_gain(
        cov: &StateCov,
        prediction: &Prediction,
        measurement_noise: &MeasCov,
    ) -> Result<GainMatrix> {
        let s = prediction.cov + measurement_noise;
        let s_inv = spd_inverse(&s, "singular innovation covariance")?;
        Ok(cov * prediction.projection.transpose() * s_inv)
    }
}

impl KalmanFilter for HelixKalmanFilter {
    fn predict(
        &self,
        state: &State,
        dz: f64,
        de: f64,
        mass: f64,
        noise: &StateCov,
    ) -> Result<PredictResult> {
        let prop = self.propagator.propagate(&state.vector, dz, de, mass)?;
        let cov = propagate_cov(&state.cov, &prop.jacobian, noise);
        let cov = checked_covariance(cov, "predicted covariance lost positivity")?;
        Ok(PredictResult {
            state: State::new(prop.vector, cov),
            propagator: prop.jacobian,
        })
    }

    fn update(
        &self,
        predicted: &State,
        measurement: &Measurement,
        prediction: &Prediction,
    ) -> Result<KfUpdateResult> {
        let p = &predicted.cov;
        let h = &prediction.projection;
        let r = &measurement.noise;

        let innovation = measurement.value - prediction.value;
        let s = prediction.cov + r;
        let s_inv = spd_inverse(&s, "singular innovation covariance")?;
        let k = p * h.transpose() * s_inv;

        let new_vec = StateVector::from_vec(predicted.vector.as_vec() + k * innovation);
        if !new_vec.is_finite() {
            return Err(FitError::NumericalFailure("non-finite filtered state"));
        }

        let i_kh = StateCov::identity() - k * h;
        let new_cov = i_kh * p * i_kh.transpose() + k * r * k.transpose();
        let new_cov = checked_covariance(new_cov, "filtered covariance lost positivity")?;

        let chi2 = innovation.dot(&(s_inv * innovation));

        Ok(KfUpdateResult {
            state: State::new(new_vec, new_cov),
            innovation,
            innovation_cov: s,
            kalman_gain: k,
            chi2,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Orientation;
    use crate::observation::predict_measurement;
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix2;

    fn predicted_state() -> State {
        State::new(
            StateVector::new(0.01, -0.02, 0.05, 0.3, 0.1),
            StateCov::from_diagonal(&nalgebra::Vector5::new(1e-4, 1e-4, 1e-4, 1e-2, 1e-2)),
        )
    }

    fn measurement(value: MeasVec) -> Measurement {
        Measurement {
            value,
            noise: Matrix2::new(1e-8, 0.0, 0.0, 1e-6),
        }
    }

    #[test]
    fn predict_propagates_state_and_covariance() {
        let kf = HelixKalmanFilter::new(0.6);
        let state = predicted_state();
        let out = kf.predict(&state, 0.2, 0.0, 0.105, &StateCov::zeros()).unwrap();
        let expected = kf
            .propagator
            .propagate_state(&state.vector, 0.2, 0.0, 0.105)
            .unwrap();
        assert_eq!(out.state.vector, expected);
        // y picks up the φ uncertainty over the lever arm
        assert!(out.state.cov[(1, 1)] > state.cov[(1, 1)]);
        assert_abs_diff_eq!(out.state.cov, out.state.cov.transpose(), epsilon = 1e-18);
    }

    #[test]
    fn update_reduces_uncertainty() {
        let kf = HelixKalmanFilter::new(0.6);
        let state = predicted_state();
        for orientation in [Orientation::Vertical, Orientation::Horizontal] {
            let pred = predict_measurement(orientation, &state).unwrap();
            let m = measurement(pred.value + MeasVec::new(5e-3, 1e-2));
            let res = kf.update(&state, &m, &pred).unwrap();
            assert!(
                res.state.cov_trace() <= state.cov_trace(),
                "Update should reduce uncertainty"
            );
            assert!(res.chi2 > 0.0);
        }
    }

    #[test]
    fn measurement_on_prediction_leaves_state_unchanged() {
        let kf = HelixKalmanFilter::new(0.6);
        let state = predicted_state();
        let pred = predict_measurement(Orientation::Horizontal, &state).unwrap();
        let res = kf.update(&state, &measurement(pred.value), &pred).unwrap();
        assert_abs_diff_eq!(res.chi2, 0.0, epsilon = 1e-20);
        for i in 0..5 {
            assert_abs_diff_eq!(res.state.vector.as_vec()[i], state.vector.as_vec()[i]);
        }
    }

    #[test]
    fn gain_matches_update() {
        let kf = HelixKalmanFilter::new(0.6);
        let state = predicted_state();
        let pred = predict_measurement(Orientation::Vertical, &state).unwrap();
        let m = measurement(pred.value);
        let k = HelixKalmanFilter::kalman_gain(&state.cov, &pred, &m.noise).unwrap();
        let res = kf.update(&state, &m, &pred).unwrap();
        assert_abs_diff_eq!(k, res.kalman_gain, epsilon = 1e-12);
    }

    #[test]
    fn singular_innovation_is_rejected() {
        let kf = HelixKalmanFilter::new(0.6);
        let state = State::new(StateVector::new(0.0, 0.0, 0.05, 0.0, 0.0), StateCov::zeros());
        let pred = predict_measurement(Orientation::Vertical, &state).unwrap();
        let m = Measurement {
            value: pred.value,
            noise: MeasCov::zeros(),
        };
        assert!(matches!(
            kf.update(&state, &m, &pred),
            Err(FitError::NumericalFailure(_))
        ));
    }

    #[test]
    fn spd_inverse_rejects_indefinite() {
        let m = Matrix2::new(1.0, 2.0, 2.0, 1.0);
        assert!(spd_inverse(&m, "test").is_err());
        let ok = spd_inverse(&Matrix2::new(4.0, 0.0, 0.0, 0.25), "test").unwrap();
        assert_abs_diff_eq!(ok, Matrix2::new(0.25, 0.0, 0.0, 4.0), epsilon = 1e-12);
    }
}
