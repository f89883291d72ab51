//! Rauch–Tung–Striebel backward pass over a completed forward fit.
//!
//! For k = n−2 … 0, with J_{k+1} the propagator stored on step k+1:
//!
//!   A_k   = P_f,k · J_{k+1}ᵀ · P_p,k+1⁻¹
//!   x_s,k = x_f,k + A_k · (x_s,k+1 − x_p,k+1)
//!   P_s,k = P_f,k + A_k · (P_s,k+1 − P_p,k+1) · A_kᵀ
//!
//! and the last step's smoothed state is its filtered state.

use crate::{
    error::Result,
    kf::{checked_covariance, spd_inverse},
    track::Track,
    types::{PropagatorMatrix, State, StateCov, StateVector},
};

/// Smoother gain A = P_f · Jᵀ · P_p,next⁻¹.
pub fn smoother_gain(
    cov_filtered: &StateCov,
    cov_next_predicted: &StateCov,
    propagator: &PropagatorMatrix,
) -> Result<StateCov> {
    let inv = spd_inverse(cov_next_predicted, "singular predicted covariance in smoother")?;
    Ok(cov_filtered * propagator.transpose() * inv)
}

pub fn smooth_state(
    filtered: &StateVector,
    next_smoothed: &StateVector,
    next_predicted: &StateVector,
    gain: &StateCov,
) -> StateVector {
    StateVector::from_vec(
        filtered.as_vec() + gain * (next_smoothed.as_vec() - next_predicted.as_vec()),
    )
}

pub fn smooth_cov(
    cov_filtered: &StateCov,
    cov_next_smoothed: &StateCov,
    cov_next_predicted: &StateCov,
    gain: &StateCov,
) -> StateCov {
    cov_filtered + gain * (cov_next_smoothed - cov_next_predicted) * gain.transpose()
}

/// Fill the smoothed state of every step. Only reachable through
/// [`crate::manager::ForwardPass::smooth`], i.e. after the forward pass.
pub(crate) fn smooth_track(track: &mut Track) -> Result<()> {
    let steps = track.steps_mut();
    let Some(last) = steps.last_mut() else {
        return Ok(());
    };
    let mut next_smoothed = *last.filtered();
    last.set_smoothed(next_smoothed);

    for k in (0..steps.len() - 1).rev() {
        let next_predicted = *steps[k + 1].prediction();
        let propagator = steps[k + 1].propagator;
        let filtered = *steps[k].filtered();

        let gain = smoother_gain(&filtered.cov, &next_predicted.cov, &propagator)?;
        let vector = smooth_state(
            &filtered.vector,
            &next_smoothed.vector,
            &next_predicted.vector,
            &gain,
        );
        let cov = smooth_cov(&filtered.cov, &next_smoothed.cov, &next_predicted.cov, &gain);
        let cov = checked_covariance(cov, "smoothed covariance lost positivity")?;

        next_smoothed = State::new(vector, cov);
        steps[k].set_smoothed(next_smoothed);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Orientation;
    use crate::kf::{HelixKalmanFilter, KalmanFilter};
    use crate::observation::{predict_measurement, Measurement};
    use crate::track::TrackStep;
    use crate::types::{ClusterId, Direction, MeasCov, PlaneId};
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector5;

    /// Forward-filter a helix through `n` planes with slightly offset clusters.
    fn forward_track(n: u32) -> Track {
        let kf = HelixKalmanFilter::new(0.6);
        let mut state = State::new(
            StateVector::new(0.0, 0.0, 0.02, 0.2, 0.05),
            StateCov::from_diagonal(&Vector5::new(1e-4, 1e-4, 1e-4, 1e-2, 1e-2)),
        );
        let noise = StateCov::from_diagonal(&Vector5::new(0.0, 0.0, 1e-8, 1e-6, 1e-6));
        let mut track = Track::new(Direction::Forward);
        for i in 0..n {
            let orientation = if i % 2 == 0 {
                Orientation::Vertical
            } else {
                Orientation::Horizontal
            };
            let pred = kf.predict(&state, 0.1, 0.0, 0.105, &noise).unwrap();
            let projected = predict_measurement(orientation, &pred.state).unwrap();
            let wiggle = if i % 3 == 0 { 2e-4 } else { -1e-4 };
            let m = Measurement {
                value: projected.value + nalgebra::Vector2::new(wiggle, 0.5 * wiggle),
                noise: MeasCov::new(1e-8, 0.0, 0.0, 1e-6),
            };
            let upd = kf.update(&pred.state, &m, &projected).unwrap();
            track.push(TrackStep::matched(
                PlaneId(i),
                orientation,
                0.1 * f64::from(i + 1),
                (ClusterId(u64::from(i)), 0.0, 0.0),
                pred.state,
                upd.state,
                pred.propagator,
                upd.innovation,
                upd.chi2,
            ));
            state = upd.state;
        }
        track
    }

    #[test]
    fn last_step_smoothed_equals_filtered() {
        let mut track = forward_track(8);
        smooth_track(&mut track).unwrap();
        let last = track.last().unwrap();
        assert_eq!(last.smoothed().unwrap(), last.filtered());
        assert!(track.is_smoothed());
    }

    #[test]
    fn smoothing_never_increases_uncertainty() {
        let mut track = forward_track(8);
        smooth_track(&mut track).unwrap();
        for step in &track.steps()[..track.len() - 1] {
            let smoothed = step.smoothed().unwrap();
            assert!(
                smoothed.cov_trace() <= step.filtered().cov_trace() * (1.0 + 1e-9),
                "smoothed trace {} > filtered trace {}",
                smoothed.cov_trace(),
                step.filtered().cov_trace()
            );
        }
        // the first step gains the most from future planes
        let first = &track.steps()[0];
        assert!(first.smoothed().unwrap().cov_trace() < first.filtered().cov_trace());
    }

    #[test]
    fn gain_is_zero_when_filtered_covariance_vanishes() {
        let gain = smoother_gain(
            &StateCov::zeros(),
            &StateCov::identity(),
            &PropagatorMatrix::identity(),
        )
        .unwrap();
        assert_abs_diff_eq!(gain, StateCov::zeros());
    }

    #[test]
    fn singular_prediction_is_rejected() {
        assert!(smoother_gain(
            &StateCov::identity(),
            &StateCov::zeros(),
            &PropagatorMatrix::identity()
        )
        .is_err());
    }
}
