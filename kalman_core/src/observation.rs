//! Observation models: H matrix, R matrix and h(x) per plane orientation.
//!
//! # Measurement vectors
//! - **Vertical**:   m = [x, dx/dz],  h(s) = [x, tanλ / cos φ]
//! - **Horizontal**: m = [y, dy/dz],  h(s) = [y, tan φ]
//!
//! H is the Jacobian of h at the predicted state, so it has to be rebuilt for
//! every prediction and whenever the orientation changes.

use crate::{
    error::{FitError, Result},
    geometry::{Cluster, Orientation},
    types::{MeasCov, MeasVec, ProjectionMatrix, State, StateVector},
};
use serde::{Deserialize, Serialize};

/// An observed cluster in measurement space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub value: MeasVec,
    /// Detector resolution R
    pub noise: MeasCov,
}

/// A predicted state projected into measurement space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Prediction {
    /// h(x̂)
    pub value: MeasVec,
    /// H evaluated at x̂
    pub projection: ProjectionMatrix,
    /// H·P·Hᵀ
    pub cov: MeasCov,
}

fn checked_cos_phi(sv: &StateVector) -> Result<f64> {
    let c = sv.phi().cos();
    if c.abs() < 1e-9 {
        return Err(FitError::NumericalFailure("track parallel to measurement plane"));
    }
    Ok(c)
}

/// h(s): the measurement a perfect cluster would report.
pub fn measurement_function(orientation: Orientation, sv: &StateVector) -> Result<MeasVec> {
    let c = checked_cos_phi(sv)?;
    Ok(match orientation {
        Orientation::Vertical => MeasVec::new(sv.x(), sv.tan_lambda() / c),
        Orientation::Horizontal => MeasVec::new(sv.y(), sv.phi().tan()),
    })
}

/// H = ∂h/∂s at `sv`.
pub fn projection_matrix(orientation: Orientation, sv: &StateVector) -> Result<ProjectionMatrix> {
    let c = checked_cos_phi(sv)?;
    let mut h = ProjectionMatrix::zeros();
    match orientation {
        Orientation::Vertical => {
            h[(0, StateVector::X)] = 1.0;
            h[(1, StateVector::TAN_LAMBDA)] = 1.0 / c;
            h[(1, StateVector::PHI)] = sv.tan_lambda() * sv.phi().sin() / (c * c);
        }
        Orientation::Horizontal => {
            h[(0, StateVector::Y)] = 1.0;
            h[(1, StateVector::PHI)] = 1.0 / (c * c);
        }
    }
    Ok(h)
}

/// Project a predicted state into the measurement space of `orientation`.
pub fn predict_measurement(orientation: Orientation, state: &State) -> Result<Prediction> {
    let value = measurement_function(orientation, &state.vector)?;
    let projection = projection_matrix(orientation, &state.vector)?;
    let cov = projection * state.cov * projection.transpose();
    Ok(Prediction {
        value,
        projection,
        cov,
    })
}

/// Select the view of `cluster` matching `orientation`. Resolutions below
/// `resolution_floor` are raised to it so that R never vanishes.
pub fn measurement_from_cluster(
    cluster: &Cluster,
    orientation: Orientation,
    resolution_floor: f64,
) -> Measurement {
    let (value, slope, err, err_slope) = match orientation {
        Orientation::Vertical => (cluster.x, cluster.slope_x, cluster.err_x, cluster.err_slope_x),
        Orientation::Horizontal => (cluster.y, cluster.slope_y, cluster.err_y, cluster.err_slope_y),
    };
    let sigma = err.abs().max(resolution_floor);
    let sigma_slope = err_slope.abs().max(resolution_floor);
    Measurement {
        value: MeasVec::new(value, slope),
        noise: MeasCov::new(sigma * sigma, 0.0, 0.0, sigma_slope * sigma_slope),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
