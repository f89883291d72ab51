//! χ² gating and best-match selection among the clusters of one plane.
//!
//! # Gating criterion
//! χ²(m, x̂) = νᵀ S⁻¹ ν  where ν = m − h(x̂),  S = H·P·Hᵀ + R
//!
//! Accept the candidate with the smallest χ² if it is below the gate.
//! Measurements are 2-dimensional (coordinate + slope), so the default gate is
//! χ²(0.99, 2) ≈ 9.21.

use crate::{
    error::Result,
    geometry::{Cluster, Orientation},
    kf::spd_inverse,
    observation::{measurement_from_cluster, Measurement, Prediction},
    types::{ClusterId, MeasCov, MeasVec},
};

/// Pre-computed χ² gate thresholds indexed by dimension [1..=2].
/// Value at index `d` is χ²(0.99, d).
pub const CHI2_99: [f64; 3] = [0.0, 6.63, 9.21];

/// Result of a gate check for one (prediction, measurement) pair.
#[derive(Clone, Copy, Debug)]
pub struct GateResult {
    pub chi2: f64,
    /// True if χ² < gate threshold
    pub passes: bool,
    /// Innovation vector ν
    pub innovation: MeasVec,
    /// Innovation covariance S
    pub innovation_cov: MeasCov,
}

/// The accepted candidate on a plane.
#[derive(Clone, Copy, Debug)]
pub struct BestMatch {
    /// Index into the candidate slice
    pub index: usize,
    pub cluster_id: ClusterId,
    pub measurement: Measurement,
    pub gate: GateResult,
}

/// χ² of `measurement` against `prediction`.
pub fn eval_chi2(
    measurement: &Measurement,
    prediction: &Prediction,
    gate_threshold: f64,
) -> Result<GateResult> {
    let innovation = measurement.value - prediction.value;
    let s = prediction.cov + measurement.noise;
    let s_inv = spd_inverse(&s, "singular innovation covariance during gating")?;
    let chi2 = innovation.dot(&(s_inv * innovation));
    Ok(GateResult {
        chi2,
        passes: chi2 < gate_threshold,
        innovation,
        innovation_cov: s,
    })
}

/// Pick the candidate with the smallest χ² below `gate_threshold`.
/// Ties keep the earlier candidate. `Ok(None)` means the plane is missed.
pub fn find_best_match(
    candidates: &[Cluster],
    orientation: Orientation,
    prediction: &Prediction,
    resolution_floor: f64,
    gate_threshold: f64,
) -> Result<Option<BestMatch>> {
    let mut best: Option<BestMatch> = None;
    for (index, cluster) in candidates.iter().enumerate() {
        let measurement = measurement_from_cluster(cluster, orientation, resolution_floor);
        let gate = eval_chi2(&measurement, prediction, gate_threshold)?;
        if !gate.passes {
            continue;
        }
        if best.map_or(true, |b| gate.chi2 < b.gate.chi2) {
            best = Some(BestMatch {
                index,
                cluster_id: cluster.id,
                measurement,
                gate,
            });
        }
    }
    Ok(best)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
