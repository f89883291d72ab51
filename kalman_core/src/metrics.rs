//! Fit quality metrics: curvature resolution, pulls, χ²/ndf, efficiency.

use crate::{
    error::{FitError, Result},
    geometry::ParticleInfo,
    manager::FittedTrack,
    propagation::HelixPropagator,
    seeding::state_from_truth,
    types::StateVector,
};
use serde::{Deserialize, Serialize};

/// Truth helix of `particle` carried to `z`, without energy loss.
pub fn truth_at(
    particle: &ParticleInfo,
    propagator: &HelixPropagator,
    z: f64,
) -> Result<StateVector> {
    let sv = state_from_truth(particle, propagator)?;
    propagator.propagate_state(&sv, z - particle.position.z, 0.0, particle.mass)
}

/// Accumulated statistics over many fits.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitMetrics {
    /// Fits attempted
    pub n_fits: u64,
    /// Fits that returned a track
    pub n_converged: u64,
    pub n_lost: u64,
    pub n_numerical: u64,
    pub n_seed_failures: u64,
    /// Sum of (ρ_fit − ρ_true)/ρ_true
    pub sum_rel_curvature: f64,
    pub sum_sq_rel_curvature: f64,
    /// Sum of squared ρ pulls (ρ_fit − ρ_true)/σ_ρ
    pub sum_sq_pull_rho: f64,
    /// Sum of squared transverse position errors at the first plane
    pub sum_sq_pos_err: f64,
    pub sum_chi2_ndf: f64,
    pub n_chi2_ndf: u64,
    pub matched_planes: u64,
    pub missed_planes: u64,
}

impl FitMetrics {
    /// Record a converged fit. `truth` is the true helix at the first step.
    pub fn accumulate(&mut self, fitted: &FittedTrack, truth: &StateVector) {
        self.n_fits += 1;
        self.n_converged += 1;
        self.matched_planes += fitted.diagnostics.matched as u64;
        self.missed_planes += fitted.diagnostics.missed as u64;
        if let Some(r) = fitted.diagnostics.chi2_per_ndf() {
            self.sum_chi2_ndf += r;
            self.n_chi2_ndf += 1;
        }
        let Some(first) = fitted.track.steps().first() else {
            return;
        };
        let est = first.best();
        let rho = est.vector.signed_inverse_radius();
        let rho_true = truth.signed_inverse_radius();
        let rel = (rho - rho_true) / rho_true;
        self.sum_rel_curvature += rel;
        self.sum_sq_rel_curvature += rel * rel;
        let sigma = est.sigmas()[StateVector::INV_RADIUS];
        if sigma > 0.0 {
            let pull = (rho - rho_true) / sigma;
            self.sum_sq_pull_rho += pull * pull;
        }
        let dx = est.vector.x() - truth.x();
        let dy = est.vector.y() - truth.y();
        self.sum_sq_pos_err += dx * dx + dy * dy;
    }

    /// Record a fit that returned an error.
    pub fn record_failure(&mut self, error: &FitError) {
        self.n_fits += 1;
        match error {
            FitError::TrackLost { .. } => self.n_lost += 1,
            FitError::NumericalFailure(_) => self.n_numerical += 1,
            FitError::SeedFailure(_) => self.n_seed_failures += 1,
            _ => {}
        }
    }

    pub fn merge(&mut self, other: &FitMetrics) {
        self.n_fits += other.n_fits;
        self.n_converged += other.n_converged;
        self.n_lost += other.n_lost;
        self.n_numerical += other.n_numerical;
        self.n_seed_failures += other.n_seed_failures;
        self.sum_rel_curvature += other.sum_rel_curvature;
        self.sum_sq_rel_curvature += other.sum_sq_rel_curvature;
        self.sum_sq_pull_rho += other.sum_sq_pull_rho;
        self.sum_sq_pos_err += other.sum_sq_pos_err;
        self.sum_chi2_ndf += other.sum_chi2_ndf;
        self.n_chi2_ndf += other.n_chi2_ndf;
        self.matched_planes += other.matched_planes;
        self.missed_planes += other.missed_planes;
    }

    /// Converged / attempted.
    pub fn efficiency(&self) -> f64 {
        if self.n_fits == 0 {
            return 0.0;
        }
        self.n_converged as f64 / self.n_fits as f64
    }

    /// Mean relative curvature error.
    pub fn curvature_bias(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        self.sum_rel_curvature / self.n_converged as f64
    }

    /// RMS relative curvature error.
    pub fn curvature_resolution(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        (self.sum_sq_rel_curvature / self.n_converged as f64).sqrt()
    }

    /// RMS of the ρ pull; ≈ 1 for a consistent covariance.
    pub fn rho_pull_rms(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        (self.sum_sq_pull_rho / self.n_converged as f64).sqrt()
    }

    /// Transverse position RMSE at the first plane (m).
    pub fn rmse_position(&self) -> f64 {
        if self.n_converged == 0 {
            return 0.0;
        }
        (self.sum_sq_pos_err / self.n_converged as f64).sqrt()
    }

    pub fn mean_chi2_ndf(&self) -> f64 {
        if self.n_chi2_ndf == 0 {
            return 0.0;
        }
        self.sum_chi2_ndf / self.n_chi2_ndf as f64
    }

    /// Fraction of visited planes with an accepted cluster.
    pub fn hit_efficiency(&self) -> f64 {
        let total = self.matched_planes + self.missed_planes;
        if total == 0 { 0.0 } else { self.matched_planes as f64 / total as f64 }
    }
}
