//! Material policies: energy loss per step and process noise Q.
//!
//! The engine does not fix a material description; the caller injects one.
//! Two are provided:
//! - [`Vacuum`]: no energy loss, no process noise.
//! - [`UniformMaterial`]: constant stopping power and Highland multiple
//!   scattering in a homogeneous medium.
//!
//! ## Multiple scattering (thin scatterer at the end of the step)
//! θ₀ = 13.6 MeV / (β·p) · √(L/X₀) · (1 + 0.038·ln(L/X₀)),
//! L = |dz|·√(1+tan²λ)/|cos φ|.
//! The deflection δλ in the dip plane and δφ' in the bending plane are
//! independent with variance θ₀², giving
//!   var(tanλ) = θ₀²·(1+tan²λ)²,   var(φ) = θ₀²·(1+tan²λ),
//! and ρ follows tanλ through ρ ∝ √(1+tan²λ) at fixed momentum.

use crate::{
    propagation::HelixPropagator,
    types::{StateCov, StateVector},
};
use serde::{Deserialize, Serialize};

/// Energy loss and process noise for one propagation step.
pub trait Material {
    /// Energy lost (GeV) over a step `dz` starting at `z`, at normal incidence.
    /// Negative when walking against the particle's motion.
    fn energy_loss(&self, z: f64, dz: f64) -> f64;

    /// Covariance injected by the material crossed during the step.
    fn process_noise(
        &self,
        state: &StateVector,
        dz: f64,
        mass: f64,
        propagator: &HelixPropagator,
    ) -> StateCov;
}

/// No material between planes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vacuum;

impl Material for Vacuum {
    fn energy_loss(&self, _z: f64, _dz: f64) -> f64 {
        0.0
    }

    fn process_noise(
        &self,
        _state: &StateVector,
        _dz: f64,
        _mass: f64,
        _propagator: &HelixPropagator,
    ) -> StateCov {
        StateCov::zeros()
    }
}

/// Homogeneous medium filling the tracker volume.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniformMaterial {
    /// Radiation length X₀ (m)
    pub radiation_length: f64,
    /// Mean energy loss per metre at normal incidence (GeV/m)
    pub stopping_power: f64,
}

impl Default for UniformMaterial {
    fn default() -> Self {
        // Low-density gas/foil mixture typical of straw-tube trackers
        Self {
            radiation_length: 10.0,
            stopping_power: 0.002,
        }
    }
}

impl UniformMaterial {
    /// Highland scattering angle θ₀ for a path `length` (m).
    pub fn highland_angle(&self, beta: f64, momentum: f64, length: f64) -> f64 {
        if length <= 0.0 || momentum <= 0.0 {
            return 0.0;
        }
        let x = length / self.radiation_length;
        let log_term = (1.0 + 0.038 * x.ln()).max(0.0);
        0.0136 / (beta * momentum) * x.sqrt() * log_term
    }
}

impl Material for UniformMaterial {
    fn energy_loss(&self, _z: f64, dz: f64) -> f64 {
        self.stopping_power * dz
    }

    fn process_noise(
        &self,
        state: &StateVector,
        dz: f64,
        mass: f64,
        propagator: &HelixPropagator,
    ) -> StateCov {
        let t = state.tan_lambda();
        let c2 = 1.0 + t * t;
        let cos_phi = state.phi().cos().abs().max(1e-6);
        let length = dz.abs() * c2.sqrt() / cos_phi;
        let theta0 = self.highland_angle(
            propagator.beta(state, mass),
            propagator.momentum(state),
            length,
        );
        let var = theta0 * theta0;

        // Dip-plane deflection moves tanλ and, at fixed p, ρ
        let g_rho = state.signed_inverse_radius() * t;
        let g_tan = c2;
        let mut q = StateCov::zeros();
        q[(2, 2)] = var * g_rho * g_rho;
        q[(2, 3)] = var * g_rho * g_tan;
        q[(3, 2)] = q[(2, 3)];
        q[(3, 3)] = var * g_tan * g_tan;
        q[(4, 4)] = var * c2;
        q
    }
}

/// Serializable choice of material policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MaterialModel {
    #[default]
    Vacuum,
    Uniform(UniformMaterial),
}

impl Material for MaterialModel {
    fn energy_loss(&self, z: f64, dz: f64) -> f64 {
        match self {
            MaterialModel::Vacuum => Vacuum.energy_loss(z, dz),
            MaterialModel::Uniform(m) => m.energy_loss(z, dz),
        }
    }

    fn process_noise(
        &self,
        state: &StateVector,
        dz: f64,
        mass: f64,
        propagator: &HelixPropagator,
    ) -> StateCov {
        match self {
            MaterialModel::Vacuum => Vacuum.process_noise(state, dz, mass, propagator),
            MaterialModel::Uniform(m) => m.process_noise(state, dz, mass, propagator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn vacuum_is_inert() {
        let prop = HelixPropagator::new(0.6);
        let s = StateVector::new(0.0, 0.0, 0.1, 0.2, 0.0);
        assert_eq!(Vacuum.energy_loss(0.0, 1.0), 0.0);
        assert_eq!(Vacuum.process_noise(&s, 1.0, 0.1, &prop), StateCov::zeros());
    }

    #[test]
    fn scattering_noise_is_symmetric_and_grows_with_path() {
        let prop = HelixPropagator::new(0.6);
        let m = UniformMaterial::default();
        let s = StateVector::new(0.0, 0.0, 0.3, 0.4, 0.1);
        let short = m.process_noise(&s, 0.1, 0.105, &prop);
        let long = m.process_noise(&s, 0.5, 0.105, &prop);
        assert_abs_diff_eq!(short, short.transpose(), epsilon = 1e-18);
        assert!(long[(4, 4)] > short[(4, 4)]);
        assert!(short.diagonal().iter().all(|&v| v >= 0.0));
        // rank-one dip block is positive semi-definite
        let det = short[(2, 2)] * short[(3, 3)] - short[(2, 3)] * short[(3, 2)];
        assert!(det.abs() < 1e-20);
    }

    #[test]
    fn energy_loss_follows_step_sign() {
        let m = UniformMaterial::default();
        assert!(m.energy_loss(0.0, 0.2) > 0.0);
        assert!(m.energy_loss(0.0, -0.2) < 0.0);
    }
}
