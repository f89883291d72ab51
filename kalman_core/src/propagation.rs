//! Helix propagation between planes and its analytic Jacobian.
//!
//! # Geometry
//! With q = sign(ρ), R = 1/|ρ| and the helix phase α = φ − q·π/2, a step `dz`
//! along the longitudinal axis moves the phase to
//!
//!   cos α' = cos α + dz/R,  equivalently  sin φ' = sin φ + ρ·dz
//!
//! and the transverse coordinates to
//!
//!   x' = x + tanλ·(φ' − φ)/ρ           (arc length × dip)
//!   y' = y + (cos φ − cos φ')/ρ
//!
//! The step is only defined while |sin φ + ρ·dz| < 1, i.e. while the track
//! still reaches the target plane.
//!
//! Both increments are evaluated from the chord, never as differences of
//! nearly equal angles, so they stay exact as ρ → 0:
//!
//!   (cos φ − cos φ')/ρ = dz·(sin φ + sin φ')/(cos φ + cos φ')
//!   φ' − φ = atan2(ρ·dz·(cos φ + sin φ·σ), cos(φ' − φ)),  σ = (sin φ + sin φ')/(cos φ + cos φ')
//!
//! # Energy loss
//! `de` is the energy lost over `|dz|` at normal incidence; the actual loss
//! scales with the path length, ΔE = de·√(1+tan²λ)/|cos φ|. With
//! p = k·√(1+tan²λ)/|ρ| (k = 0.3·B) the new curvature is
//!
//!   ρ' = q·k·√(1+tan²λ) / p',   p' = √((E − ΔE)² − m²)
//!
//! which couples ρ' to tanλ and φ whenever `de ≠ 0`. Direction is unchanged by
//! continuous energy loss.

use crate::{
    error::{FitError, Result},
    types::{PropagatorMatrix, StateCov, StateVector},
};

/// c / 10⁹: transverse momentum (GeV) per tesla·metre of bending radius.
pub const GEV_PER_TESLA_METRE: f64 = 0.299_792_458;

/// Below |ρ·dz| < SERIES_LIMIT·cos²φ the curvature derivative of the arc
/// length is taken from its Taylor series.
const SERIES_LIMIT: f64 = 1e-3;

/// Result of one propagation step.
#[derive(Clone, Copy, Debug)]
pub struct Propagation {
    pub vector: StateVector,
    /// Azimuth φ at the target plane
    pub next_phi: f64,
    /// ∂(propagated state)/∂(input state)
    pub jacobian: PropagatorMatrix,
}

/// Intermediate energy-loss quantities shared by the state and Jacobian code.
#[derive(Clone, Copy, Debug)]
struct EnergyLoss {
    p0: f64,
    e0: f64,
    p1: f64,
    e1: f64,
    delta_e: f64,
    next_inv_radius: f64,
}

/// Trigonometry of one step, arranged so nothing cancels as ρ → 0.
#[derive(Clone, Copy, Debug)]
struct Chord {
    sin0: f64,
    cos0: f64,
    cos1: f64,
    /// ρ·dz = sin φ' − sin φ
    w: f64,
    /// (sin φ + sin φ')/(cos φ + cos φ')
    sagitta: f64,
    /// sin(φ' − φ)/w
    sin_turn: f64,
    /// φ' − φ
    turn: f64,
}

impl Chord {
    fn new(sv: &StateVector, dz: f64) -> Result<Self> {
        let (sin0, cos0) = sv.phi().sin_cos();
        let w = sv.signed_inverse_radius() * dz;
        let sin1 = sin0 + w;
        if !(sin1.abs() < 1.0) {
            return Err(FitError::NumericalFailure("helix does not reach target plane"));
        }
        let cos1 = (1.0 - sin1 * sin1).sqrt();
        let sagitta = (sin0 + sin1) / (cos0 + cos1);
        let sin_turn = cos0 + sin0 * sagitta;
        let cos_turn = cos1 * cos0 + sin1 * sin0;
        Ok(Self {
            sin0,
            cos0,
            cos1,
            w,
            sagitta,
            sin_turn,
            turn: (w * sin_turn).atan2(cos_turn),
        })
    }

    /// Transverse arc length over `dz`.
    fn arc(&self, inv_radius: f64) -> f64 {
        self.turn / inv_radius
    }

    /// d/dw of (asin(sin φ + w) − asin(sin φ))/w, so ∂arc/∂ρ = dz²·arc_slope.
    fn arc_slope(&self) -> f64 {
        let (s, c, w) = (self.sin0, self.cos0, self.w);
        let c2 = c * c;
        if w.abs() < SERIES_LIMIT * c2 {
            // derivatives of asin at sin φ
            let s2 = s * s;
            let a2 = s / (c2 * c);
            let a3 = (1.0 + 2.0 * s2) / (c2 * c2 * c);
            let a4 = s * (9.0 + 6.0 * s2) / (c2 * c2 * c2 * c);
            let a5 = (9.0 + 72.0 * s2 + 24.0 * s2 * s2) / (c2 * c2 * c2 * c2 * c);
            a2 / 2.0 + w * (a3 / 3.0 + w * (a4 / 8.0 + w * a5 / 30.0))
        } else {
            (w / self.cos1 - self.turn) / (w * w)
        }
    }
}

/// Propagates helix states through a uniform field along `x`.
#[derive(Clone, Copy, Debug)]
pub struct HelixPropagator {
    /// k = 0.3·B: GeV of transverse momentum per metre of radius
    k: f64,
}

impl HelixPropagator {
    pub fn new(field_tesla: f64) -> Self {
        Self {
            k: GEV_PER_TESLA_METRE * field_tesla,
        }
    }

    // -----------------------------------------------------------------------
    // Kinematics
    // -----------------------------------------------------------------------

    /// Momentum in the bending plane (GeV).
    pub fn transverse_momentum(&self, sv: &StateVector) -> f64 {
        self.k / sv.signed_inverse_radius().abs()
    }

    /// Total momentum (GeV).
    pub fn momentum(&self, sv: &StateVector) -> f64 {
        let t = sv.tan_lambda();
        self.transverse_momentum(sv) * (1.0 + t * t).sqrt()
    }

    pub fn energy(&self, sv: &StateVector, mass: f64) -> f64 {
        self.momentum(sv).hypot(mass)
    }

    /// Velocity β = p/E for the given mass hypothesis.
    pub fn beta(&self, sv: &StateVector, mass: f64) -> f64 {
        self.momentum(sv) / self.energy(sv, mass)
    }

    /// Signed inverse radius of a particle with momentum `p_t` in the bending plane.
    pub fn inverse_radius_from_momentum(&self, charge: i32, p_t: f64) -> f64 {
        f64::from(charge) * self.k / p_t
    }

    // -----------------------------------------------------------------------
    // State propagation
    // -----------------------------------------------------------------------

    fn check_input(sv: &StateVector) -> Result<()> {
        if !sv.is_finite() {
            return Err(FitError::NumericalFailure("non-finite state vector"));
        }
        if sv.signed_inverse_radius() == 0.0 {
            return Err(FitError::NumericalFailure("zero curvature"));
        }
        if sv.phi().cos() <= 0.0 {
            return Err(FitError::NumericalFailure("track not moving downstream"));
        }
        Ok(())
    }

    /// cos α + dz/R, the quantity that must stay inside (−1, 1).
    fn next_cos_phase(sv: &StateVector, dz: f64) -> f64 {
        sv.phase().cos() + dz * sv.signed_inverse_radius().abs()
    }

    /// Azimuth reached after a longitudinal step `dz`.
    pub fn next_phi(&self, sv: &StateVector, dz: f64) -> Result<f64> {
        Self::check_input(sv)?;
        let chord = Chord::new(sv, dz)?;
        Ok(sv.phi() + chord.turn)
    }

    fn energy_loss(&self, sv: &StateVector, de: f64, mass: f64) -> Result<EnergyLoss> {
        let t = sv.tan_lambda();
        let c = (1.0 + t * t).sqrt();
        let p0 = self.k * c / sv.signed_inverse_radius().abs();
        let e0 = p0.hypot(mass);
        let delta_e = de * c / sv.phi().cos().abs();
        let e1 = e0 - delta_e;
        if !(e1 > mass) {
            return Err(FitError::NumericalFailure("particle ranged out"));
        }
        let p1 = (e1 * e1 - mass * mass).sqrt();
        let next_inv_radius = f64::from(sv.charge()) * self.k * c / p1;
        Ok(EnergyLoss {
            p0,
            e0,
            p1,
            e1,
            delta_e,
            next_inv_radius,
        })
    }

    /// Propagate the helix parameters by `dz`, losing `de` (GeV, normal incidence).
    pub fn propagate_state(
        &self,
        sv: &StateVector,
        dz: f64,
        de: f64,
        mass: f64,
    ) -> Result<StateVector> {
        Self::check_input(sv)?;
        let chord = Chord::new(sv, dz)?;
        let rho = sv.signed_inverse_radius();
        let next_phi = sv.phi() + chord.turn;

        let x = sv.x() + sv.tan_lambda() * chord.arc(rho);
        let y = sv.y() + dz * chord.sagitta;
        let inv_radius = if de == 0.0 {
            rho
        } else {
            self.energy_loss(sv, de, mass)?.next_inv_radius
        };

        let out = StateVector::new(x, y, inv_radius, sv.tan_lambda(), next_phi);
        if !out.is_finite() {
            return Err(FitError::NumericalFailure("non-finite propagated state"));
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Jacobian
    // -----------------------------------------------------------------------

    /// q / √(1 − (cos α + dz/R)²): common factor of every ∂φ'/∂· term.
    fn d_phi_d_cos_phi(sv: &StateVector, dz: f64) -> Result<f64> {
        let u = Self::next_cos_phase(sv, dz);
        let s = 1.0 - u * u;
        if !(s > f64::EPSILON) {
            return Err(FitError::NumericalFailure("helix tangent to target plane"));
        }
        Ok(f64::from(sv.charge()) / s.sqrt())
    }

    /// Analytic propagator matrix ∂f_i/∂s_j for the step `sv → next_phi`.
    /// `next_phi` must be the azimuth [`Self::next_phi`] returns for `dz`.
    pub fn propagator_matrix(
        &self,
        sv: &StateVector,
        next_phi: f64,
        dz: f64,
        de: f64,
        mass: f64,
    ) -> Result<PropagatorMatrix> {
        Self::check_input(sv)?;
        let rho = sv.signed_inverse_radius();
        let t = sv.tan_lambda();
        let chord = Chord::new(sv, dz)?;
        if (sv.phi() + chord.turn - next_phi).abs() > 1e-9 {
            return Err(FitError::NumericalFailure("target azimuth inconsistent with step"));
        }
        let alpha = sv.phase();

        let d_cos = Self::d_phi_d_cos_phi(sv, dz)?;
        let dphi_dphi = -alpha.sin() * d_cos;
        let dphi_dinv = f64::from(sv.charge()) * dz * d_cos;

        let mut j = PropagatorMatrix::identity();

        // x' = x + tanλ·arc
        j[(0, 2)] = t * dz * dz * chord.arc_slope();
        j[(0, 3)] = chord.arc(rho);
        j[(0, 4)] = t * dz * chord.sagitta / chord.cos1;

        // y' = y + dz·sagitta
        j[(1, 2)] = dz * dz * chord.sin_turn / (chord.cos1 * (chord.cos0 + chord.cos1));
        j[(1, 4)] = dz * chord.sin_turn / chord.cos1;

        // ρ' only moves away from the identity row through the energy loss
        if de != 0.0 {
            let el = self.energy_loss(sv, de, mass)?;
            let c2 = 1.0 + t * t;
            let rho1 = el.next_inv_radius;
            let p1_sq = el.p1 * el.p1;
            j[(2, 2)] = rho1 * el.e1 * el.p0 * el.p0 / (p1_sq * el.e0 * rho);
            j[(2, 3)] =
                rho1 * t / c2 * (1.0 - el.e1 * (el.p0 * el.p0 / el.e0 - el.delta_e) / p1_sq);
            j[(2, 4)] = rho1 * el.e1 * el.delta_e * sv.phi().tan() / p1_sq;
        }

        // φ'
        j[(4, 2)] = dphi_dinv;
        j[(4, 4)] = dphi_dphi;

        if j.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NumericalFailure("non-finite propagator matrix"));
        }
        Ok(j)
    }

    /// Propagated state plus the Jacobian evaluated at the input state.
    pub fn propagate(&self, sv: &StateVector, dz: f64, de: f64, mass: f64) -> Result<Propagation> {
        let next_phi = self.next_phi(sv, dz)?;
        let vector = self.propagate_state(sv, dz, de, mass)?;
        let jacobian = self.propagator_matrix(sv, next_phi, dz, de, mass)?;
        Ok(Propagation {
            vector,
            next_phi,
            jacobian,
        })
    }
}

/// P' = J·P·Jᵀ + Q
pub fn propagate_cov(cov: &StateCov, jacobian: &PropagatorMatrix, noise: &StateCov) -> StateCov {
    jacobian * cov * jacobian.transpose() + noise
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const MUON_MASS: f64 = 0.105_658_375_5;

    fn central_difference(
        prop: &HelixPropagator,
        sv: &StateVector,
        dz: f64,
        de: f64,
    ) -> PropagatorMatrix {
        let mut fd = PropagatorMatrix::zeros();
        for col in 0..5 {
            let h = 1e-6 * sv.as_vec()[col].abs().max(1e-2);
            let mut plus = *sv.as_vec();
            let mut minus = *sv.as_vec();
            plus[col] += h;
            minus[col] -= h;
            let fp = prop
                .propagate_state(&StateVector::from_vec(plus), dz, de, MUON_MASS)
                .unwrap();
            let fm = prop
                .propagate_state(&StateVector::from_vec(minus), dz, de, MUON_MASS)
                .unwrap();
            let diff = (fp.as_vec() - fm.as_vec()) / (2.0 * h);
            fd.set_column(col, &diff);
        }
        fd
    }

    fn assert_jacobian_matches(sv: StateVector, dz: f64, de: f64) {
        let prop = HelixPropagator::new(0.6);
        let analytic = prop.propagate(&sv, dz, de, MUON_MASS).unwrap().jacobian;
        let numeric = central_difference(&prop, &sv, dz, de);
        for r in 0..5 {
            for c in 0..5 {
                let tol = 1e-4 * (1.0 + analytic[(r, c)].abs());
                assert!(
                    (analytic[(r, c)] - numeric[(r, c)]).abs() < tol,
                    "J[{r}][{c}]: analytic {} vs numeric {}",
                    analytic[(r, c)],
                    numeric[(r, c)]
                );
            }
        }
    }

    #[test]
    fn straight_step_advances_along_direction() {
        let prop = HelixPropagator::new(0.6);
        let sv = StateVector::new(0.0, 0.0, 1e-9, 0.3, 0.1);
        let out = prop.propagate_state(&sv, 1.0, 0.0, MUON_MASS).unwrap();
        assert_abs_diff_eq!(out.y(), 0.1f64.tan(), epsilon = 1e-6);
        assert_abs_diff_eq!(out.x(), 0.3 / 0.1f64.cos(), epsilon = 1e-6);
        assert_abs_diff_eq!(out.phi(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn positive_charge_bends_towards_positive_y() {
        let prop = HelixPropagator::new(0.6);
        let sv = StateVector::new(0.0, 0.0, 0.5, 0.0, 0.0);
        let out = prop.propagate_state(&sv, 0.5, 0.0, MUON_MASS).unwrap();
        assert!(out.y() > 0.0);
        assert!(out.phi() > 0.0);
        // circle of radius 2 entered tangentially: sin φ' = dz/R
        assert_abs_diff_eq!(out.phi(), (0.25f64).asin(), epsilon = 1e-12);
    }

    #[test]
    fn round_trip_without_energy_loss() {
        let prop = HelixPropagator::new(0.6);
        for sv in [
            StateVector::new(0.1, -0.2, 0.5, 0.3, 0.2),
            StateVector::new(-0.3, 0.4, -0.8, -0.7, -0.4),
            StateVector::new(0.0, 0.0, 1e-6, 0.3, 0.0),
        ] {
            let fwd = prop.propagate_state(&sv, 0.35, 0.0, MUON_MASS).unwrap();
            let back = prop.propagate_state(&fwd, -0.35, 0.0, MUON_MASS).unwrap();
            for i in 0..5 {
                assert_abs_diff_eq!(back.as_vec()[i], sv.as_vec()[i], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        assert_jacobian_matches(StateVector::new(0.1, -0.2, 0.5, 0.3, 0.2), 0.3, 0.0);
        assert_jacobian_matches(StateVector::new(-0.3, 0.4, -0.8, -0.7, -0.4), 0.25, 0.0);
    }

    #[test]
    fn jacobian_matches_finite_differences_with_energy_loss() {
        assert_jacobian_matches(StateVector::new(0.1, -0.2, 0.5, 0.3, 0.2), 0.3, 0.002);
        assert_jacobian_matches(StateVector::new(0.0, 0.1, -0.6, -0.4, -0.3), 0.2, 0.004);
    }

    #[test]
    fn jacobian_matches_finite_differences_at_small_curvature() {
        assert_jacobian_matches(StateVector::new(0.0, 0.0, 1e-3, 0.3, 0.2), 0.1, 0.0);
        assert_jacobian_matches(StateVector::new(0.0, 0.0, -2e-3, -0.2, -0.4), 0.5, 0.0);
    }

    #[test]
    fn curvature_column_is_stable_near_straight_line() {
        let prop = HelixPropagator::new(0.6);
        let (t, dz) = (0.3, 0.1);
        for rho in [1e-4, 1e-6, 1e-8, 1e-10] {
            let sv = StateVector::new(0.0, 0.0, rho, t, 0.0);
            let j = prop.propagate(&sv, dz, 0.0, MUON_MASS).unwrap().jacobian;
            // series at φ = 0: x' − x ≈ t·(dz + ρ²dz³/6), y' − y ≈ ρ·dz²/2
            let x_ref = t * dz * dz * dz * rho / 3.0;
            assert!(
                (j[(0, 2)] - x_ref).abs() < 1e-6 * x_ref,
                "rho {rho}: J[x][rho] {} vs {x_ref}",
                j[(0, 2)]
            );
            assert_abs_diff_eq!(j[(1, 2)], dz * dz / 2.0, epsilon = 1e-9);
            assert_abs_diff_eq!(j[(4, 2)], dz, epsilon = 1e-9);
            assert_abs_diff_eq!(j[(0, 3)], dz, epsilon = 1e-9);
        }
    }

    #[test]
    fn curvature_column_at_oblique_azimuth_tends_to_its_limit() {
        let prop = HelixPropagator::new(0.6);
        let (t, dz, phi) = (0.3, 0.2, 0.4f64);
        let c = phi.cos();
        let x_limit = t * dz * dz * phi.sin() / (2.0 * c * c * c);
        let y_limit = dz * dz / (2.0 * c * c * c);
        for rho in [1e-7, 1e-9, -1e-9] {
            let sv = StateVector::new(0.0, 0.0, rho, t, phi);
            let j = prop.propagate(&sv, dz, 0.0, MUON_MASS).unwrap().jacobian;
            assert_abs_diff_eq!(j[(0, 2)], x_limit, epsilon = 1e-8);
            assert_abs_diff_eq!(j[(1, 2)], y_limit, epsilon = 1e-8);
        }
    }

    #[test]
    fn arc_slope_is_continuous_across_series_switch() {
        let prop = HelixPropagator::new(0.6);
        let (dz, phi) = (0.1, 0.3f64);
        let edge = SERIES_LIMIT * phi.cos() * phi.cos() / dz;
        let below = StateVector::new(0.0, 0.0, edge * (1.0 - 1e-6), 0.5, phi);
        let above = StateVector::new(0.0, 0.0, edge * (1.0 + 1e-6), 0.5, phi);
        let jb = prop.propagate(&below, dz, 0.0, MUON_MASS).unwrap().jacobian;
        let ja = prop.propagate(&above, dz, 0.0, MUON_MASS).unwrap().jacobian;
        assert_abs_diff_eq!(jb[(0, 2)], ja[(0, 2)], epsilon = 1e-6 * ja[(0, 2)].abs());
    }

    #[test]
    fn curvature_decouples_from_direction_without_energy_loss() {
        let prop = HelixPropagator::new(0.6);
        let sv = StateVector::new(0.0, 0.0, 0.5, 0.3, 0.2);
        let j = prop.propagate(&sv, 0.3, 0.0, MUON_MASS).unwrap().jacobian;
        assert_eq!(j[(2, 2)], 1.0);
        assert_eq!(j[(2, 3)], 0.0);
        assert_eq!(j[(2, 4)], 0.0);
    }

    #[test]
    fn energy_loss_tightens_curvature() {
        let prop = HelixPropagator::new(0.6);
        let sv = StateVector::new(0.0, 0.0, 0.5, 0.0, 0.0);
        let out = prop.propagate_state(&sv, 0.1, 0.01, MUON_MASS).unwrap();
        assert!(out.signed_inverse_radius() > sv.signed_inverse_radius());
        assert_abs_diff_eq!(out.tan_lambda(), sv.tan_lambda());
    }

    #[test]
    fn unreachable_plane_is_a_numerical_failure() {
        let prop = HelixPropagator::new(0.6);
        // R = 0.5 m cannot advance 1 m along z
        let sv = StateVector::new(0.0, 0.0, 2.0, 0.0, 0.0);
        assert!(matches!(
            prop.propagate_state(&sv, 1.0, 0.0, MUON_MASS),
            Err(FitError::NumericalFailure(_))
        ));
    }

    #[test]
    fn ranging_out_is_a_numerical_failure() {
        let prop = HelixPropagator::new(0.6);
        let sv = StateVector::new(0.0, 0.0, 0.5, 0.0, 0.0);
        assert!(prop.propagate_state(&sv, 0.1, 10.0, MUON_MASS).is_err());
    }

    #[test]
    fn momentum_helpers_are_consistent() {
        let prop = HelixPropagator::new(0.6);
        let rho = prop.inverse_radius_from_momentum(-1, 1.2);
        let sv = StateVector::new(0.0, 0.0, rho, 0.75, 0.0);
        assert_abs_diff_eq!(prop.transverse_momentum(&sv), 1.2, epsilon = 1e-12);
        assert_abs_diff_eq!(prop.momentum(&sv), 1.5, epsilon = 1e-12);
        assert!(prop.beta(&sv, MUON_MASS) < 1.0);
    }
}
