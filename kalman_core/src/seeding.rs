//! Initial state estimates.
//!
//! Two policies:
//! - **Truth**: convert a simulated particle's vertex and momentum to the
//!   helix basis. Used to validate / calibrate the fitter.
//! - **Points**: fit a circle through three space points in the bending plane
//!   `(z, y)` and a straight line in arc length for `x`.
//!
//! Both return the vector only; [`seed_covariance`] inflates an initial
//! covariance around it.

use crate::{
    error::{FitError, Result},
    geometry::{Cluster, ParticleInfo},
    propagation::HelixPropagator,
    types::{Direction, StateCov, StateVector},
};
use nalgebra::{Vector2, Vector5};
use serde::{Deserialize, Serialize};

/// Initial uncertainties and point-search limits.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    /// 1σ on x (m)
    pub sigma_x: f64,
    /// 1σ on y (m)
    pub sigma_y: f64,
    /// 1σ on ρ relative to |ρ|
    pub sigma_inv_radius_rel: f64,
    /// 1σ on ρ added to the relative term (1/m)
    pub sigma_inv_radius_abs: f64,
    pub sigma_tan_lambda: f64,
    pub sigma_phi: f64,
    /// Space points collected for a point seed
    pub n_points: usize,
    /// Planes inspected while collecting seed points
    pub max_search_planes: usize,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            sigma_x: 0.004,
            sigma_y: 0.004,
            sigma_inv_radius_rel: 0.5,
            sigma_inv_radius_abs: 0.01,
            sigma_tan_lambda: 0.1,
            sigma_phi: 0.1,
            n_points: 3,
            max_search_planes: 10,
        }
    }
}

/// A 3D space point taken from a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeedPoint {
    pub z: f64,
    pub x: f64,
    pub y: f64,
}

impl SeedPoint {
    pub fn from_cluster(cluster: &Cluster, z: f64) -> Self {
        Self {
            z,
            x: cluster.x,
            y: cluster.y,
        }
    }
}

/// Helix parameters of a truth particle at its vertex.
pub fn state_from_truth(
    particle: &ParticleInfo,
    propagator: &HelixPropagator,
) -> Result<StateVector> {
    if particle.charge == 0 {
        return Err(FitError::SeedFailure("neutral particle"));
    }
    let p = &particle.momentum;
    let p_t = p.y.hypot(p.z);
    if !(p_t > 0.0) {
        return Err(FitError::SeedFailure("no momentum in the bending plane"));
    }
    if p.z <= 0.0 {
        return Err(FitError::SeedFailure("particle not moving downstream"));
    }
    let inv_radius = propagator.inverse_radius_from_momentum(particle.charge.signum(), p_t);
    Ok(StateVector::new(
        particle.position.x,
        particle.position.y,
        inv_radius,
        p.x / p_t,
        p.y.atan2(p.z),
    ))
}

/// Deliberately inflated diagonal covariance around a seed.
pub fn seed_covariance(sv: &StateVector, config: &SeedConfig) -> StateCov {
    let sigma_rho =
        config.sigma_inv_radius_rel * sv.signed_inverse_radius().abs() + config.sigma_inv_radius_abs;
    StateCov::from_diagonal(&Vector5::new(
        config.sigma_x * config.sigma_x,
        config.sigma_y * config.sigma_y,
        sigma_rho * sigma_rho,
        config.sigma_tan_lambda * config.sigma_tan_lambda,
        config.sigma_phi * config.sigma_phi,
    ))
}

/// Circle + line seed through `points`. The state is anchored on the most
/// upstream point for a forward traversal and on the most downstream point
/// otherwise. Returns the state and its `z`.
pub fn circle_seed(points: &[SeedPoint], direction: Direction) -> Result<(StateVector, f64)> {
    if points.len() < 3 {
        return Err(FitError::SeedFailure("fewer than three seed points"));
    }
    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.z.total_cmp(&b.z));
    let first = sorted[0];
    let middle = sorted[sorted.len() / 2];
    let last = sorted[sorted.len() - 1];

    // Bending plane as (z, y); everything relative to the first point
    let to_plane = |p: &SeedPoint| Vector2::new(p.z - first.z, p.y - first.y);
    let u = to_plane(&middle);
    let v = to_plane(&last);
    let cross = u.x * v.y - u.y * v.x;
    let scale = u.norm() * v.norm();
    if !(scale > 0.0) || (cross / scale).abs() < 1e-9 {
        return Err(FitError::SeedFailure("collinear seed points"));
    }

    let d = 2.0 * cross;
    let centre = Vector2::new(
        (v.y * u.norm_squared() - u.y * v.norm_squared()) / d,
        (u.x * v.norm_squared() - v.x * u.norm_squared()) / d,
    );
    let radius = centre.norm();
    // anticlockwise in (z, y) ⇔ turning towards +y ⇔ positive curvature
    let charge = cross.signum();

    let anchor = match direction {
        Direction::Forward => first,
        Direction::Backward => last,
    };
    let r = to_plane(&anchor) - centre;
    let tangent = if charge > 0.0 {
        Vector2::new(-r.y, r.x)
    } else {
        Vector2::new(r.y, -r.x)
    };
    let phi = tangent.y.atan2(tangent.x);
    if phi.cos() <= 0.0 {
        return Err(FitError::SeedFailure("seed points not ordered downstream"));
    }

    // x grows linearly with the arc length in the bending plane
    let r_first = -centre;
    let r_last = v - centre;
    let swept = (r_first.x * r_last.y - r_first.y * r_last.x)
        .atan2(r_first.dot(&r_last))
        .abs();
    let arc = radius * swept;
    let tan_lambda = (last.x - first.x) / arc;

    let sv = StateVector::new(anchor.x, anchor.y, charge / radius, tan_lambda, phi);
    if !sv.is_finite() {
        return Err(FitError::SeedFailure("degenerate seed geometry"));
    }
    Ok((sv, anchor.z))
}

/// Cluster closest to `(x, y)` in the transverse plane.
pub fn closest_cluster(clusters: &[Cluster], x: f64, y: f64) -> Option<&Cluster> {
    clusters.iter().min_by(|a, b| {
        let da = (a.x - x).hypot(a.y - y);
        let db = (b.x - x).hypot(b.y - y);
        da.total_cmp(&db)
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParticleId;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn muon(charge: i32, momentum: Vector3<f64>) -> ParticleInfo {
        ParticleInfo {
            id: ParticleId(1),
            pdg_code: -13 * charge,
            charge,
            mass: 0.105_658_375_5,
            position: Vector3::new(0.01, -0.02, 0.0),
            momentum,
        }
    }

    #[test]
    fn truth_seed_converts_momentum() {
        let prop = HelixPropagator::new(0.6);
        let sv = state_from_truth(&muon(-1, Vector3::new(0.3, 0.0, 1.0)), &prop).unwrap();
        assert_eq!(sv.charge(), -1);
        assert_abs_diff_eq!(prop.transverse_momentum(&sv), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sv.tan_lambda(), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(sv.phi(), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(sv.x(), 0.01);
    }

    #[test]
    fn truth_seed_rejects_neutral_and_upstream() {
        let prop = HelixPropagator::new(0.6);
        assert!(state_from_truth(&muon(0, Vector3::new(0.0, 0.0, 1.0)), &prop).is_err());
        assert!(state_from_truth(&muon(1, Vector3::new(0.0, 0.1, -1.0)), &prop).is_err());
    }

    #[test]
    fn circle_seed_recovers_helix() {
        let prop = HelixPropagator::new(0.6);
        let truth = StateVector::new(0.0, 0.0, 0.4, 0.25, 0.1);
        let points: Vec<SeedPoint> = [0.0, 0.3, 0.6]
            .iter()
            .map(|&dz| {
                let s = if dz == 0.0 {
                    truth
                } else {
                    prop.propagate_state(&truth, dz, 0.0, 0.1).unwrap()
                };
                SeedPoint { z: dz, x: s.x(), y: s.y() }
            })
            .collect();
        let (sv, z) = circle_seed(&points, Direction::Forward).unwrap();
        assert_eq!(z, 0.0);
        for i in 0..5 {
            assert_abs_diff_eq!(sv.as_vec()[i], truth.as_vec()[i], epsilon = 1e-9);
        }

        let (back, z) = circle_seed(&points, Direction::Backward).unwrap();
        let expected = prop.propagate_state(&truth, 0.6, 0.0, 0.1).unwrap();
        assert_eq!(z, 0.6);
        assert_abs_diff_eq!(back.phi(), expected.phi(), epsilon = 1e-9);
        assert_abs_diff_eq!(back.y(), expected.y(), epsilon = 1e-12);
    }

    #[test]
    fn circle_seed_failures() {
        let line: Vec<SeedPoint> = (0..3)
            .map(|i| SeedPoint { z: f64::from(i), x: 0.0, y: 0.1 * f64::from(i) })
            .collect();
        assert!(matches!(
            circle_seed(&line, Direction::Forward),
            Err(FitError::SeedFailure(_))
        ));
        assert!(matches!(
            circle_seed(&line[..2], Direction::Forward),
            Err(FitError::SeedFailure(_))
        ));
    }

    #[test]
    fn seed_covariance_is_inflated_diagonal() {
        let sv = StateVector::new(0.0, 0.0, 0.2, 0.0, 0.0);
        let cov = seed_covariance(&sv, &SeedConfig::default());
        assert_abs_diff_eq!(cov[(0, 0)], 1.6e-5, epsilon = 1e-15);
        assert_abs_diff_eq!(cov[(2, 2)], 0.11 * 0.11, epsilon = 1e-12);
        assert_eq!(cov[(0, 1)], 0.0);
    }
}
