//! Fundamental types used across the entire workspace.
//!
//! # Coordinate frame
//! The magnetic field points along `x`. Detector planes are perpendicular to
//! `z`, the longitudinal (traversal) axis; `y` completes the bending plane
//! `(y, z)`.
//!
//! # Helix state
//! s = [x, y, ρ, tanλ, φ]ᵀ at a given `z`, where
//! - `ρ` is the signed inverse radius (charge sign × 1/R, 1/m),
//! - `tanλ` is the dip of the direction towards the field axis,
//! - `φ` is the azimuth of motion in the bending plane measured from `z`
//!   towards `y` (φ = 0 ⇒ moving straight downstream).

use nalgebra::{Matrix2, Matrix2x5, Matrix5, Matrix5x2, Vector2, Vector3, Vector5};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::ops::{Add, Mul, Sub};

// ---------------------------------------------------------------------------
// Fixed-size matrix aliases. f64 throughout for the Jacobian algebra.
// ---------------------------------------------------------------------------

/// Raw 5-element helix parameter vector
pub type StateVec = Vector5<f64>;

/// 5×5 state covariance
pub type StateCov = Matrix5<f64>;

/// 5×5 propagator (Jacobian of the propagated state w.r.t. the input state)
pub type PropagatorMatrix = Matrix5<f64>;

/// 2-element measurement / prediction vector in layer-local coordinates
pub type MeasVec = Vector2<f64>;

/// 2×2 measurement-space covariance (R, H·P·Hᵀ, S)
pub type MeasCov = Matrix2<f64>;

/// 2×5 projection H
pub type ProjectionMatrix = Matrix2x5<f64>;

/// 5×2 Kalman gain K
pub type GainMatrix = Matrix5x2<f64>;

// ---------------------------------------------------------------------------
// Identifier types — newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PlaneId(pub u32);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ClusterId(pub u64);

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ParticleId(pub u64);

impl PlaneId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Traversal direction
// ---------------------------------------------------------------------------

/// Which way the Manager walks through the plane sequence.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Towards increasing plane index / z
    #[default]
    Forward,
    /// Towards decreasing plane index / z
    Backward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Forward => 1.0,
            Direction::Backward => -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Azimuth ↔ helix phase
// ---------------------------------------------------------------------------

/// Phase angle α of the position on the helix circle, seen from its axis.
/// Relative to the circle centre the point sits at `R·(sin α, cos α)` in `(y, z)`.
pub fn phase_from_azimuth(phi: f64, charge: i32) -> f64 {
    phi - f64::from(charge) * FRAC_PI_2
}

/// Inverse of [`phase_from_azimuth`].
pub fn azimuth_from_phase(phase: f64, charge: i32) -> f64 {
    phase + f64::from(charge) * FRAC_PI_2
}

// ---------------------------------------------------------------------------
// StateVector
// ---------------------------------------------------------------------------

/// Helix parameters at one longitudinal position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateVector(StateVec);

impl StateVector {
    pub const X: usize = 0;
    pub const Y: usize = 1;
    pub const INV_RADIUS: usize = 2;
    pub const TAN_LAMBDA: usize = 3;
    pub const PHI: usize = 4;

    pub fn new(x: f64, y: f64, signed_inverse_radius: f64, tan_lambda: f64, phi: f64) -> Self {
        Self(StateVec::new(x, y, signed_inverse_radius, tan_lambda, phi))
    }

    pub fn from_vec(v: StateVec) -> Self {
        Self(v)
    }

    pub fn as_vec(&self) -> &StateVec {
        &self.0
    }

    pub fn x(&self) -> f64 {
        self.0[Self::X]
    }

    pub fn y(&self) -> f64 {
        self.0[Self::Y]
    }

    pub fn signed_inverse_radius(&self) -> f64 {
        self.0[Self::INV_RADIUS]
    }

    pub fn tan_lambda(&self) -> f64 {
        self.0[Self::TAN_LAMBDA]
    }

    pub fn phi(&self) -> f64 {
        self.0[Self::PHI]
    }

    /// +1 for positive (including +0.0) curvature, −1 otherwise.
    pub fn charge(&self) -> i32 {
        if self.signed_inverse_radius().is_sign_negative() {
            -1
        } else {
            1
        }
    }

    pub fn charged_radius(&self) -> f64 {
        1.0 / self.signed_inverse_radius()
    }

    pub fn radius(&self) -> f64 {
        self.charged_radius() * f64::from(self.charge())
    }

    /// Helix phase α (see [`phase_from_azimuth`]).
    pub fn phase(&self) -> f64 {
        phase_from_azimuth(self.phi(), self.charge())
    }

    /// Unit direction of motion `(dx, dy, dz)`.
    pub fn direction_cosines(&self) -> Vector3<f64> {
        let t = self.tan_lambda();
        let cos_l = 1.0 / (1.0 + t * t).sqrt();
        Vector3::new(
            t * cos_l,
            cos_l * self.phi().sin(),
            cos_l * self.phi().cos(),
        )
    }

    /// Element-wise (Hadamard) product.
    pub fn hadamard(&self, other: &StateVector) -> StateVector {
        Self(self.0.component_mul(&other.0))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

impl Add for StateVector {
    type Output = StateVector;
    fn add(self, rhs: StateVector) -> StateVector {
        Self(self.0 + rhs.0)
    }
}

impl Sub for StateVector {
    type Output = StateVector;
    fn sub(self, rhs: StateVector) -> StateVector {
        Self(self.0 - rhs.0)
    }
}

impl Mul for StateVector {
    type Output = StateVector;
    fn mul(self, rhs: StateVector) -> StateVector {
        self.hadamard(&rhs)
    }
}

impl From<StateVec> for StateVector {
    fn from(v: StateVec) -> Self {
        Self(v)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Immutable snapshot: helix parameters plus their covariance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub vector: StateVector,
    pub cov: StateCov,
}

impl State {
    pub fn new(vector: StateVector, cov: StateCov) -> Self {
        Self { vector, cov }
    }

    /// Trace of the covariance, used as a scalar uncertainty measure.
    pub fn cov_trace(&self) -> f64 {
        self.cov.trace()
    }

    /// 1σ uncertainty of each helix parameter.
    pub fn sigmas(&self) -> StateVec {
        StateVec::from_fn(|i, _| self.cov[(i, i)].max(0.0).sqrt())
    }
}
