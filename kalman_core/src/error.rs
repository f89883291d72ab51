//! Error taxonomy of a single track fit.
//!
//! Every error is local to one candidate track: geometry and cluster
//! collaborators are only ever read, so a failed fit never leaves shared state
//! behind.

use crate::types::{ParticleId, PlaneId};

/// Why a fit was aborted.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FitError {
    /// Singular / ill-conditioned matrix, violated helix magnitude condition,
    /// non-finite state or a covariance that lost symmetry / positivity.
    #[error("numerical failure: {0}")]
    NumericalFailure(&'static str),

    /// Not enough seed points, or degenerate seed geometry.
    #[error("seed failure: {0}")]
    SeedFailure(&'static str),

    /// Too many consecutive layers without an accepted measurement.
    #[error("track lost at plane {plane}: {misses} consecutive missed layers")]
    TrackLost { plane: PlaneId, misses: usize },

    /// The geometry collaborator does not know this plane.
    #[error("unknown plane {0}")]
    UnknownPlane(PlaneId),

    /// The truth collaborator does not know this particle.
    #[error("unknown particle {0}")]
    UnknownParticle(ParticleId),

    /// `step` / `run` called before any seeding policy initialised the fit.
    #[error("fit has not been seeded")]
    NotSeeded,
}

pub type Result<T> = std::result::Result<T, FitError>;
