//! `kalman_core` — helix track fitting through a layered detector.
//!
//! # Module layout
//! - [`types`]       — Helix state vector, covariance aliases, identifiers
//! - [`geometry`]    — Plane / cluster / truth collaborator traits
//! - [`propagation`] — Analytic helix propagation, energy loss and Jacobian
//! - [`material`]    — Energy-loss and process-noise policies
//! - [`observation`] — Measurement model h(x), projection H, cluster → measurement
//! - [`kf`]          — Kalman predict / update, guarded inversions
//! - [`gating`]      — χ² gate and best-match selection
//! - [`track`]       — TrackStep / Track containers
//! - [`smoother`]    — Rauch–Tung–Striebel backward pass
//! - [`seeding`]     — Truth and circle seeds, seed covariance
//! - [`manager`]     — Fit session: seed → step … → smooth
//! - [`batch`]       — Parallel fits of many particles
//! - [`metrics`]     — Curvature resolution, pulls, efficiency
//! - [`error`]       — `FitError`

pub mod batch;
pub mod error;
pub mod gating;
pub mod geometry;
pub mod kf;
pub mod manager;
pub mod material;
pub mod metrics;
pub mod observation;
pub mod propagation;
pub mod seeding;
pub mod smoother;
pub mod track;
pub mod types;

pub use error::{FitError, Result};
pub use geometry::{Cluster, ClusterProvider, Geometry, Orientation, ParticleInfo, Plane, TruthProvider};
pub use manager::{FitConfig, FitDiagnostics, FittedTrack, ForwardPass, Manager, StepOutcome};
pub use material::{Material, MaterialModel, UniformMaterial, Vacuum};
pub use track::{Track, TrackStateStage, TrackStep};
pub use types::{ClusterId, Direction, ParticleId, PlaneId, State, StateCov, StateVec, StateVector};
