//! Collaborator interfaces: detector planes, clusters and truth particles.
//!
//! The fitting engine never owns these; it reads them through the traits below.
//! Implementations must not be mutated while fits are running, which lets a
//! single instance be shared (`Sync`) by fits running in parallel.

use crate::types::{ClusterId, Direction, ParticleId, PlaneId};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Which coordinate a plane is sensitive to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    /// Vertical wires: measures `x` (the field coordinate) and dx/dz
    Vertical,
    /// Horizontal wires: measures `y` (the bending coordinate) and dy/dz
    Horizontal,
}

impl Orientation {
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Vertical => Orientation::Horizontal,
            Orientation::Horizontal => Orientation::Vertical,
        }
    }
}

/// One detector layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub id: PlaneId,
    /// Longitudinal position (m)
    pub z: f64,
    pub orientation: Orientation,
}

/// A local measurement on one plane, tracklet style: position and slope in
/// both views with their resolutions. Only the view matching the plane
/// orientation enters the filter; the other is kept for seeding.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub x: f64,
    /// dx/dz
    pub slope_x: f64,
    pub y: f64,
    /// dy/dz
    pub slope_y: f64,
    pub err_x: f64,
    pub err_slope_x: f64,
    pub err_y: f64,
    pub err_slope_y: f64,
    /// Local fit quality reported by the clustering stage
    pub quality: f64,
}

/// Ground truth for one simulated particle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleInfo {
    pub id: ParticleId,
    pub pdg_code: i32,
    pub charge: i32,
    /// Rest mass (GeV)
    pub mass: f64,
    /// Production vertex (m)
    pub position: Vector3<f64>,
    /// Momentum at the vertex (GeV)
    pub momentum: Vector3<f64>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Plane lookup and traversal order.
pub trait Geometry {
    fn plane(&self, id: PlaneId) -> Option<&Plane>;

    /// Neighbouring plane in traversal order. Encodes any detector-specific
    /// skipping; `None` when the sequence is exhausted.
    fn next_plane(&self, id: PlaneId, direction: Direction) -> Option<PlaneId>;

    /// All planes, in any order.
    fn planes(&self) -> &[Plane];

    /// First plane reached when walking from `z` in `direction`, a plane
    /// sitting exactly at `z` included.
    fn first_plane_from(&self, z: f64, direction: Direction) -> Option<PlaneId> {
        let sign = direction.sign();
        self.planes()
            .iter()
            .filter(|p| (p.z - z) * sign >= 0.0)
            .min_by(|a, b| {
                let da = (a.z - z).abs();
                let db = (b.z - z).abs();
                da.total_cmp(&db)
            })
            .map(|p| p.id)
    }
}

/// Candidate measurements per plane.
pub trait ClusterProvider {
    /// Clusters on `plane` usable for a plane of the given orientation.
    fn clusters(&self, plane: PlaneId, orientation: Orientation) -> &[Cluster];
}

/// Ground-truth lookup, only used by the truth seeding policy.
pub trait TruthProvider {
    fn particle(&self, id: ParticleId) -> Option<&ParticleInfo>;
}

impl TruthProvider for [ParticleInfo] {
    fn particle(&self, id: ParticleId) -> Option<&ParticleInfo> {
        self.iter().find(|p| p.id == id)
    }
}

impl TruthProvider for Vec<ParticleInfo> {
    fn particle(&self, id: ParticleId) -> Option<&ParticleInfo> {
        self.as_slice().particle(id)
    }
}
