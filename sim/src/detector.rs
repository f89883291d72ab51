//! Synthetic layered detector and the per-event cluster store.
//!
//! Planes live in an arena indexed by [`PlaneId`]; traversal order is the
//! index order. The orientation of each plane comes from an
//! [`OrientationPattern`].

use kalman_core::{
    Cluster, ClusterId, ClusterProvider, Direction, Geometry, Orientation, ParticleId,
    ParticleInfo, Plane, PlaneId, TruthProvider,
};
use serde::{Deserialize, Serialize};

/// Orientation assigned to plane `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrientationPattern {
    /// V H V H … (or H V H V …)
    Alternating { first: Orientation },
    /// V V H H V V … : stereo doublets
    Doublets { first: Orientation },
    /// Every plane measures the same view
    Uniform(Orientation),
}

impl Default for OrientationPattern {
    fn default() -> Self {
        OrientationPattern::Alternating {
            first: Orientation::Vertical,
        }
    }
}

impl OrientationPattern {
    pub fn orientation_at(&self, index: usize) -> Orientation {
        match *self {
            OrientationPattern::Alternating { first } => {
                if index % 2 == 0 {
                    first
                } else {
                    first.flipped()
                }
            }
            OrientationPattern::Doublets { first } => {
                if (index / 2) % 2 == 0 {
                    first
                } else {
                    first.flipped()
                }
            }
            OrientationPattern::Uniform(o) => o,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detector {
    planes: Vec<Plane>,
}

impl Detector {
    /// `n` planes at `z0, z0 + pitch, …`.
    pub fn equally_spaced(n: u32, z0: f64, pitch: f64, pattern: OrientationPattern) -> Self {
        let planes = (0..n)
            .map(|i| Plane {
                id: PlaneId(i),
                z: z0 + pitch * f64::from(i),
                orientation: pattern.orientation_at(i as usize),
            })
            .collect::<Vec<_>>();
        Self { planes }
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

impl Geometry for Detector {
    fn plane(&self, id: PlaneId) -> Option<&Plane> {
        self.planes.get(id.index())
    }

    fn next_plane(&self, id: PlaneId, direction: Direction) -> Option<PlaneId> {
        let i = match direction {
            Direction::Forward => id.index().checked_add(1)?,
            Direction::Backward => id.index().checked_sub(1)?,
        };
        self.planes.get(i).map(|p| p.id)
    }

    fn planes(&self) -> &[Plane] {
        &self.planes
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Clusters per plane plus the truth particles that produced them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Event {
    clusters: Vec<Vec<Cluster>>,
    pub particles: Vec<ParticleInfo>,
    next_cluster_id: u64,
}

impl Event {
    pub fn new(n_planes: usize) -> Self {
        Self {
            clusters: vec![Vec::new(); n_planes],
            particles: Vec::new(),
            next_cluster_id: 0,
        }
    }

    /// Store `cluster` on `plane`, assigning it a fresh id.
    pub fn add_cluster(&mut self, plane: PlaneId, mut cluster: Cluster) -> Option<ClusterId> {
        let list = self.clusters.get_mut(plane.index())?;
        cluster.id = ClusterId(self.next_cluster_id);
        self.next_cluster_id += 1;
        list.push(cluster);
        Some(cluster.id)
    }

    pub fn clusters_on(&self, plane: PlaneId) -> &[Cluster] {
        self.clusters.get(plane.index()).map_or(&[], Vec::as_slice)
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.iter().map(Vec::len).sum()
    }
}

impl ClusterProvider for Event {
    fn clusters(&self, plane: PlaneId, _orientation: Orientation) -> &[Cluster] {
        self.clusters_on(plane)
    }
}

impl TruthProvider for Event {
    fn particle(&self, id: ParticleId) -> Option<&ParticleInfo> {
        self.particles.particle(id)
    }
}
