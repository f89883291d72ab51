//! Independent fits of many particles in parallel.
//!
//! Every fit borrows the same geometry and cluster collaborators read-only,
//! so the work is split per particle with rayon and needs no locking.

use crate::{
    error::Result,
    geometry::{ClusterProvider, Geometry, ParticleInfo},
    manager::{FitConfig, FittedTrack, Manager},
    types::ParticleId,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How each fit is seeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeedPolicy {
    /// Truth vertex and momentum
    #[default]
    Truth,
    /// Circle through the clusters nearest to the truth trajectory
    Points,
}

/// Outcome of one particle's fit.
#[derive(Debug)]
pub struct BatchFit {
    pub particle: ParticleId,
    pub result: Result<FittedTrack>,
}

/// Fit one particle from scratch.
pub fn fit_particle<G, C>(
    config: &FitConfig,
    geometry: &G,
    clusters: &C,
    particle: &ParticleInfo,
    policy: SeedPolicy,
) -> Result<FittedTrack>
where
    G: Geometry,
    C: ClusterProvider,
{
    let mut manager = Manager::new(config.clone(), geometry, clusters, &config.material);
    match policy {
        SeedPolicy::Truth => manager.init_from_truth(particle)?,
        SeedPolicy::Points => {
            let points = manager.find_seed_points(particle)?;
            manager.init_from_seed(&points)?;
        }
    }
    manager.run()
}

/// Fit every particle in parallel. Results keep the input order.
pub fn fit_all<G, C>(
    config: &FitConfig,
    geometry: &G,
    clusters: &C,
    particles: &[ParticleInfo],
    policy: SeedPolicy,
) -> Vec<BatchFit>
where
    G: Geometry + Sync,
    C: ClusterProvider + Sync,
{
    particles
        .par_iter()
        .map(|particle| {
            let result = fit_particle(config, geometry, clusters, particle, policy);
            if let Err(e) = &result {
                warn!(particle = %particle.id, error = %e, "fit failed");
            }
            BatchFit {
                particle: particle.id,
                result,
            }
        })
        .collect()
}
