//! Scenario definitions.
//!
//! Each scenario is a detector, an event digitized from truth helices and the
//! seeds to fit. All scenarios are deterministic given the same seed.

use crate::{
    detector::{Detector, Event, OrientationPattern},
    digitizer::{Digitizer, DigitizerConfig},
    truth::{particle_from_state, trace, TruthHit},
};
use kalman_core::batch::{fit_particle, BatchFit, SeedPolicy};
use kalman_core::manager::MUON_MASS;
use kalman_core::material::{MaterialModel, UniformMaterial};
use kalman_core::metrics::{truth_at, FitMetrics};
use kalman_core::propagation::HelixPropagator;
use kalman_core::{
    FitConfig, FitError, FittedTrack, Manager, ParticleId, PlaneId, State, StateVector,
    TruthProvider,
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Which pre-defined scenario to load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// Near-straight track, exact clusters, 10 alternating planes
    Straight,
    /// Curved track (R = 100 m) seeded with a 20 % curvature error
    Curved,
    /// Straight track with plane 5 dead
    MissingLayer,
    /// Curved track with a nearby decoy cluster on plane 5
    Ambiguous,
    /// 25 particles, material, smearing, inefficiency and clutter
    Noisy,
    /// Curved tracks seeded from clusters only
    PointSeeded,
}

/// How a track of the scenario is seeded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SeedSpec {
    Truth,
    Points,
    /// Explicit helix parameters at `z`; covariance from the seed config
    State { vector: StateVector, z: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackSeed {
    pub particle: ParticleId,
    pub seed: SeedSpec,
}

/// A fully configured fitting scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub config: FitConfig,
    pub detector: Detector,
    pub event: Event,
    pub hits: Vec<TruthHit>,
    pub seeds: Vec<TrackSeed>,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Straight => Self::straight(seed),
            ScenarioKind::Curved => Self::curved(seed),
            ScenarioKind::MissingLayer => Self::missing_layer(seed),
            ScenarioKind::Ambiguous => Self::ambiguous(seed),
            ScenarioKind::Noisy => Self::noisy(seed),
            ScenarioKind::PointSeeded => Self::point_seeded(seed),
        }
    }

    fn empty(name: &str, seed: u64, config: FitConfig, detector: Detector) -> Self {
        let event = Event::new(detector.len());
        Self {
            name: name.into(),
            seed,
            config,
            detector,
            event,
            hits: Vec::new(),
            seeds: Vec::new(),
        }
    }

    fn propagator(&self) -> HelixPropagator {
        HelixPropagator::new(self.config.field_tesla)
    }

    /// Register a particle starting at `sv` (at `z`) and trace it.
    fn add_particle(
        &mut self,
        id: ParticleId,
        sv: StateVector,
        z: f64,
        rng: Option<&mut ChaCha8Rng>,
    ) {
        let prop = self.propagator();
        self.event
            .particles
            .push(particle_from_state(id, &sv, z, MUON_MASS, &prop));
        let hits = trace(
            &self.detector,
            &prop,
            &self.config.material,
            id,
            sv,
            z,
            MUON_MASS,
            rng,
        );
        self.hits.extend(hits);
    }

    fn digitize(&mut self, config: DigitizerConfig, seed: u64) {
        let mut digitizer = Digitizer::new(config, seed);
        digitizer.digitize(&self.detector, &self.hits, &mut self.event);
    }

    fn ten_planes() -> Detector {
        Detector::equally_spaced(10, 0.1, 0.1, OrientationPattern::default())
    }

    fn exact_digitizer(resolution: f64, slope_resolution: f64) -> DigitizerConfig {
        DigitizerConfig {
            resolution,
            slope_resolution,
            smear: false,
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Straight
    // -----------------------------------------------------------------------
    fn straight(seed: u64) -> Self {
        Self::near_straight(seed, 1e-6)
    }

    /// Straight-line-like track (tanλ = 0.3, φ = 0) with curvature `inv_radius`,
    /// exact clusters, seeded with the truth.
    pub fn near_straight(seed: u64, inv_radius: f64) -> Self {
        let mut s = Self::empty("straight", seed, FitConfig::default(), Self::ten_planes());
        let sv = StateVector::new(0.0, 0.0, inv_radius, 0.3, 0.0);
        s.add_particle(ParticleId(0), sv, 0.0, None);
        s.digitize(Self::exact_digitizer(0.0, 0.0), seed);
        s.seeds.push(TrackSeed {
            particle: ParticleId(0),
            seed: SeedSpec::State { vector: sv, z: 0.0 },
        });
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Curved
    // -----------------------------------------------------------------------
    fn curved(seed: u64) -> Self {
        let mut s = Self::empty("curved", seed, FitConfig::default(), Self::ten_planes());
        let sv = StateVector::new(0.0, 0.0, 0.01, 0.3, 0.0);
        s.add_particle(ParticleId(0), sv, 0.0, None);
        s.digitize(Self::exact_digitizer(1e-4, 1e-3), seed);
        let off = StateVector::new(0.0, 0.0, 0.012, 0.3, 0.0);
        s.seeds.push(TrackSeed {
            particle: ParticleId(0),
            seed: SeedSpec::State { vector: off, z: 0.0 },
        });
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Missing layer
    // -----------------------------------------------------------------------
    fn missing_layer(seed: u64) -> Self {
        let mut s = Self::empty("missing_layer", seed, FitConfig::default(), Self::ten_planes());
        let sv = StateVector::new(0.0, 0.0, 1e-6, 0.3, 0.0);
        s.add_particle(ParticleId(0), sv, 0.0, None);
        s.digitize(
            DigitizerConfig {
                dead_planes: vec![PlaneId(5)],
                ..Self::exact_digitizer(0.0, 0.0)
            },
            seed,
        );
        s.seeds.push(TrackSeed {
            particle: ParticleId(0),
            seed: SeedSpec::State { vector: sv, z: 0.0 },
        });
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 4: Ambiguous
    // -----------------------------------------------------------------------
    fn ambiguous(seed: u64) -> Self {
        let mut s = Self::empty("ambiguous", seed, FitConfig::default(), Self::ten_planes());
        let sv = StateVector::new(0.0, 0.0, 0.01, 0.3, 0.0);
        s.add_particle(ParticleId(0), sv, 0.0, None);
        let config = Self::exact_digitizer(1e-4, 1e-3);
        let digitizer = Digitizer::new(config.clone(), seed);
        s.digitize(config, seed);

        // Decoy two resolutions away from the crossing, inside the gate
        if let Some(hit) = s.hits.iter().find(|h| h.plane == PlaneId(5)) {
            let mut decoy = digitizer.exact_cluster(hit);
            decoy.x += 2e-4;
            decoy.y += 2e-4;
            s.event.add_cluster(PlaneId(5), decoy);
        }
        s.seeds.push(TrackSeed {
            particle: ParticleId(0),
            seed: SeedSpec::State { vector: sv, z: 0.0 },
        });
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 5: Noisy
    // -----------------------------------------------------------------------
    fn noisy(seed: u64) -> Self {
        let config = FitConfig {
            material: MaterialModel::Uniform(UniformMaterial::default()),
            ..Default::default()
        };
        let detector = Detector::equally_spaced(20, 0.05, 0.05, OrientationPattern::default());
        let mut s = Self::empty("noisy", seed, config, detector);
        let prop = s.propagator();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        for i in 0..25u64 {
            let charge = if rng.gen::<bool>() { 1 } else { -1 };
            let p_t = rng.gen_range(0.5..5.0);
            let sv = StateVector::new(
                rng.gen_range(-0.01..0.01),
                rng.gen_range(-0.01..0.01),
                prop.inverse_radius_from_momentum(charge, p_t),
                rng.gen_range(-0.3..0.3),
                rng.gen_range(-0.3..0.3),
            );
            s.add_particle(ParticleId(i), sv, 0.0, Some(&mut rng));
            s.seeds.push(TrackSeed {
                particle: ParticleId(i),
                seed: SeedSpec::Truth,
            });
        }
        s.digitize(
            DigitizerConfig {
                efficiency: 0.97,
                clutter_mean: 2.0,
                half_width: 0.5,
                ..Default::default()
            },
            seed.wrapping_add(1),
        );
        s
    }

    // -----------------------------------------------------------------------
    // Scenario 6: Point seeded
    // -----------------------------------------------------------------------
    fn point_seeded(seed: u64) -> Self {
        let mut s = Self::empty("point_seeded", seed, FitConfig::default(), Self::ten_planes());
        let tracks = [(0.2, 0.1, 0.05), (-0.5, -0.2, -0.1), (0.05, 0.0, 0.2)];
        for (i, &(rho, tan_lambda, phi)) in tracks.iter().enumerate() {
            let id = ParticleId(i as u64);
            s.add_particle(id, StateVector::new(0.0, 0.0, rho, tan_lambda, phi), 0.0, None);
            s.seeds.push(TrackSeed {
                particle: id,
                seed: SeedSpec::Points,
            });
        }
        s.digitize(
            DigitizerConfig {
                smear: false,
                ..Default::default()
            },
            seed,
        );
        s
    }

    // -----------------------------------------------------------------------
    // Fitting
    // -----------------------------------------------------------------------

    /// Fit one seed against the scenario's event.
    pub fn fit_seed(&self, seed: &TrackSeed) -> kalman_core::Result<FittedTrack> {
        let particle = self
            .event
            .particle(seed.particle)
            .ok_or(FitError::UnknownParticle(seed.particle))?;
        let policy = match &seed.seed {
            SeedSpec::Truth => SeedPolicy::Truth,
            SeedSpec::Points => SeedPolicy::Points,
            SeedSpec::State { vector, z } => {
                let mut manager = Manager::new(
                    self.config.clone(),
                    &self.detector,
                    &self.event,
                    &self.config.material,
                );
                let cov = kalman_core::seeding::seed_covariance(vector, &self.config.seed);
                manager.init_from_state(State::new(*vector, cov), *z, particle.mass);
                return manager.run();
            }
        };
        fit_particle(&self.config, &self.detector, &self.event, particle, policy)
    }

    /// Fit every seed in parallel; results keep the seed order.
    pub fn fit(&self) -> Vec<BatchFit> {
        self.seeds
            .par_iter()
            .map(|seed| {
                let result = self.fit_seed(seed);
                if let Err(e) = &result {
                    warn!(scenario = %self.name, particle = %seed.particle, error = %e, "fit failed");
                }
                BatchFit {
                    particle: seed.particle,
                    result,
                }
            })
            .collect()
    }

    /// True helix of `particle` on `plane`.
    pub fn truth_on(&self, particle: ParticleId, plane: PlaneId) -> Option<&TruthHit> {
        self.hits
            .iter()
            .find(|h| h.particle == particle && h.plane == plane)
    }

    /// Compare fits with truth at each track's first plane.
    pub fn evaluate(&self, fits: &[BatchFit]) -> FitMetrics {
        let prop = self.propagator();
        fits.iter()
            .map(|fit| self.evaluate_fit(fit, &prop))
            .fold(FitMetrics::default(), |mut total, one| {
                total.merge(&one);
                total
            })
    }

    fn evaluate_fit(&self, fit: &BatchFit, prop: &HelixPropagator) -> FitMetrics {
        let mut metrics = FitMetrics::default();
        match &fit.result {
            Ok(fitted) => {
                let Some(first) = fitted.track.steps().first() else {
                    return metrics;
                };
                let truth = match self.truth_on(fit.particle, first.plane_id) {
                    Some(hit) => Some(hit.state),
                    None => self
                        .event
                        .particle(fit.particle)
                        .and_then(|p| truth_at(p, prop, first.z).ok()),
                };
                if let Some(truth) = truth {
                    metrics.accumulate(fitted, &truth);
                }
            }
            Err(e) => metrics.record_failure(e),
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_are_deterministic() {
        let a = Scenario::build(ScenarioKind::Noisy, 11);
        let b = Scenario::build(ScenarioKind::Noisy, 11);
        assert_eq!(a.hits, b.hits);
        assert_eq!(a.event.n_clusters(), b.event.n_clusters());
        assert_eq!(a.seeds.len(), 25);
    }

    #[test]
    fn every_scenario_builds_clusters() {
        for kind in [
            ScenarioKind::Straight,
            ScenarioKind::Curved,
            ScenarioKind::MissingLayer,
            ScenarioKind::Ambiguous,
            ScenarioKind::PointSeeded,
        ] {
            let s = Scenario::build(kind.clone(), 1);
            assert!(s.event.n_clusters() >= 9, "{kind:?}");
            assert!(!s.seeds.is_empty());
        }
    }

    #[test]
    fn ambiguous_has_two_candidates_on_plane_five() {
        let s = Scenario::build(ScenarioKind::Ambiguous, 1);
        assert_eq!(s.event.clusters_on(PlaneId(5)).len(), 2);
        assert_eq!(s.event.clusters_on(PlaneId(4)).len(), 1);
    }

    #[test]
    fn evaluation_counts_failures_and_fits() {
        let s = Scenario::build(ScenarioKind::PointSeeded, 3);
        let mut fits = s.fit();
        fits.push(BatchFit {
            particle: ParticleId(7),
            result: Err(FitError::TrackLost {
                plane: PlaneId(4),
                misses: 4,
            }),
        });
        let metrics = s.evaluate(&fits);
        assert_eq!(metrics.n_fits, 4);
        assert_eq!(metrics.n_converged, 3);
        assert_eq!(metrics.n_lost, 1);
        assert!(metrics.matched_planes >= 21);
    }

    #[test]
    fn unknown_particle_is_reported() {
        let s = Scenario::build(ScenarioKind::Straight, 1);
        let bad = TrackSeed {
            particle: ParticleId(99),
            seed: SeedSpec::Truth,
        };
        assert!(matches!(
            s.fit_seed(&bad),
            Err(FitError::UnknownParticle(ParticleId(99)))
        ));
    }
}
