//! Fit session: seeds one candidate track, walks it plane by plane, then
//! smooths it.
//!
//! # Lifecycle
//! ```text
//! Manager::new ─ init_from_* ─┬─ step ─┬─ … ─ finish_forward ─ ForwardPass::smooth ─ FittedTrack
//!                             └─ run ──┘
//! ```
//! `finish_forward` consumes the [`Manager`], so the backward pass can only be
//! reached once every forward step is final.
//!
//! # Per-plane step
//! 1. Look up the next plane; its orientation becomes the current one.
//! 2. Propagate the last filtered state by `dz`, with energy loss and process
//!    noise from the material policy.
//! 3. Project into the plane's measurement space.
//! 4. χ² every candidate cluster; accept the smallest below the gate.
//! 5. Kalman update on a match; on a miss the prediction is carried forward
//!    as the filtered state.
//!
//! More than `max_consecutive_misses` misses in a row abandon the track
//! ([`FitError::TrackLost`]). `max_steps` truncates the walk; the truncated
//! track is still smoothed and flagged in the diagnostics.

use crate::{
    error::{FitError, Result},
    gating::{self, BestMatch, GateResult, CHI2_99},
    geometry::{ClusterProvider, Geometry, Orientation, ParticleInfo, Plane, TruthProvider},
    kf::{HelixKalmanFilter, KalmanFilter, KfUpdateResult, PredictResult},
    material::{Material, MaterialModel},
    observation::{predict_measurement, Measurement, Prediction},
    seeding::{self, SeedConfig, SeedPoint},
    smoother::smooth_track,
    track::{Track, TrackStateStage, TrackStep},
    types::{ClusterId, Direction, ParticleId, PlaneId, State},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Muon rest mass (GeV), the default mass hypothesis.
pub const MUON_MASS: f64 = 0.105_658_375_5;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration of one fit session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Magnetic field along x (T)
    pub field_tesla: f64,
    /// χ² gate. Default: CHI2_99[2] for 2D measurements.
    pub gate_threshold: f64,
    /// Consecutive missed planes tolerated before the track is abandoned
    pub max_consecutive_misses: usize,
    /// Upper bound on forward steps
    pub max_steps: usize,
    /// Lower bound on every measurement resolution (keeps R invertible)
    pub resolution_floor: f64,
    /// Mass hypothesis when the seed does not provide one (GeV)
    pub default_mass: f64,
    pub direction: Direction,
    pub material: MaterialModel,
    pub seed: SeedConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            field_tesla: 0.6,
            gate_threshold: CHI2_99[2],
            max_consecutive_misses: 3,
            max_steps: 1000,
            resolution_floor: 1e-6,
            default_mass: MUON_MASS,
            direction: Direction::Forward,
            material: MaterialModel::Vacuum,
            seed: SeedConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// What a single [`Manager::step`] did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    Matched { plane: PlaneId, cluster: ClusterId, chi2: f64 },
    Missed { plane: PlaneId },
    /// No further plane in the traversal direction
    Exhausted,
    /// `max_steps` reached
    StepLimit,
}

/// Summary of a completed fit.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub total_chi2: f64,
    /// 2 per matched plane minus the 5 helix parameters
    pub ndf: i64,
    pub matched: usize,
    pub missed: usize,
    pub longest_miss_streak: usize,
    /// The walk stopped at `max_steps` before the geometry was exhausted
    pub truncated: bool,
}

impl FitDiagnostics {
    pub fn from_track(track: &Track, longest_miss_streak: usize, truncated: bool) -> Self {
        let matched = track.matched_count();
        Self {
            total_chi2: track.total_chi2(),
            ndf: 2 * matched as i64 - 5,
            matched,
            missed: track.missed_count(),
            longest_miss_streak,
            truncated,
        }
    }

    /// χ²/ndf, `None` while the fit is under-constrained.
    pub fn chi2_per_ndf(&self) -> Option<f64> {
        (self.ndf > 0).then(|| self.total_chi2 / self.ndf as f64)
    }
}

/// Forward pass done, not smoothed yet.
#[derive(Clone, Debug)]
pub struct ForwardPass {
    track: Track,
    longest_miss_streak: usize,
    truncated: bool,
}

impl ForwardPass {
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Run the backward pass over every step.
    pub fn smooth(mut self) -> Result<FittedTrack> {
        smooth_track(&mut self.track)?;
        let diagnostics =
            FitDiagnostics::from_track(&self.track, self.longest_miss_streak, self.truncated);
        debug!(
            steps = self.track.len(),
            chi2 = diagnostics.total_chi2,
            matched = diagnostics.matched,
            missed = diagnostics.missed,
            "track smoothed"
        );
        Ok(FittedTrack {
            track: self.track,
            diagnostics,
        })
    }
}

/// Completed fit handed back to the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FittedTrack {
    pub track: Track,
    pub diagnostics: FitDiagnostics,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Stateful driver of one fit. Collaborators are borrowed read-only, so one
/// geometry / event can back many managers at once.
pub struct Manager<'a, G, C, M> {
    pub config: FitConfig,
    geometry: &'a G,
    clusters: &'a C,
    material: &'a M,
    kf: HelixKalmanFilter,
    track: Track,
    direction: Direction,
    current_stage: TrackStateStage,
    current_orientation: Option<Orientation>,
    current_z: f64,
    current_state: Option<State>,
    next_plane: Option<PlaneId>,
    mass: f64,
    consecutive_misses: usize,
    longest_miss_streak: usize,
    steps_taken: usize,
    truncated: bool,
}

impl<'a, G, C, M> Manager<'a, G, C, M>
where
    G: Geometry,
    C: ClusterProvider,
    M: Material,
{
    pub fn new(config: FitConfig, geometry: &'a G, clusters: &'a C, material: &'a M) -> Self {
        let kf = HelixKalmanFilter::new(config.field_tesla);
        let direction = config.direction;
        let mass = config.default_mass;
        Self {
            config,
            geometry,
            clusters,
            material,
            kf,
            track: Track::new(direction),
            direction,
            current_stage: TrackStateStage::Prediction,
            current_orientation: None,
            current_z: 0.0,
            current_state: None,
            next_plane: None,
            mass,
            consecutive_misses: 0,
            longest_miss_streak: 0,
            steps_taken: 0,
            truncated: false,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn stage(&self) -> TrackStateStage {
        self.current_stage
    }

    pub fn orientation(&self) -> Option<Orientation> {
        self.current_orientation
    }

    /// Latest filtered state, `None` before seeding.
    pub fn current_state(&self) -> Option<&State> {
        self.current_state.as_ref()
    }

    pub fn current_z(&self) -> f64 {
        self.current_z
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn kalman_filter(&self) -> &HelixKalmanFilter {
        &self.kf
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Start from an explicit state at `z`. The first plane visited is the
    /// first one at or beyond `z` in the traversal direction.
    pub fn init_from_state(&mut self, state: State, z: f64, mass: f64) {
        let next = self.geometry.first_plane_from(z, self.direction);
        self.start(state, z, mass, next);
    }

    /// Seed from a truth particle at its production vertex.
    pub fn init_from_truth(&mut self, particle: &ParticleInfo) -> Result<()> {
        let sv = seeding::state_from_truth(particle, &self.kf.propagator)?;
        let cov = seeding::seed_covariance(&sv, &self.config.seed);
        let mass = if particle.mass > 0.0 {
            particle.mass
        } else {
            self.config.default_mass
        };
        debug!(particle = %particle.id, ?sv, "seeded from truth");
        self.init_from_state(State::new(sv, cov), particle.position.z, mass);
        Ok(())
    }

    /// Seed from the particle `id` of a truth collaborator.
    pub fn init_from_truth_provider<T>(&mut self, truth: &T, id: ParticleId) -> Result<()>
    where
        T: TruthProvider + ?Sized,
    {
        let particle = truth.particle(id).ok_or(FitError::UnknownParticle(id))?;
        self.init_from_truth(particle)
    }

    /// Seed from measured space points, without truth. The state is anchored
    /// on the first point in the traversal direction and the walk resumes on
    /// the plane after it.
    pub fn init_from_seed(&mut self, points: &[SeedPoint]) -> Result<()> {
        let (sv, z) = seeding::circle_seed(points, self.direction)?;
        let cov = seeding::seed_covariance(&sv, &self.config.seed);
        let next = match self.plane_at(z) {
            Some(id) => self.geometry.next_plane(id, self.direction),
            None => self.geometry.first_plane_from(z, self.direction),
        };
        debug!(points = points.len(), z, ?sv, "seeded from points");
        self.start(State::new(sv, cov), z, self.config.default_mass, next);
        Ok(())
    }

    /// Walk the truth trajectory through the first planes and collect the
    /// cluster nearest to it on each non-empty plane.
    pub fn find_seed_points(&self, particle: &ParticleInfo) -> Result<Vec<SeedPoint>> {
        let mut sv = seeding::state_from_truth(particle, &self.kf.propagator)?;
        let mut z = particle.position.z;
        let wanted = self.config.seed.n_points;
        let mut points = Vec::with_capacity(wanted);
        let mut plane_id = self.geometry.first_plane_from(z, self.direction);
        let mut inspected = 0;

        while let Some(id) = plane_id {
            if points.len() >= wanted || inspected >= self.config.seed.max_search_planes {
                break;
            }
            let plane = self.geometry.plane(id).ok_or(FitError::UnknownPlane(id))?;
            sv = self
                .kf
                .propagator
                .propagate_state(&sv, plane.z - z, 0.0, particle.mass)?;
            z = plane.z;
            let candidates = self.clusters.clusters(id, plane.orientation);
            if let Some(c) = seeding::closest_cluster(candidates, sv.x(), sv.y()) {
                points.push(SeedPoint::from_cluster(c, plane.z));
            }
            inspected += 1;
            plane_id = self.geometry.next_plane(id, self.direction);
        }
        Ok(points)
    }

    /// Plane nearest to `z` that carries at least one cluster.
    pub fn closest_nonempty_plane(&self, z: f64) -> Option<PlaneId> {
        self.geometry
            .planes()
            .iter()
            .filter(|p| !self.clusters.clusters(p.id, p.orientation).is_empty())
            .min_by(|a, b| (a.z - z).abs().total_cmp(&(b.z - z).abs()))
            .map(|p| p.id)
    }

    fn plane_at(&self, z: f64) -> Option<PlaneId> {
        self.geometry
            .planes()
            .iter()
            .find(|p| (p.z - z).abs() <= 1e-12 * (1.0 + z.abs()))
            .map(|p| p.id)
    }

    fn start(&mut self, state: State, z: f64, mass: f64, next: Option<PlaneId>) {
        self.track = Track::new(self.direction);
        self.current_stage = TrackStateStage::Prediction;
        self.current_orientation = None;
        self.current_z = z;
        self.current_state = Some(state);
        self.next_plane = next;
        self.mass = mass;
        self.consecutive_misses = 0;
        self.longest_miss_streak = 0;
        self.steps_taken = 0;
        self.truncated = false;
    }

    // ------------------------------------------------------------------
    // Building blocks of one step
    // ------------------------------------------------------------------

    /// Make `plane`'s orientation the current one. H is rebuilt for every
    /// prediction, so a flip needs no further bookkeeping.
    pub fn set_next_orientation(&mut self, plane: &Plane) {
        if self.current_orientation != Some(plane.orientation) {
            debug!(plane = %plane.id, orientation = ?plane.orientation, "orientation switch");
        }
        self.current_orientation = Some(plane.orientation);
    }

    /// Predict `state` a step `dz` ahead through the material.
    pub fn propagate(&self, state: &State, dz: f64) -> Result<PredictResult> {
        let de = self.material.energy_loss(self.current_z, dz);
        let noise =
            self.material
                .process_noise(&state.vector, dz, self.mass, &self.kf.propagator);
        self.kf.predict(state, dz, de, self.mass, &noise)
    }

    /// Project `predicted` into the current plane's measurement space.
    pub fn get_prediction(&self, predicted: &State) -> Result<Prediction> {
        let orientation = self
            .current_orientation
            .ok_or(FitError::NumericalFailure("no orientation selected"))?;
        predict_measurement(orientation, predicted)
    }

    pub fn eval_chi2(&self, measurement: &Measurement, prediction: &Prediction) -> Result<GateResult> {
        gating::eval_chi2(measurement, prediction, self.config.gate_threshold)
    }

    /// Best gated candidate on `plane` for the current orientation.
    pub fn find_best_match(&self, plane: PlaneId, prediction: &Prediction) -> Result<Option<BestMatch>> {
        let Some(orientation) = self.current_orientation else {
            return Ok(None);
        };
        gating::find_best_match(
            self.clusters.clusters(plane, orientation),
            orientation,
            prediction,
            self.config.resolution_floor,
            self.config.gate_threshold,
        )
    }

    /// Kalman update of `predicted` with the accepted measurement.
    pub fn filter(
        &self,
        predicted: &State,
        best: &BestMatch,
        prediction: &Prediction,
    ) -> Result<KfUpdateResult> {
        self.kf.update(predicted, &best.measurement, prediction)
    }

    // ------------------------------------------------------------------
    // Forward pass
    // ------------------------------------------------------------------

    /// Advance to the next plane.
    pub fn step(&mut self) -> Result<StepOutcome> {
        let state = self.current_state.ok_or(FitError::NotSeeded)?;
        let Some(plane_id) = self.next_plane else {
            return Ok(StepOutcome::Exhausted);
        };
        if self.steps_taken >= self.config.max_steps {
            if !self.truncated {
                warn!(steps = self.steps_taken, "step limit reached, track truncated");
            }
            self.truncated = true;
            return Ok(StepOutcome::StepLimit);
        }
        let plane = *self
            .geometry
            .plane(plane_id)
            .ok_or(FitError::UnknownPlane(plane_id))?;

        self.set_next_orientation(&plane);
        self.current_stage = TrackStateStage::Prediction;
        let predicted = self.propagate(&state, plane.z - self.current_z)?;
        let prediction = self.get_prediction(&predicted.state)?;

        self.current_stage = TrackStateStage::Filtering;
        let (step, outcome) = match self.find_best_match(plane_id, &prediction)? {
            Some(best) => {
                let updated = self.filter(&predicted.state, &best, &prediction)?;
                let cluster = self.clusters.clusters(plane_id, plane.orientation)[best.index];
                self.consecutive_misses = 0;
                debug!(plane = %plane_id, cluster = %cluster.id, chi2 = updated.chi2, "matched");
                let step = TrackStep::matched(
                    plane_id,
                    plane.orientation,
                    plane.z,
                    (cluster.id, cluster.x, cluster.y),
                    predicted.state,
                    updated.state,
                    predicted.propagator,
                    updated.innovation,
                    updated.chi2,
                );
                let outcome = StepOutcome::Matched {
                    plane: plane_id,
                    cluster: cluster.id,
                    chi2: updated.chi2,
                };
                (step, outcome)
            }
            None => {
                self.consecutive_misses += 1;
                self.longest_miss_streak = self.longest_miss_streak.max(self.consecutive_misses);
                debug!(plane = %plane_id, misses = self.consecutive_misses, "missed plane");
                if self.consecutive_misses > self.config.max_consecutive_misses {
                    warn!(plane = %plane_id, misses = self.consecutive_misses, "track lost");
                    return Err(FitError::TrackLost {
                        plane: plane_id,
                        misses: self.consecutive_misses,
                    });
                }
                let step = TrackStep::missed(
                    plane_id,
                    plane.orientation,
                    plane.z,
                    predicted.state,
                    predicted.propagator,
                );
                (step, StepOutcome::Missed { plane: plane_id })
            }
        };

        self.current_state = Some(*step.filtered());
        self.current_z = plane.z;
        self.track.push(step);
        self.steps_taken += 1;
        self.next_plane = self.geometry.next_plane(plane_id, self.direction);
        Ok(outcome)
    }

    /// Close the forward pass. Consumes the session so nothing can be appended
    /// once smoothing becomes possible. A pass that never reached a plane is a
    /// [`FitError::SeedFailure`].
    pub fn finish_forward(self) -> Result<ForwardPass> {
        if self.current_state.is_none() {
            return Err(FitError::NotSeeded);
        }
        if self.track.is_empty() {
            warn!(z = self.current_z, "no plane reached from the seed");
            return Err(FitError::SeedFailure("no plane beyond the seed"));
        }
        Ok(ForwardPass {
            track: self.track,
            longest_miss_streak: self.longest_miss_streak,
            truncated: self.truncated,
        })
    }

    /// Step until the geometry or the step budget is exhausted, then smooth.
    pub fn run(mut self) -> Result<FittedTrack> {
        loop {
            match self.step()? {
                StepOutcome::Matched { .. } | StepOutcome::Missed { .. } => {}
                StepOutcome::Exhausted | StepOutcome::StepLimit => break,
            }
        }
        self.finish_forward()?.smooth()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
