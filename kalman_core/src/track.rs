//! Track: the ordered per-plane steps of one candidate trajectory.

use crate::{
    geometry::Orientation,
    types::{ClusterId, Direction, MeasVec, PlaneId, PropagatorMatrix, State},
};
use serde::{Deserialize, Serialize};

/// Which of the three per-step estimates is addressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStateStage {
    /// Before this plane's measurement
    Prediction,
    /// After this plane's measurement
    Filtering,
    /// After the backward pass over the whole track
    Smoothing,
}

/// One plane crossing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackStep {
    pub plane_id: PlaneId,
    pub orientation: Orientation,
    /// Longitudinal position of the plane
    pub z: f64,
    /// Matched cluster, `None` when the plane was missed
    pub cluster_id: Option<ClusterId>,
    /// Cluster position, or the predicted position on a missed plane
    pub x: f64,
    pub y: f64,
    prediction: State,
    filtered: State,
    smoothed: Option<State>,
    /// J that propagated the previous step (or the seed) into `prediction`
    pub propagator: PropagatorMatrix,
    /// ν = m − h(x̂), `None` on a missed plane
    pub innovation: Option<MeasVec>,
    /// χ² contribution of the matched cluster
    pub chi2: Option<f64>,
}

impl TrackStep {
    /// Step that accepted a cluster.
    #[allow(clippy::too_many_arguments)]
    pub fn matched(
        plane_id: PlaneId,
        orientation: Orientation,
        z: f64,
        cluster: (ClusterId, f64, f64),
        prediction: State,
        filtered: State,
        propagator: PropagatorMatrix,
        innovation: MeasVec,
        chi2: f64,
    ) -> Self {
        let (cluster_id, x, y) = cluster;
        Self {
            plane_id,
            orientation,
            z,
            cluster_id: Some(cluster_id),
            x,
            y,
            prediction,
            filtered,
            smoothed: None,
            propagator,
            innovation: Some(innovation),
            chi2: Some(chi2),
        }
    }

    /// Step on a plane without an acceptable cluster: the prediction is carried
    /// forward as the filtered state.
    pub fn missed(
        plane_id: PlaneId,
        orientation: Orientation,
        z: f64,
        prediction: State,
        propagator: PropagatorMatrix,
    ) -> Self {
        Self {
            plane_id,
            orientation,
            z,
            cluster_id: None,
            x: prediction.vector.x(),
            y: prediction.vector.y(),
            prediction,
            filtered: prediction,
            smoothed: None,
            propagator,
            innovation: None,
            chi2: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.cluster_id.is_some()
    }

    pub fn prediction(&self) -> &State {
        &self.prediction
    }

    pub fn filtered(&self) -> &State {
        &self.filtered
    }

    /// `None` until the backward pass has run.
    pub fn smoothed(&self) -> Option<&State> {
        self.smoothed.as_ref()
    }

    pub fn stage(&self, stage: TrackStateStage) -> Option<&State> {
        match stage {
            TrackStateStage::Prediction => Some(&self.prediction),
            TrackStateStage::Filtering => Some(&self.filtered),
            TrackStateStage::Smoothing => self.smoothed.as_ref(),
        }
    }

    /// Best available estimate: smoothed if present, filtered otherwise.
    pub fn best(&self) -> &State {
        self.smoothed.as_ref().unwrap_or(&self.filtered)
    }

    pub(crate) fn set_smoothed(&mut self, state: State) {
        self.smoothed = Some(state);
    }
}

/// An ordered sequence of plane crossings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Track {
    pub direction: Direction,
    steps: Vec<TrackStep>,
}

impl Track {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            steps: Vec::new(),
        }
    }

    /// Append a step. Steps must advance in the traversal direction.
    pub fn push(&mut self, step: TrackStep) {
        debug_assert!(
            self.steps
                .last()
                .map_or(true, |last| (step.z - last.z) * self.direction.sign() >= 0.0),
            "track steps must be monotonic in z"
        );
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TrackStep] {
        &self.steps
    }

    pub(crate) fn steps_mut(&mut self) -> &mut [TrackStep] {
        &mut self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&TrackStep> {
        self.steps.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackStep> {
        self.steps.iter()
    }

    pub fn matched_count(&self) -> usize {
        self.steps.iter().filter(|s| s.is_matched()).count()
    }

    pub fn missed_count(&self) -> usize {
        self.steps.len() - self.matched_count()
    }

    /// Sum of the χ² contributions of all matched steps.
    pub fn total_chi2(&self) -> f64 {
        self.steps.iter().filter_map(|s| s.chi2).sum()
    }

    /// True once every step carries a smoothed state.
    pub fn is_smoothed(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.smoothed.is_some())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
