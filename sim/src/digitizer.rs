//! Truth hits → clusters.
//!
//! Generates, per plane:
//! - one cluster per truth hit, smeared with Gaussian noise
//! - a miss with probability `1 − efficiency`
//! - Poisson clutter spread uniformly over the active area
//!
//! Clusters carry both views; the reported resolutions are the configured
//! ones even when smearing is off, so the fitter weights them realistically.

use crate::detector::{Detector, Event};
use crate::truth::TruthHit;
use kalman_core::observation::measurement_function;
use kalman_core::{Cluster, ClusterId, Geometry, Orientation, PlaneId};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitizerConfig {
    /// Position resolution (m)
    pub resolution: f64,
    /// Slope resolution
    pub slope_resolution: f64,
    /// Apply Gaussian smearing with the above resolutions
    pub smear: bool,
    /// Probability that a crossing yields a cluster
    pub efficiency: f64,
    /// Mean number of clutter clusters per plane
    pub clutter_mean: f64,
    /// Half-width of the square active area (m)
    pub half_width: f64,
    /// Planes that never yield a cluster
    pub dead_planes: Vec<PlaneId>,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            resolution: 2e-4,
            slope_resolution: 2e-3,
            smear: true,
            efficiency: 1.0,
            clutter_mean: 0.0,
            half_width: 1.0,
            dead_planes: Vec::new(),
        }
    }
}

pub struct Digitizer {
    pub config: DigitizerConfig,
    rng: ChaCha8Rng,
}

impl Digitizer {
    pub fn new(config: DigitizerConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    fn gaussian(&mut self, sigma: f64) -> f64 {
        if !self.config.smear || sigma <= 0.0 {
            return 0.0;
        }
        Normal::new(0.0, sigma).map_or(0.0, |n| n.sample(&mut self.rng))
    }

    /// Noise-free cluster at the truth crossing.
    pub fn exact_cluster(&self, hit: &TruthHit) -> Cluster {
        let [x, slope_x] = measurement_function(Orientation::Vertical, &hit.state)
            .map_or([hit.state.x(), 0.0], |m| [m[0], m[1]]);
        let [y, slope_y] = measurement_function(Orientation::Horizontal, &hit.state)
            .map_or([hit.state.y(), 0.0], |m| [m[0], m[1]]);
        Cluster {
            id: ClusterId(0),
            x,
            slope_x,
            y,
            slope_y,
            err_x: self.config.resolution,
            err_slope_x: self.config.slope_resolution,
            err_y: self.config.resolution,
            err_slope_y: self.config.slope_resolution,
            quality: 1.0,
        }
    }

    /// Add the clusters of `hits` and the clutter of every plane to `event`.
    pub fn digitize(&mut self, detector: &Detector, hits: &[TruthHit], event: &mut Event) {
        let mut produced = 0usize;
        for hit in hits {
            if self.config.dead_planes.contains(&hit.plane) {
                continue;
            }
            if self.rng.gen::<f64>() > self.config.efficiency {
                continue;
            }
            let mut c = self.exact_cluster(hit);
            let (r, s) = (self.config.resolution, self.config.slope_resolution);
            c.x += self.gaussian(r);
            c.y += self.gaussian(r);
            c.slope_x += self.gaussian(s);
            c.slope_y += self.gaussian(s);
            if event.add_cluster(hit.plane, c).is_some() {
                produced += 1;
            }
        }

        let mut clutter = 0usize;
        if self.config.clutter_mean > 0.0 {
            if let Ok(poisson) = Poisson::new(self.config.clutter_mean) {
                for plane in detector.planes() {
                    let n = poisson.sample(&mut self.rng) as usize;
                    for _ in 0..n {
                        let c = self.clutter_cluster();
                        event.add_cluster(plane.id, c);
                        clutter += 1;
                    }
                }
            }
        }
        debug!(signal = produced, clutter, "digitized");
    }

    fn clutter_cluster(&mut self) -> Cluster {
        let w = self.config.half_width;
        let slope = 0.5;
        Cluster {
            id: ClusterId(0),
            x: self.rng.gen_range(-w..w),
            slope_x: self.rng.gen_range(-slope..slope),
            y: self.rng.gen_range(-w..w),
            slope_y: self.rng.gen_range(-slope..slope),
            err_x: self.config.resolution,
            err_slope_x: self.config.slope_resolution,
            err_y: self.config.resolution,
            err_slope_y: self.config.slope_resolution,
            quality: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::OrientationPattern;
    use approx::assert_abs_diff_eq;
    use kalman_core::{ParticleId, StateVector};

    fn hits(det: &Detector) -> Vec<TruthHit> {
        det.planes()
            .iter()
            .map(|p| TruthHit {
                particle: ParticleId(0),
                plane: p.id,
                z: p.z,
                state: StateVector::new(0.01 * p.z, 0.02 * p.z, 0.01, 0.3, 0.1),
            })
            .collect()
    }

    #[test]
    fn exact_clusters_follow_measurement_model() {
        let det = Detector::equally_spaced(4, 0.1, 0.1, OrientationPattern::default());
        let dig = Digitizer::new(DigitizerConfig::default(), 1);
        let h = hits(&det)[2];
        let c = dig.exact_cluster(&h);
        assert_abs_diff_eq!(c.x, h.state.x());
        assert_abs_diff_eq!(c.y, h.state.y());
        assert_abs_diff_eq!(c.slope_x, 0.3 / 0.1f64.cos(), epsilon = 1e-15);
        assert_abs_diff_eq!(c.slope_y, 0.1f64.tan(), epsilon = 1e-15);
        assert_eq!(c.err_x, 2e-4);
    }

    #[test]
    fn dead_planes_and_clutter() {
        let det = Detector::equally_spaced(6, 0.1, 0.1, OrientationPattern::default());
        let config = DigitizerConfig {
            smear: false,
            dead_planes: vec![PlaneId(2)],
            ..Default::default()
        };
        let mut ev = Event::new(det.len());
        Digitizer::new(config, 3).digitize(&det, &hits(&det), &mut ev);
        assert_eq!(ev.n_clusters(), 5);
        assert!(ev.clusters_on(PlaneId(2)).is_empty());

        let noisy = DigitizerConfig {
            clutter_mean: 3.0,
            ..Default::default()
        };
        let mut a = Event::new(det.len());
        let mut b = Event::new(det.len());
        Digitizer::new(noisy.clone(), 9).digitize(&det, &hits(&det), &mut a);
        Digitizer::new(noisy, 9).digitize(&det, &hits(&det), &mut b);
        assert!(a.n_clusters() >= 6);
        assert_eq!(a.n_clusters(), b.n_clusters());
        assert_eq!(a.clusters_on(PlaneId(0)), b.clusters_on(PlaneId(0)));
    }

    #[test]
    fn zero_efficiency_yields_nothing() {
        let det = Detector::equally_spaced(3, 0.1, 0.1, OrientationPattern::default());
        let config = DigitizerConfig {
            efficiency: 0.0,
            ..Default::default()
        };
        let mut ev = Event::new(det.len());
        Digitizer::new(config, 5).digitize(&det, &hits(&det), &mut ev);
        assert_eq!(ev.n_clusters(), 0);
    }
}
