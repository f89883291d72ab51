//! `sim` — Synthetic layered tracker: planes, helix truth, digitized clusters, replay.

pub mod detector;
pub mod digitizer;
pub mod replay;
pub mod scenarios;
pub mod truth;

pub use detector::{Detector, Event, OrientationPattern};
pub use digitizer::{Digitizer, DigitizerConfig};
pub use replay::{load_replay, save_replay, ReplayLog};
pub use scenarios::{Scenario, ScenarioKind, SeedSpec, TrackSeed};
pub use truth::{particle_from_state, trace, TruthHit};
