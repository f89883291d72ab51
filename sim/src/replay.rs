//! Replay: serialize/deserialize recorded events for offline refits.

use crate::detector::{Detector, Event};
use crate::scenarios::{Scenario, TrackSeed};
use crate::truth::TruthHit;
use kalman_core::FitConfig;
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Everything needed to refit a scenario without regenerating it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayLog {
    pub scenario_name: String,
    pub seed: u64,
    pub config: FitConfig,
    pub detector: Detector,
    pub event: Event,
    /// Truth crossings, for evaluating the refit
    pub hits: Vec<TruthHit>,
    pub seeds: Vec<TrackSeed>,
}

impl From<&Scenario> for ReplayLog {
    fn from(s: &Scenario) -> Self {
        Self {
            scenario_name: s.name.clone(),
            seed: s.seed,
            config: s.config.clone(),
            detector: s.detector.clone(),
            event: s.event.clone(),
            hits: s.hits.clone(),
            seeds: s.seeds.clone(),
        }
    }
}

impl From<ReplayLog> for Scenario {
    fn from(log: ReplayLog) -> Self {
        Self {
            name: log.scenario_name,
            seed: log.seed,
            config: log.config,
            detector: log.detector,
            event: log.event,
            hits: log.hits,
            seeds: log.seeds,
        }
    }
}

/// Save a replay log to a JSON file.
pub fn save_replay(log: &ReplayLog, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, log)?;
    Ok(())
}

/// Load a replay log from a JSON file.
pub fn load_replay(path: &Path) -> anyhow::Result<ReplayLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let log: ReplayLog = serde_json::from_reader(reader)?;
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::ScenarioKind;
    use kalman_core::ClusterProvider;
    use kalman_core::{Orientation, PlaneId};

    #[test]
    fn replay_file_preserves_the_event() {
        let scenario = Scenario::build(ScenarioKind::Ambiguous, 5);
        let path = std::env::temp_dir().join(format!("helixfit_replay_{}.json", std::process::id()));
        save_replay(&ReplayLog::from(&scenario), &path).unwrap();
        let log = load_replay(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(log.scenario_name, "ambiguous");
        assert_eq!(log.seeds, scenario.seeds);
        assert_eq!(log.event.n_clusters(), scenario.event.n_clusters());
        assert_eq!(log.hits, scenario.hits);
        assert_eq!(log.config, scenario.config);
        assert_eq!(
            log.event.clusters(PlaneId(5), Orientation::Horizontal),
            scenario.event.clusters_on(PlaneId(5))
        );

        let refit = Scenario::from(log).fit();
        let original = scenario.fit();
        let a = refit[0].result.as_ref().unwrap();
        let b = original[0].result.as_ref().unwrap();
        assert_eq!(a.diagnostics, b.diagnostics);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_replay(Path::new("/nonexistent/replay.json")).is_err());
    }
}
