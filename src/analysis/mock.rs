use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{AnalysisClient, AnalysisResult, Severity};
use crate::clip::ClipArtifact;

const CATALOG: &[(&str, &str, Severity)] = &[
    (
        "Person walking normally",
        "Normal pedestrian activity observed",
        Severity::Informational,
    ),
    (
        "Person collapsed on ground",
        "Individual appears to have fallen and not moving",
        Severity::Emergency,
    ),
    (
        "Vehicle passing by",
        "Standard traffic flow observed",
        Severity::Informational,
    ),
    (
        "Person lying motionless",
        "Individual on ground showing no movement",
        Severity::Emergency,
    ),
    (
        "Normal street activity",
        "Regular pedestrian and vehicle movement",
        Severity::Informational,
    ),
];

/// Offline analysis: picks a random canned result, ignoring the clip.
pub struct MockAnalysisClient {
    rng: StdRng,
}

impl MockAnalysisClient {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence of results.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Every result the mock can return.
    pub fn catalog() -> Vec<AnalysisResult> {
        CATALOG
            .iter()
            .map(|(title, description, severity)| AnalysisResult::new(*title, *description, *severity))
            .collect()
    }
}

impl Default for MockAnalysisClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisClient for MockAnalysisClient {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn analyze(&mut self, _clip: &ClipArtifact) -> Result<AnalysisResult> {
        let (title, description, severity) = CATALOG
            .choose(&mut self.rng)
            .ok_or_else(|| anyhow!("mock catalog is empty"))?;
        let result = AnalysisResult::new(*title, *description, *severity);
        log::info!("mock analysis result: {} ({})", result.title, result.severity);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::SystemTime;

    fn clip() -> ClipArtifact {
        ClipArtifact {
            path: PathBuf::from("unused.mp4"),
            created_at: SystemTime::now(),
            frame_count: 100,
        }
    }

    #[test]
    fn results_come_from_catalog() {
        let catalog = MockAnalysisClient::catalog();
        let mut client = MockAnalysisClient::seeded(7);
        for _ in 0..20 {
            let result = client.analyze(&clip()).unwrap();
            assert!(catalog.contains(&result));
        }
    }

    #[test]
    fn catalog_has_both_severities() {
        let catalog = MockAnalysisClient::catalog();
        assert_eq!(catalog.len(), 5);
        assert!(catalog.iter().any(AnalysisResult::is_emergency));
        assert!(catalog.iter().any(|r| !r.is_emergency()));
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = MockAnalysisClient::seeded(42);
        let mut b = MockAnalysisClient::seeded(42);
        for _ in 0..5 {
            assert_eq!(a.analyze(&clip()).unwrap(), b.analyze(&clip()).unwrap());
        }
    }
}
