//! Scene analysis of clips.
//!
//! `AnalysisClient` is the seam between the scheduler and whatever classifies
//! a clip. Two implementations exist:
//! - `MockAnalysisClient`: canned results, no network
//! - `RemoteAnalysisClient`: uploads the clip to the analysis provider
//!
//! Which one runs is decided once from configuration.

mod mock;
mod remote;

pub use mock::MockAnalysisClient;
pub use remote::{parse_analysis_payload, RemoteAnalysisClient, RemoteAnalysisConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clip::ClipArtifact;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Emergency,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Informational => f.write_str("informational"),
            Severity::Emergency => f.write_str("emergency"),
        }
    }
}

/// Classification of one clip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl AnalysisResult {
    pub fn new(title: impl Into<String>, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.severity == Severity::Emergency
    }
}

/// Analysis capability.
///
/// Any error means "analysis unavailable": the caller skips the cycle and
/// retries later. Errors are never fatal.
pub trait AnalysisClient: Send {
    /// Client identifier for logs.
    fn name(&self) -> &'static str;

    fn analyze(&mut self, clip: &ClipArtifact) -> Result<AnalysisResult>;
}

/// Pick the client named by configuration.
pub fn build_analysis_client(
    use_mock: bool,
    remote: RemoteAnalysisConfig,
) -> Result<Box<dyn AnalysisClient>> {
    if use_mock {
        Ok(Box::new(MockAnalysisClient::new()))
    } else {
        Ok(Box::new(RemoteAnalysisClient::new(remote)?))
    }
}
