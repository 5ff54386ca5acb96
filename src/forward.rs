//! Event forwarding to the downstream collector.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::time::Duration;

use crate::analysis::{AnalysisResult, Severity};

/// Body of `POST {collector}/process_event`.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct EventPayload {
    pub camera_id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub reference_clip_url: String,
}

/// Delivery of admitted results.
///
/// `Ok(())` means the collector accepted the event; any error leaves the
/// analysis cursor in place so the scheduler retries.
pub trait EventForwarder: Send {
    fn forward(&mut self, result: &AnalysisResult) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    /// Collector base URL; `/process_event` is appended.
    pub collector_url: String,
    pub camera_id: String,
    /// Where the collector can fetch this camera's current clip.
    pub reference_clip_url: String,
    pub timeout: Duration,
}

pub struct HttpForwarder {
    agent: ureq::Agent,
    endpoint: String,
    camera_id: String,
    reference_clip_url: String,
}

impl HttpForwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(config.timeout).build(),
            endpoint: format!(
                "{}/process_event",
                config.collector_url.trim_end_matches('/')
            ),
            camera_id: config.camera_id,
            reference_clip_url: config.reference_clip_url,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn payload(&self, result: &AnalysisResult) -> EventPayload {
        EventPayload {
            camera_id: self.camera_id.clone(),
            severity: result.severity,
            title: result.title.clone(),
            description: result.description.clone(),
            reference_clip_url: self.reference_clip_url.clone(),
        }
    }
}

impl EventForwarder for HttpForwarder {
    fn forward(&mut self, result: &AnalysisResult) -> Result<()> {
        let payload = self.payload(result);
        let body = serde_json::to_string(&payload)?;
        log::info!(
            "forwarding {} event '{}' to {}",
            payload.severity,
            payload.title,
            self.endpoint
        );

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body);

        // The collector may answer with plain text; the body is read as text
        // first and parsed only for the log.
        let (status, text) = match response {
            Ok(response) => {
                let status = response.status();
                let text = response
                    .into_string()
                    .context("read collector response body")?;
                (status, text)
            }
            Err(ureq::Error::Status(status, response)) => {
                (status, response.into_string().unwrap_or_default())
            }
            Err(err) => return Err(anyhow!(err).context("collector request failed")),
        };

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => log::info!("collector response {}: {}", status, json),
            Err(_) => log::info!("collector response {} (text): {}", status, text.trim()),
        }

        if !(200..300).contains(&status) {
            bail!("collector returned {}: {}", status, text.trim());
        }
        Ok(())
    }
}
