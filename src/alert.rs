//! Emergency alert gate.
//!
//! Informational results always pass. Emergency results are dropped when they
//! repeat the last forwarded emergency word for word, or when the previous
//! emergency was forwarded less than the cooldown ago. The duplicate check runs
//! first. Memory is updated only when an emergency is admitted.

use std::time::{Duration, Instant};

use crate::analysis::{AnalysisResult, Severity};

/// Default minimum spacing between forwarded emergencies.
pub const DEFAULT_EMERGENCY_COOLDOWN: Duration = Duration::from_secs(30);

/// What the gate remembers about the last admitted emergency.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmergencyMemory {
    pub last_sent_at: Option<Instant>,
    pub last_title: Option<String>,
    pub last_description: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuppressReason {
    /// Same title and description as the last admitted emergency.
    Duplicate,
    /// Another emergency was admitted within the cooldown.
    Cooldown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Forward,
    Suppress(SuppressReason),
}

pub struct AlertGate {
    cooldown: Duration,
    memory: EmergencyMemory,
}

impl AlertGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            memory: EmergencyMemory::default(),
        }
    }

    pub fn memory(&self) -> &EmergencyMemory {
        &self.memory
    }

    pub fn admit(&mut self, result: &AnalysisResult) -> Admission {
        self.admit_at(result, Instant::now())
    }

    /// Decide for `result` as if evaluated at `now`.
    pub fn admit_at(&mut self, result: &AnalysisResult, now: Instant) -> Admission {
        if result.severity != Severity::Emergency {
            return Admission::Forward;
        }

        let duplicate = self.memory.last_title.as_deref() == Some(result.title.as_str())
            && self.memory.last_description.as_deref() == Some(result.description.as_str());
        if duplicate {
            return Admission::Suppress(SuppressReason::Duplicate);
        }

        if let Some(last) = self.memory.last_sent_at {
            if now.saturating_duration_since(last) < self.cooldown {
                return Admission::Suppress(SuppressReason::Cooldown);
            }
        }

        self.memory = EmergencyMemory {
            last_sent_at: Some(now),
            last_title: Some(result.title.clone()),
            last_description: Some(result.description.clone()),
        };
        Admission::Forward
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(DEFAULT_EMERGENCY_COOLDOWN)
    }
}
