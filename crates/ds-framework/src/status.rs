//! Event-handler outcomes.
//!
//! `Severity` orders the possible results; `EventStatus` carries one
//! result with the system that produced it and an optional message.

use core::fmt;

use crate::error::{FrameworkError, FrameworkResult};

/// Outcome of an event handler, ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    DidNothing,
    Succeeded,
    ReachedTermination,
    Failed,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::DidNothing => "did nothing",
            Severity::Succeeded => "succeeded",
            Severity::ReachedTermination => "reached termination",
            Severity::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What an event handler reports back to the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventStatus {
    severity: Severity,
    system: Option<String>,
    message: String,
}

impl EventStatus {
    fn with(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            system: None,
            message: message.into(),
        }
    }

    pub fn did_nothing() -> Self {
        Self::with(Severity::DidNothing, "")
    }

    pub fn succeeded() -> Self {
        Self::with(Severity::Succeeded, "")
    }

    pub fn reached_termination(message: impl Into<String>) -> Self {
        Self::with(Severity::ReachedTermination, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with(Severity::Failed, message)
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Label of the system whose handler produced this status, if known.
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    pub fn is_failure(&self) -> bool {
        self.severity == Severity::Failed
    }

    /// Attach the reporting system's label unless one is already present.
    pub fn attribute_to(&mut self, system: impl FnOnce() -> String) {
        if self.system.is_none() && self.severity >= Severity::ReachedTermination {
            self.system = Some(system());
        }
    }

    /// Replace `self` with `candidate` when the latter is strictly more severe.
    pub fn keep_more_severe(&mut self, candidate: EventStatus) {
        if candidate.severity > self.severity {
            *self = candidate;
        }
    }

    /// Turn a failure into an error naming `operation`.
    pub fn throw_on_failure(&self, operation: &'static str) -> FrameworkResult<()> {
        if self.is_failure() {
            return Err(FrameworkError::EventHandlerFailed {
                operation,
                system: self.system.clone().unwrap_or_else(|| "<unknown system>".into()),
                message: self.message.clone(),
            });
        }
        Ok(())
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::did_nothing()
    }
}
