use std::cell::RefCell;

use serde::Serialize;
use thiserror::Error;

pub const LOG_TARGET: &str = "archgifts";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Append-only diagnostics output. Never fails the caller.
pub trait DiagnosticsSink {
    fn emit(&self, severity: Severity, message: &str);
}

impl<T: DiagnosticsSink + ?Sized> DiagnosticsSink for &T {
    fn emit(&self, severity: Severity, message: &str) {
        (**self).emit(severity, message)
    }
}

/// Forwards everything to the `log` facade.
#[derive(Copy, Clone, Debug, Default)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn emit(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => log::info!(target: LOG_TARGET, "{message}"),
            Severity::Warning => log::warn!(target: LOG_TARGET, "{message}"),
            Severity::Error => log::error!(target: LOG_TARGET, "{message}"),
        }
    }
}

/// Keeps every emitted line in memory, for tests and reports.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: RefCell<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines.borrow().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.lines
            .borrow()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|(_, m)| m.contains(needle))
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, severity: Severity, message: &str) {
        self.lines.borrow_mut().push((severity, message.to_string()));
    }
}

/// A recovered failure at the smallest unit it concerns: one settings key,
/// one gift token, one override rule or one gift record.
#[derive(Clone, Debug, Eq, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    #[error("invalid value [{value}] for {key}: {reason}")]
    ConfigWarning {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid item [{token}] in gift list ({reason}).  Skipping [{token}].")]
    ResolutionFailure { token: String, reason: String },

    #[error("{rule}: target {target} not found")]
    TargetNotFound { rule: String, target: String },

    #[error("{rule}: patch failed: {reason}")]
    PatchFailed { rule: String, reason: String },

    #[error("gift item template {id} not found")]
    RecordNotFound { id: i32 },

    #[error("gift item template {id} could not be updated: {reason}")]
    MutationFailed { id: i32, reason: String },
}

impl Diagnostic {
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::ConfigWarning { .. } | Diagnostic::ResolutionFailure { .. } => {
                Severity::Warning
            }
            Diagnostic::TargetNotFound { .. }
            | Diagnostic::PatchFailed { .. }
            | Diagnostic::RecordNotFound { .. }
            | Diagnostic::MutationFailed { .. } => Severity::Error,
        }
    }

    pub(crate) fn report(&self, sink: &dyn DiagnosticsSink) {
        sink.emit(self.severity(), &self.to_string());
    }
}
