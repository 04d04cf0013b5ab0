//! Per-invocation aggregation of container outcomes.

use crate::container::ContainerRef;

/// Final classification of one container in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Stopped,
    RestartedLocally,
    RestartedRemotely,
    Failed,
}

impl Outcome {
    pub fn is_restarted(&self) -> bool {
        matches!(self, Outcome::RestartedLocally | Outcome::RestartedRemotely)
    }

    /// Metric label.
    pub fn as_label(&self) -> &'static str {
        match self {
            Outcome::Stopped => "stopped",
            Outcome::RestartedLocally => "restarted_locally",
            Outcome::RestartedRemotely => "restarted_remotely",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    container: ContainerRef,
    outcome: Option<Outcome>,
}

/// Result of one stop or restart batch.
///
/// Every tracked container ends in at most one outcome; recording a new
/// outcome replaces the previous one in place, so the resolution order is
/// preserved. Self-restart is tracked apart from the outcomes.
#[derive(Debug, Clone, Default)]
pub struct LifecycleBatchResult {
    entries: Vec<Entry>,
    advisories: Vec<String>,
    messages: Vec<String>,
    self_restart_requested: bool,
}

impl LifecycleBatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the container's position without an outcome yet.
    pub fn track(&mut self, container: &ContainerRef) {
        if self.position(&container.name).is_none() {
            self.entries.push(Entry {
                container: container.clone(),
                outcome: None,
            });
        }
    }

    pub fn record(&mut self, container: &ContainerRef, outcome: Outcome) {
        match self.position(&container.name) {
            Some(idx) => self.entries[idx].outcome = Some(outcome),
            None => self.entries.push(Entry {
                container: container.clone(),
                outcome: Some(outcome),
            }),
        }
    }

    pub fn outcome(&self, name: &str) -> Option<Outcome> {
        self.position(name)
            .and_then(|idx| self.entries[idx].outcome)
    }

    /// Warning shown to the operator, e.g. a skipped ensemble member.
    pub fn advise(&mut self, advisory: impl Into<String>) {
        self.advisories.push(advisory.into());
    }

    /// Informational line, e.g. "already stopped".
    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn advisories(&self) -> &[String] {
        &self.advisories
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn request_self_restart(&mut self) {
        self.self_restart_requested = true;
    }

    pub fn self_restart_requested(&self) -> bool {
        self.self_restart_requested
    }

    /// Names with exactly `outcome`, in resolution order.
    pub fn with_outcome(&self, outcome: Outcome) -> Vec<&str> {
        self.names_where(|o| o == outcome)
    }

    /// Locally and remotely restarted containers, in resolution order.
    pub fn restarted(&self) -> Vec<&str> {
        self.names_where(|o| o.is_restarted())
    }

    pub fn stopped(&self) -> Vec<&str> {
        self.with_outcome(Outcome::Stopped)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.with_outcome(Outcome::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.outcome == Some(Outcome::Failed))
    }

    /// One outcome per classified container, in resolution order.
    pub fn outcomes(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.entries.iter().filter_map(|e| e.outcome)
    }

    /// Human-readable summary; empty sets are omitted.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let stopped = self.stopped();
        if !stopped.is_empty() {
            lines.push(format!(
                "The list of stopped containers: {}",
                format_list(&stopped)
            ));
        }
        let restarted = self.restarted();
        if !restarted.is_empty() {
            lines.push(format!(
                "The list of restarted containers: {}",
                format_list(&restarted)
            ));
        }
        let failed = self.failed();
        if !failed.is_empty() {
            lines.push(format!(
                "The list of failed containers: {}",
                format_list(&failed)
            ));
        }
        lines
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.container.name == name)
    }

    fn names_where(&self, pred: impl Fn(Outcome) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.outcome.is_some_and(&pred))
            .map(|e| e.container.name.as_str())
            .collect()
    }
}

/// `[a, b, c]`
pub fn format_list(names: &[&str]) -> String {
    format!("[{}]", names.join(", "))
}
