/*!
 * Progress aggregation for a dispatch batch.
 *
 * Purely additive bookkeeping: per-provider counters, overall unit counts, a
 * free-text status line, and a capped log. All mutations are simple counter
 * updates behind a mutex that is never held across an await point, so workers
 * can record progress without blocking each other meaningfully.
 */

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::registry::Provider;

/// Oldest log entries are dropped beyond this many
const MAX_LOG_ENTRIES: usize = 200;

/// Per-provider progress counters, mutated only through the aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProgress {
    /// Provider id
    pub provider_id: String,
    /// Provider display name
    pub name: String,
    /// Units claimed by (or assigned to) this provider
    pub total: usize,
    /// Units translated successfully
    pub done: usize,
    /// Units that failed on this provider
    pub failed: usize,
    /// Most recent error seen on this provider, retained for diagnostics
    pub last_error: Option<String>,
}

impl ProviderProgress {
    fn new(provider: &Provider, total: usize) -> Self {
        Self {
            provider_id: provider.id.clone(),
            name: provider.name.clone(),
            total,
            done: 0,
            failed: 0,
            last_error: None,
        }
    }

    /// Units claimed but not yet terminal
    pub fn in_flight(&self) -> usize {
        self.total.saturating_sub(self.done + self.failed)
    }
}

/// Log entry captured during a batch
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Severity label (INFO, WARN, ERROR)
    pub level: String,
    /// Log message
    pub message: String,
}

#[derive(Debug, Default)]
struct ProgressState {
    total_units: usize,
    done_units: usize,
    status: String,
    providers: Vec<ProviderProgress>,
    log: VecDeque<LogEntry>,
}

/// Mutable batch-progress counters shared between workers
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    inner: Mutex<ProgressState>,
}

impl ProgressAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset counters for a new batch of `total` units
    pub fn start_batch(&self, total: usize) {
        let mut state = self.inner.lock();
        state.total_units = total;
        state.done_units = 0;
        state.status = "dispatching".to_string();
        state.providers.clear();
    }

    /// Register a participating provider with its initially assigned total
    pub fn register_provider(&self, provider: &Provider, total: usize) {
        let mut state = self.inner.lock();
        if state.providers.iter().any(|p| p.provider_id == provider.id) {
            return;
        }
        state.providers.push(ProviderProgress::new(provider, total));
    }

    /// Record that a worker claimed one unit from the shared queue
    pub fn record_claim(&self, provider_id: &str) {
        let mut state = self.inner.lock();
        if let Some(progress) = state.providers.iter_mut().find(|p| p.provider_id == provider_id) {
            progress.total += 1;
        }
    }

    /// Record one successfully translated unit
    pub fn record_unit_done(&self, provider_id: &str) {
        let mut state = self.inner.lock();
        state.done_units += 1;
        if let Some(progress) = state.providers.iter_mut().find(|p| p.provider_id == provider_id) {
            progress.done += 1;
        }
    }

    /// Hand back a claimed unit that reached no terminal state (cancellation
    /// mid-flight); undoes the matching [`record_claim`](Self::record_claim)
    pub fn record_claim_returned(&self, provider_id: &str) {
        let mut state = self.inner.lock();
        if let Some(progress) = state.providers.iter_mut().find(|p| p.provider_id == provider_id) {
            progress.total = progress.total.saturating_sub(1);
        }
    }

    /// Record one failed unit together with its error message
    pub fn record_failure(&self, provider_id: &str, error: &str) {
        let mut state = self.inner.lock();
        if let Some(progress) = state.providers.iter_mut().find(|p| p.provider_id == provider_id) {
            progress.failed += 1;
            progress.last_error = Some(error.to_string());
        }
    }

    /// Append a log line, dropping the oldest entry beyond the cap
    pub fn append_log(&self, level: &str, message: impl Into<String>) {
        let mut state = self.inner.lock();
        state.log.push_back(LogEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            message: message.into(),
        });
        while state.log.len() > MAX_LOG_ENTRIES {
            state.log.pop_front();
        }
    }

    /// Set the final status line for the batch
    pub fn finish_batch(&self, status: &str) {
        let mut state = self.inner.lock();
        state.status = status.to_string();
    }

    /// Snapshot of every provider's progress, in registration order
    pub fn snapshot(&self) -> Vec<ProviderProgress> {
        self.inner.lock().providers.clone()
    }

    /// Units translated so far across all providers
    pub fn done_count(&self) -> usize {
        self.inner.lock().done_units
    }

    /// Units expected in the current batch
    pub fn total_count(&self) -> usize {
        self.inner.lock().total_units
    }

    /// Current status line
    pub fn status(&self) -> String {
        self.inner.lock().status.clone()
    }

    /// Captured log entries, oldest first
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.lock().log.iter().cloned().collect()
    }
}
