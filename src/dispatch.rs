/*!
 * Dispatcher: distributes translation units across providers.
 *
 * Two operating modes selected by the number of active providers. Serial mode
 * (one provider) processes units strictly in order and halts on the first
 * error. Parallel mode (two or more) runs one worker task per provider over a
 * shared FIFO queue, with a policy switch between reassigning failed units to
 * surviving providers and aborting the whole batch on the first failure.
 */

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::join_all;
use log::{info, warn};
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::client::TranslationBackend;
use crate::progress::{ProgressAggregator, ProviderProgress};
use crate::rate_limit::RateLimiter;
use crate::registry::Provider;

/// Batch reason when every worker retires with work left on the queue
const ALL_PROVIDERS_FAILED: &str = "remaining units incomplete, all providers failed";

/// Batch reason when the caller cancels mid-flight
const CANCELLED: &str = "dispatch cancelled";

/// One independent piece of text to translate.
///
/// The id is an opaque back-reference supplied by the caller for writing the
/// result; the engine never interprets it. A unit is consumed at most once by
/// a successful translation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationUnit {
    /// Caller-supplied identity
    pub id: String,
    /// Source text
    pub text: String,
}

impl TranslationUnit {
    /// Create a unit from an identity and its source text
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into() }
    }
}

/// Batch-level outcome, computed once every worker has terminated
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// Every unit translated
    Translated {
        /// Number of units translated
        count: usize,
    },
    /// Some units translated before the batch stopped
    Partial {
        /// Number of units translated
        count: usize,
        /// First fatal error message encountered, or why work remained
        reason: String,
    },
    /// Nothing was attempted
    Skipped {
        /// Why the batch was skipped
        reason: String,
    },
    /// No unit translated
    Failed {
        /// First fatal error message encountered
        reason: String,
    },
}

impl DispatchResult {
    /// Number of units translated in this batch
    pub fn count(&self) -> usize {
        match self {
            Self::Translated { count } | Self::Partial { count, .. } => *count,
            Self::Skipped { .. } | Self::Failed { .. } => 0,
        }
    }

    /// Whether every unit in the batch was translated
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Translated { .. })
    }

    /// The attached reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Translated { .. } => None,
            Self::Partial { reason, .. } | Self::Skipped { reason } | Self::Failed { reason } => {
                Some(reason)
            }
        }
    }
}

impl std::fmt::Display for DispatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Translated { count } => write!(f, "translated {} unit(s)", count),
            Self::Partial { count, reason } => {
                write!(f, "partially translated {} unit(s): {}", count, reason)
            }
            Self::Skipped { reason } => write!(f, "skipped: {}", reason),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Per-unit sink, invoked on every successful translation with the unit, the
/// translated text, and the provider id that produced it
pub type UnitSink = Box<dyn Fn(&TranslationUnit, &str, &str) + Send + Sync>;

/// Invoked after every unit reaches a terminal state with a fresh snapshot
pub type ProgressSink = Box<dyn Fn(&[ProviderProgress]) + Send + Sync>;

/// Invoked for every captured log line
pub type LogSink = Box<dyn Fn(&str) + Send + Sync>;

/// Optional caller callbacks for presentation layers
#[derive(Default)]
pub struct DispatchHooks {
    /// Per-unit result sink
    pub on_unit_translated: Option<UnitSink>,
    /// Progress-changed notification
    pub on_provider_progress: Option<ProgressSink>,
    /// Log line notification
    pub on_log: Option<LogSink>,
}

/// Options for one dispatch batch
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Push failed units back onto the queue and retire only the failing
    /// worker, instead of aborting the whole batch on first failure
    pub reassign_on_failure: bool,

    /// System message sent with every request
    pub system_prompt: Option<String>,
}

/// The dispatch engine. One instance processes one batch at a time.
pub struct Dispatcher {
    backend: Arc<dyn TranslationBackend>,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressAggregator>,
    hooks: Arc<DispatchHooks>,
    options: DispatchOptions,
}

impl Dispatcher {
    /// Create a dispatcher over a backend and a fresh rate limiter
    pub fn new(
        backend: Arc<dyn TranslationBackend>,
        limiter: Arc<RateLimiter>,
        options: DispatchOptions,
        hooks: DispatchHooks,
    ) -> Self {
        Self {
            backend,
            limiter,
            progress: Arc::new(ProgressAggregator::new()),
            hooks: Arc::new(hooks),
            options,
        }
    }

    /// Live progress counters for the current batch
    pub fn progress(&self) -> Arc<ProgressAggregator> {
        Arc::clone(&self.progress)
    }

    /// Drive one batch of units to completion or abortion.
    ///
    /// The cancel token is both the caller's handle to stop the batch and the
    /// internal abort flag: when `reassign_on_failure` is false and a unit
    /// fails, the token is cancelled so every worker observes the abort.
    pub async fn dispatch(
        &self,
        units: Vec<TranslationUnit>,
        providers: Vec<Provider>,
        cancel: CancelToken,
    ) -> DispatchResult {
        self.progress.start_batch(units.len());

        let result = if units.is_empty() {
            DispatchResult::Skipped { reason: "no translation units to process".to_string() }
        } else if providers.is_empty() {
            DispatchResult::Skipped { reason: "no usable providers configured".to_string() }
        } else if providers.len() == 1 {
            let provider = providers.into_iter().next().expect("one provider");
            self.run_serial(units, provider, &cancel).await
        } else {
            self.run_parallel(units, providers, &cancel).await
        };

        let summary = result.to_string();
        emit_log(&self.progress, &self.hooks, "INFO", &summary);
        self.progress.finish_batch(&summary);
        result
    }

    /// Serial mode: strict submission order, halt on first error
    async fn run_serial(
        &self,
        units: Vec<TranslationUnit>,
        provider: Provider,
        cancel: &CancelToken,
    ) -> DispatchResult {
        self.progress.register_provider(&provider, units.len());
        emit_log(
            &self.progress,
            &self.hooks,
            "INFO",
            &format!("Dispatching {} unit(s) to '{}' in serial mode", units.len(), provider.id),
        );

        let mut done = 0usize;
        for unit in units {
            if cancel.is_cancelled() {
                return partial_or_failed(done, CANCELLED.to_string());
            }

            self.limiter.acquire(&provider.id, provider.rate_limit).await;
            match self
                .backend
                .translate(&unit.text, &provider, self.options.system_prompt.as_deref(), cancel)
                .await
            {
                Ok(translated) => {
                    done += 1;
                    report_unit_done(&self.progress, &self.hooks, &provider.id, &unit, &translated);
                }
                Err(err) if err.is_cancelled() => {
                    // A caller cancel is not a provider failure
                    return partial_or_failed(done, CANCELLED.to_string());
                }
                Err(err) => {
                    let reason = err.to_string();
                    self.progress.record_failure(&provider.id, &reason);
                    emit_log(
                        &self.progress,
                        &self.hooks,
                        "ERROR",
                        &format!("Unit '{}' failed on '{}': {}", unit.id, provider.id, reason),
                    );
                    report_progress(&self.progress, &self.hooks);
                    return partial_or_failed(done, reason);
                }
            }
        }

        DispatchResult::Translated { count: done }
    }

    /// Parallel mode: one worker per provider over a shared FIFO queue
    async fn run_parallel(
        &self,
        units: Vec<TranslationUnit>,
        providers: Vec<Provider>,
        cancel: &CancelToken,
    ) -> DispatchResult {
        let queue = Arc::new(Mutex::new(VecDeque::from(units)));
        let first_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        emit_log(
            &self.progress,
            &self.hooks,
            "INFO",
            &format!(
                "Dispatching {} unit(s) across {} providers in parallel mode",
                queue.lock().len(),
                providers.len()
            ),
        );

        let mut handles = Vec::with_capacity(providers.len());
        for provider in providers {
            self.progress.register_provider(&provider, 0);
            let worker = Worker {
                provider,
                backend: Arc::clone(&self.backend),
                limiter: Arc::clone(&self.limiter),
                progress: Arc::clone(&self.progress),
                hooks: Arc::clone(&self.hooks),
                queue: Arc::clone(&queue),
                cancel: cancel.clone(),
                first_error: Arc::clone(&first_error),
                reassign_on_failure: self.options.reassign_on_failure,
                system_prompt: self.options.system_prompt.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        // Every worker must terminate before the batch outcome is computed
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!("Worker task panicked: {}", e);
            }
        }

        let done = self.progress.done_count();
        if cancel.is_cancelled() {
            let reason = first_error.lock().take().unwrap_or_else(|| CANCELLED.to_string());
            return partial_or_failed(done, reason);
        }
        if !queue.lock().is_empty() {
            return partial_or_failed(done, ALL_PROVIDERS_FAILED.to_string());
        }
        DispatchResult::Translated { count: done }
    }
}

/// One logical worker, bound to a single provider
struct Worker {
    provider: Provider,
    backend: Arc<dyn TranslationBackend>,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressAggregator>,
    hooks: Arc<DispatchHooks>,
    queue: Arc<Mutex<VecDeque<TranslationUnit>>>,
    cancel: CancelToken,
    first_error: Arc<Mutex<Option<String>>>,
    reassign_on_failure: bool,
    system_prompt: Option<String>,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Pop-and-check is one atomic step; the queue is the only shared
            // mutation point between workers
            let Some(unit) = self.queue.lock().pop_front() else {
                break;
            };
            self.progress.record_claim(&self.provider.id);

            self.limiter.acquire(&self.provider.id, self.provider.rate_limit).await;
            match self
                .backend
                .translate(&unit.text, &self.provider, self.system_prompt.as_deref(), &self.cancel)
                .await
            {
                Ok(translated) => {
                    report_unit_done(&self.progress, &self.hooks, &self.provider.id, &unit, &translated);
                }
                Err(err) if err.is_cancelled() => {
                    // The unit was never attempted to a terminal state; hand
                    // it back so the remaining count stays accurate
                    self.progress.record_claim_returned(&self.provider.id);
                    self.queue.lock().push_front(unit);
                    break;
                }
                Err(err) => {
                    let message = err.to_string();
                    self.progress.record_failure(&self.provider.id, &message);
                    emit_log(
                        &self.progress,
                        &self.hooks,
                        "ERROR",
                        &format!("Unit '{}' failed on '{}': {}", unit.id, self.provider.id, message),
                    );
                    report_progress(&self.progress, &self.hooks);

                    if self.reassign_on_failure {
                        let unit_id = unit.id.clone();
                        self.queue.lock().push_back(unit);
                        info!("Provider '{}' retiring after failure, unit reassigned", self.provider.id);
                        emit_log(
                            &self.progress,
                            &self.hooks,
                            "WARN",
                            &format!("Provider '{}' retired, unit '{}' requeued", self.provider.id, unit_id),
                        );
                        break;
                    }

                    let mut slot = self.first_error.lock();
                    if slot.is_none() {
                        *slot = Some(message);
                    }
                    drop(slot);
                    self.cancel.cancel();
                    break;
                }
            }
        }
    }
}

/// Record a successful unit and notify the caller's sinks
fn report_unit_done(
    progress: &ProgressAggregator,
    hooks: &DispatchHooks,
    provider_id: &str,
    unit: &TranslationUnit,
    translated: &str,
) {
    progress.record_unit_done(provider_id);
    if let Some(sink) = &hooks.on_unit_translated {
        sink(unit, translated, provider_id);
    }
    report_progress(progress, hooks);
}

/// Push a fresh progress snapshot to the caller
fn report_progress(progress: &ProgressAggregator, hooks: &DispatchHooks) {
    if let Some(sink) = &hooks.on_provider_progress {
        sink(&progress.snapshot());
    }
}

/// Capture a log line and forward it to the caller
fn emit_log(progress: &ProgressAggregator, hooks: &DispatchHooks, level: &str, message: &str) {
    progress.append_log(level, message);
    if let Some(sink) = &hooks.on_log {
        sink(message);
    }
}

/// Batch outcome for an interrupted dispatch
fn partial_or_failed(done: usize, reason: String) -> DispatchResult {
    if done == 0 {
        DispatchResult::Failed { reason }
    } else {
        DispatchResult::Partial { count: done, reason }
    }
}
