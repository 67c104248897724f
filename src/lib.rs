/*!
 * # polyglot-dispatch
 *
 * A concurrent, rate-limited, multi-provider text-translation dispatch
 * engine. Given a batch of independent text units and one or more
 * OpenAI-compatible translation providers, it distributes units to
 * providers, throttles requests per provider with a sliding-window rate
 * limiter, retries transparently on rate-limit responses, optionally
 * reassigns failed units to surviving providers, and reports live
 * aggregate progress through caller-supplied callbacks.
 *
 * ## Architecture
 *
 * The library is organized in these main modules:
 * - `registry`: provider configuration validation and selection
 * - `rate_limit`: per-provider sliding-window throttle
 * - `client`: HTTP translation client with rate-limit retry
 * - `dispatch`: serial/parallel dispatch with reassignment policy
 * - `progress`: per-provider and batch-level progress counters
 * - `cancel`: cancellation token shared with workers
 * - `errors`: client-side error taxonomy
 *
 * ## Example
 *
 * ```no_run
 * use std::sync::Arc;
 * use polyglot_dispatch::{
 *     CancelToken, ClientOptions, DispatchHooks, DispatchOptions, Dispatcher,
 *     RateLimiter, RegistryConfig, TranslationClient, TranslationUnit, resolve,
 * };
 *
 * # async fn run(config_json: &str) -> anyhow::Result<()> {
 * let config = RegistryConfig::from_json(config_json)?;
 * let providers = resolve(&config);
 * let dispatcher = Dispatcher::new(
 *     Arc::new(TranslationClient::new(ClientOptions::default())),
 *     Arc::new(RateLimiter::new()),
 *     DispatchOptions { reassign_on_failure: true, system_prompt: None },
 *     DispatchHooks::default(),
 * );
 * let units = vec![TranslationUnit::new("p1", "Hello, world")];
 * let result = dispatcher.dispatch(units, providers, CancelToken::new()).await;
 * println!("{}", result);
 * # Ok(())
 * # }
 * ```
 *
 * ## License
 *
 * This project is licensed under the MIT License
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]

// Public modules
pub mod cancel;
pub mod client;
pub mod dispatch;
pub mod errors;
pub mod progress;
pub mod rate_limit;
pub mod registry;

// Re-export main types for easier usage
pub use cancel::CancelToken;
pub use client::{
    ChatMessage, ChatRequest, ChatTransport, ClientOptions, HttpReply, HttpTransport,
    TranslationBackend, TranslationClient,
};
pub use dispatch::{
    DispatchHooks, DispatchOptions, DispatchResult, Dispatcher, TranslationUnit,
};
pub use errors::ClientError;
pub use progress::{LogEntry, ProgressAggregator, ProviderProgress};
pub use rate_limit::RateLimiter;
pub use registry::{
    Prompt, Provider, RawProviderConfig, RegistryConfig, render_system_prompt, resolve,
};
