/*!
 * End-to-end dispatch scenarios: parallel reassignment, batch abort,
 * cancellation, and the client's rate-limit backoff driven through the
 * dispatcher.
 */

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use polyglot_dispatch::{
    CancelToken, ClientOptions, DispatchHooks, DispatchOptions, DispatchResult, Dispatcher,
    ChatTransport, RateLimiter, TranslationBackend, TranslationClient,
};

use crate::common::mock_backend::{
    FakeReply, FakeTransport, MockBackend, MockOutcome, ok_body, rate_limited_body,
};
use crate::common::{init_test_logging, make_provider, make_units};

fn reassigning(backend: Arc<MockBackend>) -> Dispatcher {
    Dispatcher::new(
        backend,
        Arc::new(RateLimiter::new()),
        DispatchOptions { reassign_on_failure: true, system_prompt: None },
        DispatchHooks::default(),
    )
}

fn aborting(backend: Arc<MockBackend>) -> Dispatcher {
    Dispatcher::new(
        backend,
        Arc::new(RateLimiter::new()),
        DispatchOptions { reassign_on_failure: false, system_prompt: None },
        DispatchHooks::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_reassignment_should_route_failed_units_to_surviving_provider() {
    init_test_logging();
    let backend = Arc::new(MockBackend::new());
    // Provider A fails every call; provider B succeeds and is slightly slow so
    // A reliably claims a unit before the queue drains
    backend.script("a", vec![MockOutcome::Transport("a is down".to_string()); 8]);
    backend.set_delay("b", Duration::from_millis(10));

    let dispatcher = reassigning(Arc::clone(&backend));
    let progress = dispatcher.progress();
    let providers = vec![make_provider("a"), make_provider("b")];

    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    assert_eq!(result, DispatchResult::Translated { count: 4 });
    // A retired after its single failure; B picked up the requeued unit
    assert_eq!(backend.call_count("a"), 1);
    assert_eq!(backend.call_count("b"), 4);

    let snapshot = progress.snapshot();
    let a = snapshot.iter().find(|p| p.provider_id == "a").unwrap();
    let b = snapshot.iter().find(|p| p.provider_id == "b").unwrap();
    assert_eq!((a.done, a.failed), (0, 1));
    assert_eq!((b.done, b.failed), (4, 0));
    assert!(a.last_error.as_deref().unwrap().contains("a is down"));
}

#[tokio::test(start_paused = true)]
async fn test_all_workers_retiring_should_report_remaining_units() {
    init_test_logging();
    let backend = Arc::new(MockBackend::new());
    backend.script("a", vec![MockOutcome::Transport("down".to_string()); 8]);
    backend.script("b", vec![MockOutcome::Succeed, MockOutcome::Transport("down".to_string())]);
    backend.set_delay("b", Duration::from_millis(10));

    let dispatcher = reassigning(Arc::clone(&backend));
    let providers = vec![make_provider("a"), make_provider("b")];

    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    match result {
        DispatchResult::Partial { count, reason } => {
            assert_eq!(count, 1);
            assert_eq!(reason, "remaining units incomplete, all providers failed");
        }
        other => panic!("expected partial, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_all_providers_failing_should_fail_when_nothing_translated() {
    init_test_logging();
    let backend = Arc::new(MockBackend::new());
    backend.script("a", vec![MockOutcome::Transport("a down".to_string()); 8]);
    backend.script("b", vec![MockOutcome::Transport("b down".to_string()); 8]);

    let dispatcher = reassigning(Arc::clone(&backend));
    let providers = vec![make_provider("a"), make_provider("b")];

    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    // Nothing translated, so the batch is a failure rather than a zero-count partial
    match result {
        DispatchResult::Failed { reason } => {
            assert_eq!(reason, "remaining units incomplete, all providers failed");
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_abort_policy_should_stop_the_batch_without_double_attempts() {
    let backend = Arc::new(MockBackend::new());
    backend.script("a", vec![MockOutcome::Transport("a is down".to_string()); 8]);
    backend.set_delay("b", Duration::from_millis(50));

    let dispatcher = aborting(Arc::clone(&backend));
    let providers = vec![make_provider("a"), make_provider("b")];

    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    match &result {
        DispatchResult::Partial { reason, .. } | DispatchResult::Failed { reason } => {
            assert!(reason.contains("a is down"));
        }
        other => panic!("expected partial or failed, got {:?}", other),
    }

    // Every unit was attempted at most once across all providers
    let attempted: Vec<String> =
        backend.all_calls().into_iter().map(|(_, text)| text).collect();
    let unique: HashSet<&String> = attempted.iter().collect();
    assert_eq!(unique.len(), attempted.len());
    assert!(attempted.len() <= 4);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_should_stop_in_flight_work() {
    let backend = Arc::new(MockBackend::new());
    backend.set_delay("a", Duration::from_secs(30));
    backend.set_delay("b", Duration::from_secs(30));

    let dispatcher = aborting(Arc::clone(&backend));
    let providers = vec![make_provider("a"), make_provider("b")];
    let cancel = CancelToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let result = dispatcher.dispatch(make_units(6), providers, cancel).await;

    assert!(start.elapsed() < Duration::from_secs(30));
    match result {
        DispatchResult::Failed { reason } => assert_eq!(reason, "dispatch cancelled"),
        other => panic!("expected failed, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_provider_should_recover_through_the_dispatcher() {
    // Drive the real client over a scripted transport: 429 first, then 2xx
    let transport = Arc::new(FakeTransport::new(vec![
        FakeReply::Reply(429, rate_limited_body()),
        FakeReply::Reply(200, ok_body("translated")),
    ]));
    let client = TranslationClient::with_transport(
        Arc::clone(&transport) as Arc<dyn ChatTransport>,
        ClientOptions::default(),
    );
    let dispatcher = Dispatcher::new(
        Arc::new(client),
        Arc::new(RateLimiter::new()),
        DispatchOptions::default(),
        DispatchHooks::default(),
    );
    let progress = dispatcher.progress();

    let start = Instant::now();
    let result =
        dispatcher.dispatch(make_units(1), vec![make_provider("p1")], CancelToken::new()).await;

    assert_eq!(result, DispatchResult::Translated { count: 1 });
    assert!(start.elapsed() >= Duration::from_millis(60_000));
    assert_eq!(transport.request_count(), 2);
    // Counted once despite the retry
    assert_eq!(progress.done_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hooks_should_receive_units_progress_and_logs() {
    let backend = Arc::new(MockBackend::new());
    backend.set_delay("a", Duration::from_millis(5));
    backend.set_delay("b", Duration::from_millis(5));

    let units_seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let log_lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let snapshots: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));

    let sink_units = Arc::clone(&units_seen);
    let sink_logs = Arc::clone(&log_lines);
    let sink_snapshots = Arc::clone(&snapshots);
    let hooks = DispatchHooks {
        on_unit_translated: Some(Box::new(move |unit, _translated, provider_id| {
            sink_units.lock().push((unit.id.clone(), provider_id.to_string()));
        })),
        on_provider_progress: Some(Box::new(move |_snapshot| {
            *sink_snapshots.lock() += 1;
        })),
        on_log: Some(Box::new(move |line| {
            sink_logs.lock().push(line.to_string());
        })),
    };

    let dispatcher = Dispatcher::new(
        Arc::clone(&backend) as Arc<dyn TranslationBackend>,
        Arc::new(RateLimiter::new()),
        DispatchOptions { reassign_on_failure: true, system_prompt: None },
        hooks,
    );
    let progress = dispatcher.progress();
    let providers = vec![make_provider("a"), make_provider("b")];

    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    assert_eq!(result, DispatchResult::Translated { count: 4 });
    let seen = units_seen.lock();
    assert_eq!(seen.len(), 4);
    let ids: HashSet<&String> = seen.iter().map(|(id, _)| id).collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(*snapshots.lock(), 4);
    assert!(!log_lines.lock().is_empty());

    // Per-provider invariant once the batch has settled
    for provider in progress.snapshot() {
        assert_eq!(provider.done + provider.failed, provider.total);
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_dispatch_should_respect_per_provider_rate_limits() {
    let backend = Arc::new(MockBackend::new());
    let dispatcher = reassigning(Arc::clone(&backend));
    let providers = vec![
        crate::common::make_provider_with_rpm("a", 1),
        crate::common::make_provider_with_rpm("b", 1),
    ];

    let start = Instant::now();
    let result = dispatcher.dispatch(make_units(4), providers, CancelToken::new()).await;

    assert_eq!(result, DispatchResult::Translated { count: 4 });
    // Two units per provider at one request per minute needs a second window
    assert!(start.elapsed() >= Duration::from_millis(60_000));
}
