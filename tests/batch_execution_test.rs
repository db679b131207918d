//! Batch Execution Tests
//!
//! Windowed concurrency, pacing, ordering, partial failure and summary
//! behaviour of the batch executor, driven through a simulated provider.

use batchgen::batch::{
    BatchConfig, BatchExecutor, ConfigurationError, FnExecutor, GenerationProfile, TaskDescriptor,
    TaskError, TaskErrorKind, TaskExecution, TaskExecutor, UsageMetrics,
};
use batchgen::BatchGenError;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Start and end instant of one task run
#[derive(Debug, Clone, Copy)]
struct Span {
    index: usize,
    start: Instant,
    end: Instant,
}

/// Simulated provider recording timing, concurrency and inputs
#[derive(Default)]
struct Recorder {
    spans: Mutex<Vec<Span>>,
    inputs: Mutex<Vec<(usize, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

fn simulated_provider(
    recorder: Arc<Recorder>,
    durations: Vec<u64>,
    failing: HashSet<usize>,
) -> Arc<dyn TaskExecutor> {
    Arc::new(FnExecutor::new(move |descriptor: TaskDescriptor| {
        let recorder = recorder.clone();
        let delay = Duration::from_millis(durations.get(descriptor.index).copied().unwrap_or(10));
        let fails = failing.contains(&descriptor.index);

        async move {
            recorder.calls.fetch_add(1, Ordering::SeqCst);
            recorder
                .inputs
                .lock()
                .unwrap()
                .push((descriptor.index, descriptor.input().to_string()));

            let now_in_flight = recorder.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            recorder.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

            let start = Instant::now();
            tokio::time::sleep(delay).await;
            let end = Instant::now();

            recorder.in_flight.fetch_sub(1, Ordering::SeqCst);
            recorder.spans.lock().unwrap().push(Span { index: descriptor.index, start, end });

            if fails {
                Err(TaskError::from_provider_message("QUOTA_EXCEEDED: try later"))
            } else {
                let tokens = 100 + descriptor.index as u64;
                Ok(TaskExecution::new(
                    json!({ "image": format!("img-{}", descriptor.index) }),
                    UsageMetrics::new(50, tokens),
                ))
            }
        }
    }))
}

fn prompts(count: usize) -> Vec<TaskDescriptor> {
    TaskDescriptor::from_payloads((0..count).map(|i| format!("prompt {}", i)))
}

#[tokio::test(start_paused = true)]
async fn test_index_coverage_and_ordering_under_jitter() {
    let recorder = Arc::new(Recorder::default());
    // Later indices finish first inside every window
    let durations = vec![90, 60, 30, 80, 50, 20, 70, 40, 10];
    let failing = HashSet::from([1, 5, 6]);
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), durations, failing))
        .with_inter_window_delay(Duration::from_millis(100));

    let result = executor.execute_batch(prompts(9)).await.expect("batch should run");

    let success_indices: Vec<usize> = result.successes.iter().map(|s| s.index).collect();
    assert_eq!(success_indices, vec![0, 2, 3, 4, 7, 8]);
    assert_eq!(result.failed_indices(), vec![1, 5, 6]);

    let mut all: Vec<usize> = success_indices.into_iter().chain(result.failed_indices()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..9).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_isolation() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(
        recorder.clone(),
        vec![10; 5],
        HashSet::from([2]),
    ));

    let result = executor.execute_batch(prompts(5)).await.expect("partial failure is not an error");

    assert_eq!(result.successes.len(), 4);
    assert_eq!(result.failures.len(), 1);
    let failure = &result.failures[0];
    assert_eq!(failure.index, 2);
    assert_eq!(failure.payload, "prompt 2");
    assert_eq!(failure.kind, TaskErrorKind::QuotaExceeded);
    assert_eq!(failure.kind.status_code(), 429);
    assert!(result.is_partial());
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 5, "no task is retried");
}

#[tokio::test(start_paused = true)]
async fn test_oversized_batch_fails_fast() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![], HashSet::new()));

    let result = executor.execute_batch(prompts(11)).await;

    match result {
        Err(BatchGenError::Configuration(ConfigurationError::BatchTooLarge { size, max })) => {
            assert_eq!(size, 11);
            assert_eq!(max, 10);
        }
        other => panic!("expected BatchTooLarge, got {:?}", other),
    }
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_batch_rejected() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![], HashSet::new()));

    let error = executor.execute_batch(Vec::new()).await.unwrap_err();
    assert!(matches!(error, BatchGenError::Configuration(ConfigurationError::EmptyBatch)));
    assert_eq!(error.status_code(), 400);
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_indices_rejected_before_any_task() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![], HashSet::new()));

    let descriptors = vec![
        TaskDescriptor::new(0, "a"),
        TaskDescriptor::new(0, "b"),
        TaskDescriptor::new(7, "c"),
    ];
    let error = executor.execute_batch(descriptors).await.unwrap_err();
    assert!(matches!(
        error,
        BatchGenError::Configuration(ConfigurationError::DuplicateIndex { index: 0 })
    ));
    assert_eq!(error.status_code(), 400);

    let descriptors = vec![TaskDescriptor::new(1, "a"), TaskDescriptor::new(2, "b")];
    let error = executor.execute_batch(descriptors).await.unwrap_err();
    assert!(matches!(
        error,
        BatchGenError::Configuration(ConfigurationError::IndexOutOfRange { index: 2, size: 2 })
    ));

    assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_batch_aborts_in_flight_tasks() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![500, 500, 500], HashSet::new()));

    let cancelled = tokio::time::timeout(Duration::from_millis(100), executor.execute_batch(prompts(3))).await;
    assert!(cancelled.is_err(), "batch should still be running at 100ms");
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(recorder.spans.lock().unwrap().is_empty(), "no provider call completes after cancellation");
    assert_eq!(recorder.in_flight.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_windowing_bounds_in_flight_tasks() {
    let recorder = Arc::new(Recorder::default());
    let durations = vec![30, 10, 20, 15, 35, 5, 25];
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), durations, HashSet::new()))
        .with_concurrency_limit(3)
        .with_inter_window_delay(Duration::from_millis(100));

    let result = executor.execute_batch(prompts(7)).await.expect("batch should run");
    assert_eq!(result.summary.total, 7);
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 3);

    let spans = recorder.spans.lock().unwrap().clone();
    let window_of = |index: usize| index / 3;
    for window in 1..3 {
        let previous_end = spans
            .iter()
            .filter(|span| window_of(span.index) == window - 1)
            .map(|span| span.end)
            .max()
            .expect("previous window ran");
        let first_start = spans
            .iter()
            .filter(|span| window_of(span.index) == window)
            .map(|span| span.start)
            .min()
            .expect("window ran");
        assert!(
            first_start >= previous_end + Duration::from_millis(100),
            "window {} started before window {} settled and paused",
            window,
            window - 1
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_pacing_between_windows_only() {
    let recorder = Arc::new(Recorder::default());
    let durations = vec![100, 200, 300, 50];
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), durations, HashSet::new()))
        .with_concurrency_limit(3)
        .with_inter_window_delay(Duration::from_millis(1000));

    let started = Instant::now();
    executor.execute_batch(prompts(4)).await.expect("batch should run");
    let elapsed = started.elapsed();

    let spans = recorder.spans.lock().unwrap().clone();
    let slowest_first_window = spans
        .iter()
        .filter(|span| span.index < 3)
        .map(|span| span.end)
        .max()
        .expect("first window ran");
    let second_window_start = spans
        .iter()
        .find(|span| span.index == 3)
        .map(|span| span.start)
        .expect("second window ran");

    assert!(second_window_start >= slowest_first_window + Duration::from_millis(1000));
    assert!(elapsed >= Duration::from_millis(1350));
    assert!(elapsed < Duration::from_millis(2350), "no pause after the final window");
}

#[tokio::test(start_paused = true)]
async fn test_single_window_when_limit_exceeds_batch() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![50; 4], HashSet::new()))
        .with_concurrency_limit(8)
        .with_inter_window_delay(Duration::from_millis(1000));

    let started = Instant::now();
    let result = executor.execute_batch(prompts(4)).await.expect("batch should run");

    assert_eq!(result.summary.succeeded_count, 4);
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 4);
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn test_summary_arithmetic() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(
        recorder.clone(),
        vec![10; 6],
        HashSet::from([0, 4]),
    ))
    .with_inter_window_delay(Duration::ZERO);

    let result = executor.execute_batch(prompts(6)).await.expect("batch should run");

    assert_eq!(result.summary.total, 6);
    assert_eq!(result.summary.succeeded_count + result.summary.failed_count, 6);
    assert_eq!(result.summary.failed_count, 2);
    // tokens are 100 + index for indices 1, 2, 3, 5
    assert_eq!(result.summary.total_usage, UsageMetrics::new(200, 411));
}

#[tokio::test(start_paused = true)]
async fn test_all_failed_batch_has_zero_usage() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(
        recorder.clone(),
        vec![10; 3],
        HashSet::from([0, 1, 2]),
    ));

    let result = executor.execute_batch(prompts(3)).await.expect("failures are not errors");
    assert_eq!(result.summary.total_usage, UsageMetrics::default());
    assert_eq!(result.failed_indices(), vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_payloads_keep_their_indices() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![30, 10, 20], HashSet::new()));

    let result = executor
        .execute_batch(TaskDescriptor::from_payloads(["same", "same", "same"]))
        .await
        .expect("batch should run");

    let values: Vec<_> = result.successes.iter().map(|s| s.value["image"].clone()).collect();
    assert_eq!(values, vec![json!("img-0"), json!("img-1"), json!("img-2")]);
}

#[tokio::test(start_paused = true)]
async fn test_consistent_set_feeds_derived_inputs() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![10, 10], HashSet::new()));

    let variations = vec!["sitting".to_string(), "running".to_string()];
    let profile = GenerationProfile::default().with_style("anime");
    let result = executor
        .execute_consistent_set("cat", &variations, &profile)
        .await
        .expect("batch should run");
    assert_eq!(result.summary.succeeded_count, 2);

    let mut inputs = recorder.inputs.lock().unwrap().clone();
    inputs.sort();
    assert_eq!(
        inputs,
        vec![
            (
                0,
                "All images should maintain a consistent anime style. cat, sitting, anime style. Generate at 1024x1024 resolution."
                    .to_string()
            ),
            (
                1,
                "All images should maintain a consistent anime style. cat, running, anime style. Generate at 1024x1024 resolution."
                    .to_string()
            ),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_prompts_with_profile() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![10], HashSet::new()));

    let profile = GenerationProfile::default().with_style("anime");
    executor
        .execute_prompts(&["a cat".to_string()], &profile)
        .await
        .expect("batch should run");

    let inputs = recorder.inputs.lock().unwrap().clone();
    assert_eq!(
        inputs[0].1,
        "All images should maintain a consistent anime style. a cat. Generate at 1024x1024 resolution."
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_callback_reports_every_task() {
    let recorder = Arc::new(Recorder::default());
    let updates = Arc::new(Mutex::new(Vec::new()));
    let updates_clone = updates.clone();

    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![10; 5], HashSet::from([3])))
        .with_concurrency_limit(2)
        .with_progress_callback(move |completed, total| {
            updates_clone.lock().unwrap().push((completed, total));
        });

    executor.execute_batch(prompts(5)).await.expect("batch should run");

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 5);
    assert_eq!(*updates.last().unwrap(), (5, 5));
}

#[tokio::test(start_paused = true)]
async fn test_config_from_request_options() {
    let recorder = Arc::new(Recorder::default());
    let config = BatchConfig::from_options_json(r#"{"concurrencyLimit": 2, "interWindowDelayMs": 0, "maxBatchSize": 4}"#)
        .expect("options should parse");
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![10; 5], HashSet::new()))
        .with_config(config);

    let error = executor.execute_batch(prompts(5)).await.unwrap_err();
    assert!(error.is_configuration());

    let result = executor.execute_batch(prompts(4)).await.expect("batch should run");
    assert_eq!(result.summary.succeeded_count, 4);
    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_result_serializes_for_response_body() {
    let recorder = Arc::new(Recorder::default());
    let executor = BatchExecutor::new(simulated_provider(recorder.clone(), vec![10; 2], HashSet::from([1])));

    let result = executor.execute_batch(prompts(2)).await.expect("batch should run");
    let body = serde_json::to_value(&result).expect("result should serialize");

    assert_eq!(body["summary"]["total"], 2);
    assert_eq!(body["summary"]["succeededCount"], 1);
    assert_eq!(body["summary"]["failedCount"], 1);
    assert_eq!(body["summary"]["totalUsage"]["totalTokens"], 100);
    assert_eq!(body["failures"][0]["index"], 1);
    assert_eq!(body["failures"][0]["kind"], "quota_exceeded");
    assert!(body["batchId"].is_string());
}
