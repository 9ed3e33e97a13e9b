//! End-to-end mirror task scenarios against in-memory collaborators

use skein_mirror::prelude::*;
use skein_mirror::MetricsSnapshot;
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> MirrorTaskConfig {
    MirrorTaskConfig {
        poll_timeout_ms: 20,
        pause_error_retry_ms: 200,
        pause_in_flight_retry_ms: 200,
        reconcile_interval_ms: 25,
        ..Default::default()
    }
}

fn pizza_stream() -> MirrorStream {
    MirrorStream::new("pizzaStream", r"\w+Pizza")
}

fn pizza_stream_with_pauses(spec: &str) -> MirrorStream {
    pizza_stream().with_metadata(metadata_keys::PAUSED_PARTITIONS, spec)
}

fn start_task(
    consumer: Arc<MockConsumer>,
    sink: Arc<MockRecordSink>,
    metrics: Arc<MetricsCollector>,
    stream: MirrorStream,
) -> Arc<MirrorTask> {
    init_logging();
    let task = Arc::new(
        MirrorTask::new(
            "mirror-task",
            vec![stream],
            consumer,
            sink,
            metrics,
            test_config(),
        )
        .expect("task construction should succeed"),
    );
    let runner = task.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    task
}

/// Startup performs the initial config pass plus the first assignment pass.
async fn await_startup(task: &Arc<MirrorTask>) {
    let t = task.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                async move { t.status() == TaskStatus::Running && t.pause_update_count() >= 2 }
            },
            WAIT
        )
        .await,
        "task did not finish startup reconciliation"
    );
}

async fn await_written(sink: &Arc<MockRecordSink>, expected: usize) {
    let s = sink.clone();
    assert!(
        poll_until(
            move || {
                let s = s.clone();
                async move { s.written_count() == expected }
            },
            WAIT
        )
        .await,
        "expected {} records downstream, got {}",
        expected,
        sink.written_count()
    );
}

fn config_paused_gauge(snapshot: &MetricsSnapshot) -> Option<i64> {
    snapshot.gauge(&format!(
        "{}{{task=mirror-task,stream=pizzaStream}}",
        metric_names::NUM_CONFIG_PAUSED_PARTITIONS
    ))
}

fn error_paused_gauge(snapshot: &MetricsSnapshot) -> Option<i64> {
    snapshot.gauge(&format!(
        "{}{{task=mirror-task,stream=pizzaStream}}",
        metric_names::NUM_AUTO_PAUSED_PARTITIONS_ON_ERROR
    ))
}

async fn stop_and_await(task: &Arc<MirrorTask>) {
    task.stop();
    assert!(
        task.await_stop(Duration::from_secs(30)).await,
        "task did not shut down on time"
    );
}

#[tokio::test]
async fn test_mirrors_only_topics_matching_pattern() {
    let consumer = Arc::new(
        MockConsumer::new()
            .with_topic("YummyPizza", 1)
            .with_topic("SaltyPizza", 1)
            .with_topic("HealthySalad", 1),
    );
    let sink = Arc::new(MockRecordSink::new());
    let task = start_task(
        consumer.clone(),
        sink.clone(),
        Arc::new(MetricsCollector::new()),
        pizza_stream(),
    );
    await_startup(&task).await;

    consumer.produce("YummyPizza", Some("key-0"), "yummy");
    consumer.produce("SaltyPizza", Some("key-0"), "salty");
    consumer.produce("HealthySalad", Some("key-0"), "salad");

    await_written(&sink, 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.written_count(), 2, "salad topic must not be mirrored");
    for record in sink.written() {
        assert!(
            record.topic.ends_with("Pizza"),
            "unexpected record from topic {}",
            record.topic
        );
    }

    let diagnostics = task.diagnostics().await;
    assert!(diagnostics.is_assigned(&PartitionKey::new("YummyPizza", 0)));
    assert!(diagnostics.is_assigned(&PartitionKey::new("SaltyPizza", 0)));
    assert!(!diagnostics.is_assigned(&PartitionKey::new("HealthySalad", 0)));

    stop_and_await(&task).await;
}

#[tokio::test]
async fn test_config_pause_and_resume_partitions() {
    let consumer = Arc::new(
        MockConsumer::new()
            .with_topic("YummyPizza", 1)
            .with_topic("SaltyPizza", 1)
            .with_topic("SpicyPizza", 1),
    );
    let sink = Arc::new(MockRecordSink::new());
    let metrics = Arc::new(MetricsCollector::new());
    let task = start_task(
        consumer.clone(),
        sink.clone(),
        metrics.clone(),
        pizza_stream(),
    );
    await_startup(&task).await;
    let baseline = task.pause_update_count();
    assert!(task.paused_partitions_config().await.is_empty());

    consumer.produce("YummyPizza", Some("key-0"), "a");
    consumer.produce("SaltyPizza", Some("key-0"), "b");
    consumer.produce("SpicyPizza", Some("key-0"), "c");
    await_written(&sink, 3).await;

    // pause YummyPizza partition 0 and all of SpicyPizza
    let paused = pizza_stream_with_pauses(r#"{"YummyPizza":["0"],"SpicyPizza":["*"]}"#);
    assert!(task.check_for_update(&[paused.clone()]).await.unwrap());
    assert_eq!(task.pause_update_count(), baseline + 1);

    let config = task.paused_partitions_config().await;
    assert_eq!(config.len(), 2);
    assert_eq!(config["YummyPizza"], std::collections::BTreeSet::from([0]));
    assert_eq!(config["SpicyPizza"], std::collections::BTreeSet::from([0]));
    assert_eq!(config_paused_gauge(&metrics.snapshot()), Some(2));

    // only the unpaused topic flows
    consumer.produce("YummyPizza", Some("key-1"), "d");
    consumer.produce("SaltyPizza", Some("key-1"), "e");
    consumer.produce("SpicyPizza", Some("key-1"), "f");
    await_written(&sink, 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.written_count(), 4);

    // identical update: no pass, no counter change, no consumer calls
    let pauses_before = consumer.pause_calls();
    let resumes_before = consumer.resume_calls();
    assert!(!task.check_for_update(&[paused]).await.unwrap());
    assert_eq!(task.pause_update_count(), baseline + 1);
    assert_eq!(consumer.pause_calls(), pauses_before);
    assert_eq!(consumer.resume_calls(), resumes_before);

    // swapped tokens resolve to the same effective set: still a no-op
    let swapped = pizza_stream_with_pauses(r#"{"YummyPizza":["*"],"SpicyPizza":["0"]}"#);
    assert!(!task.check_for_update(&[swapped]).await.unwrap());
    assert_eq!(task.pause_update_count(), baseline + 1);
    assert_eq!(config_paused_gauge(&metrics.snapshot()), Some(2));

    // a reassignment always reconciles, even when nothing changes
    let assignment: AssignmentSet = [
        PartitionKey::new("YummyPizza", 0),
        PartitionKey::new("SaltyPizza", 0),
        PartitionKey::new("SpicyPizza", 0),
    ]
    .into_iter()
    .collect();
    task.on_partitions_assigned(assignment).await.unwrap();
    assert_eq!(task.pause_update_count(), baseline + 2);
    assert_eq!(task.paused_partitions_config().await.len(), 2);

    // resume everything
    let resumed = pizza_stream_with_pauses("");
    assert!(task.check_for_update(&[resumed]).await.unwrap());
    assert_eq!(task.pause_update_count(), baseline + 3);
    assert!(task.paused_partitions_config().await.is_empty());
    assert_eq!(config_paused_gauge(&metrics.snapshot()), Some(0));
    await_written(&sink, 6).await;

    stop_and_await(&task).await;
}

#[tokio::test]
async fn test_auto_pause_on_send_failure_then_manual_override() {
    let consumer = Arc::new(MockConsumer::new().with_topic("YummyPizza", 1));
    let sink = Arc::new(MockRecordSink::new().fail_when(|record| {
        record.key.as_deref() == Some(b"key-2".as_slice())
    }));
    let metrics = Arc::new(MetricsCollector::new());
    let task = start_task(
        consumer.clone(),
        sink.clone(),
        metrics.clone(),
        pizza_stream(),
    );
    await_startup(&task).await;

    for i in 0..5 {
        consumer.produce("YummyPizza", Some(&format!("key-{i}")), &format!("event-{i}"));
    }

    let key = PartitionKey::new("YummyPizza", 0);
    let t = task.clone();
    let probe = key.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                let probe = probe.clone();
                async move { t.auto_paused_partitions().await.contains(&probe) }
            },
            WAIT
        )
        .await,
        "partition did not auto-pause after send failure"
    );
    assert_eq!(
        sink.written_count(),
        2,
        "only pre-failure records should have been delivered"
    );
    assert_eq!(error_paused_gauge(&metrics.snapshot()), Some(1));

    // a manual pause covering the partition takes over the suppression
    let paused = pizza_stream_with_pauses(r#"{"YummyPizza":["0"]}"#);
    assert!(task.check_for_update(&[paused]).await.unwrap());
    let t = task.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                async move {
                    t.auto_paused_partitions().await.is_empty()
                        && t.paused_partitions_config().await.len() == 1
                }
            },
            WAIT
        )
        .await,
        "manual pause did not supersede the auto-pause entry"
    );
    assert!(consumer.is_paused(&key));

    // clear the failure and lift the manual pause: delivery resumes from
    // the rewound offset
    sink.clear_fail_condition();
    let resumed = pizza_stream_with_pauses("");
    assert!(task.check_for_update(&[resumed]).await.unwrap());

    await_written(&sink, 5).await;
    let values: Vec<String> = sink
        .written()
        .iter()
        .map(|r| String::from_utf8_lossy(&r.value).to_string())
        .collect();
    for i in 0..5 {
        assert!(
            values.contains(&format!("event-{i}")),
            "event-{i} missing downstream"
        );
    }

    stop_and_await(&task).await;
}

#[tokio::test]
async fn test_auto_pause_and_auto_resume_on_send_failure() {
    let consumer = Arc::new(MockConsumer::new().with_topic("YummyPizza", 1));
    let sink = Arc::new(MockRecordSink::new().fail_when(|record| {
        record.key.as_deref() == Some(b"key-2".as_slice())
    }));
    let metrics = Arc::new(MetricsCollector::new());
    let task = start_task(
        consumer.clone(),
        sink.clone(),
        metrics.clone(),
        pizza_stream(),
    );
    await_startup(&task).await;

    for i in 0..5 {
        consumer.produce("YummyPizza", Some(&format!("key-{i}")), &format!("event-{i}"));
    }

    let key = PartitionKey::new("YummyPizza", 0);
    let t = task.clone();
    let probe = key.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                let probe = probe.clone();
                async move { t.auto_paused_partitions().await.contains(&probe) }
            },
            WAIT
        )
        .await,
        "partition did not auto-pause after send failure"
    );
    assert_eq!(sink.written_count(), 2);

    // once the failure clears, the retry timer resumes the partition and
    // the next delivery acts as the successful probe
    sink.clear_fail_condition();
    let t = task.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                async move { t.auto_paused_partitions().await.is_empty() }
            },
            WAIT
        )
        .await,
        "auto-paused partition did not auto-resume"
    );

    await_written(&sink, 5).await;
    assert_eq!(error_paused_gauge(&metrics.snapshot()), Some(0));
    assert!(!consumer.is_paused(&key));

    stop_and_await(&task).await;
}

#[tokio::test]
async fn test_auto_pause_on_in_flight_backpressure() {
    init_logging();
    let consumer = Arc::new(MockConsumer::new().with_topic("YummyPizza", 1));
    let sink = Arc::new(MockRecordSink::new().with_latency(Duration::from_millis(30)));
    let mut config = test_config();
    config.max_in_flight_per_partition = 2;

    let task = Arc::new(
        MirrorTask::new(
            "mirror-task",
            vec![pizza_stream()],
            consumer.clone(),
            sink.clone(),
            Arc::new(NoopMetrics),
            config,
        )
        .unwrap(),
    );
    let runner = task.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });
    await_startup(&task).await;

    for i in 0..8 {
        consumer.produce("YummyPizza", Some(&format!("key-{i}")), &format!("event-{i}"));
    }

    // the backlog exceeds the limit, pausing fetches for the partition
    let t = task.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                async move {
                    !t.diagnostics()
                        .await
                        .auto_paused_on_in_flight_messages
                        .is_empty()
                }
            },
            WAIT
        )
        .await,
        "partition did not pause on in-flight backpressure"
    );

    // draining the backlog clears the pause and everything is delivered
    await_written(&sink, 8).await;
    let t = task.clone();
    assert!(
        poll_until(
            move || {
                let t = t.clone();
                async move { t.auto_paused_partitions().await.is_empty() }
            },
            WAIT
        )
        .await,
        "backpressure pause was not cleared after draining"
    );

    stop_and_await(&task).await;
}

#[tokio::test]
async fn test_conflicting_group_ids_prevent_startup() {
    init_logging();
    let streams = vec![
        MirrorStream::new("stream1", "topic").with_metadata(metadata_keys::GROUP_ID, "group-a"),
        MirrorStream::new("stream2", "topic").with_metadata(metadata_keys::GROUP_ID, "group-b"),
    ];
    let result = MirrorTask::new(
        "mirror-task",
        streams,
        Arc::new(MockConsumer::new()),
        Arc::new(MockRecordSink::new()),
        Arc::new(NoopMetrics),
        MirrorTaskConfig::default(),
    );
    assert!(matches!(result, Err(ref e) if e.is_fatal()));
}

#[tokio::test]
async fn test_await_stop_times_out_while_running() {
    let consumer = Arc::new(MockConsumer::new().with_topic("YummyPizza", 1));
    let sink = Arc::new(MockRecordSink::new());
    let task = start_task(
        consumer,
        sink,
        Arc::new(MetricsCollector::new()),
        pizza_stream(),
    );
    await_startup(&task).await;

    assert!(!task.await_stop(Duration::from_millis(50)).await);
    assert_eq!(task.status(), TaskStatus::Running);

    task.stop();
    assert!(task.await_stop(Duration::from_secs(5)).await);
    assert_eq!(task.status(), TaskStatus::Stopped);

    // stop is idempotent
    task.stop();
    assert_eq!(task.status(), TaskStatus::Stopped);
}
