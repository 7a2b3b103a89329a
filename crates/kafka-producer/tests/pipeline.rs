//! End-to-end tests of the publishing pipeline against the in-process
//! transport: workers, shared lifecycle, publisher and outcome sink together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sensor_kafka_producer::{
    completion_channel, AckMode, BatchedPublisher, CollectingSink, MemoryTransport, OutcomeName,
    Phase, PublisherFactory, PublisherLifecycle, Worker, REQUEST_TYPE,
};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn lifecycle_with(
    mode: AckMode,
    configure: fn(MemoryTransport) -> MemoryTransport,
) -> (Arc<PublisherLifecycle>, Arc<CollectingSink>, Arc<AtomicUsize>) {
    init_logging();
    let sink = Arc::new(CollectingSink::new());
    let constructed = Arc::new(AtomicUsize::new(0));

    let factory: PublisherFactory = {
        let sink = Arc::clone(&sink);
        let constructed = Arc::clone(&constructed);
        Box::new(move || {
            constructed.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = completion_channel();
            let transport = configure(MemoryTransport::new(tx, mode));
            Ok(BatchedPublisher::new(
                Box::new(transport),
                rx,
                sink.clone(),
                Duration::from_millis(20),
            ))
        })
    };

    let lifecycle = Arc::new(PublisherLifecycle::new(factory, Duration::from_secs(2)));
    (lifecycle, sink, constructed)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_workers_hundred_ticks_each() {
    let (lifecycle, sink, constructed) = lifecycle_with(AckMode::OnFlush, |t| t);

    // Everyone registers before anyone can deregister.
    let registered = Arc::new(Barrier::new(10));
    let mut handles = Vec::new();
    for _ in 0..10 {
        let lifecycle = Arc::clone(&lifecycle);
        let registered = Arc::clone(&registered);
        handles.push(tokio::spawn(async move {
            let worker = Worker::new(lifecycle.start().await.unwrap());
            registered.wait().await;
            for _ in 0..100 {
                worker.tick().await;
            }
            lifecycle.stop().await
        }));
    }

    let mut reports = Vec::new();
    for handle in handles {
        if let Some(report) = handle.await.unwrap() {
            reports.push(report);
        }
    }

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(reports.len(), 1, "only the last stop flushes");
    assert_eq!(reports[0].unresolved, 0);
    assert_eq!(lifecycle.phase().await, Phase::Closed);

    let events = sink.events();
    assert_eq!(events.len(), 1000);
    assert_eq!(sink.count(OutcomeName::ProduceOk), 1000);
    assert_eq!(sink.count(OutcomeName::ProduceError), 0);
    assert_eq!(sink.count(OutcomeName::LocalBufferFull), 0);
    assert_eq!(sink.count(OutcomeName::Exception), 0);
    assert!(events.iter().all(|e| e.request_type == REQUEST_TYPE));
}

#[tokio::test]
async fn test_fifth_buffered_message_fails() {
    let (lifecycle, sink, _) = lifecycle_with(AckMode::Immediate, |t| {
        t.fail_message(5).with_failure_reason("Broker: Not enough in-sync replicas")
    });

    let worker = Worker::new(lifecycle.start().await.unwrap());
    for _ in 0..10 {
        worker.tick().await;
    }
    lifecycle.stop().await.unwrap();

    let events = sink.events();
    assert_eq!(events.len(), 10);
    assert_eq!(sink.count(OutcomeName::ProduceError), 1);
    assert_eq!(sink.count(OutcomeName::ProduceOk), 9);

    let failed = &events[4];
    assert_eq!(failed.name, OutcomeName::ProduceError);
    assert_eq!(
        failed.error.as_deref(),
        Some("Broker: Not enough in-sync replicas")
    );
    assert_eq!(failed.response_length, None);
}

#[tokio::test]
async fn test_saturated_buffer_degrades_without_failing() {
    let (lifecycle, sink, _) = lifecycle_with(AckMode::Never, |t| t.with_capacity(3));

    let worker = Worker::new(lifecycle.start().await.unwrap());
    let started = Instant::now();
    for _ in 0..5 {
        worker.tick().await;
    }
    let elapsed = started.elapsed();

    // Three fit, the next two each wait out the backpressure interval.
    assert!(elapsed >= Duration::from_millis(40));
    assert!(elapsed < Duration::from_millis(200));
    assert_eq!(sink.count(OutcomeName::LocalBufferFull), 2);
    assert!(sink
        .events()
        .iter()
        .all(|e| e.response_time_ms == 0.0 && e.error.as_deref() == Some("Buffer Full")));

    let report = lifecycle.shutdown().await.unwrap();
    assert!(report.timed_out);
    assert_eq!(report.unresolved, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paced_workers_stop_on_cancel() {
    let (lifecycle, sink, _) = lifecycle_with(AckMode::Immediate, |t| t);
    let cancel = CancellationToken::new();
    let registered = Arc::new(Barrier::new(3));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let lifecycle = Arc::clone(&lifecycle);
        let cancel = cancel.clone();
        let registered = Arc::clone(&registered);
        handles.push(tokio::spawn(async move {
            let worker = Worker::new(lifecycle.start().await.unwrap());
            registered.wait().await;
            let ticks = worker.run_paced(Duration::from_millis(5), cancel).await;
            lifecycle.stop().await;
            ticks
        }));
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    cancel.cancel();

    let mut ticks = 0;
    for handle in handles {
        ticks += handle.await.unwrap();
    }

    assert!(ticks >= 3);
    assert_eq!(sink.events().len() as u64, ticks);
    assert_eq!(lifecycle.phase().await, Phase::Closed);
}
