use super::*;
use crate::buffer::{BufferError, MemoryBuffer, MemoryBufferProvider};
use crate::config::SourceConfig;
use crate::producer::StartupError;
use crate::source::{MockSourceClient, SourceError};
use crate::test_utils::{make_message, topics};
use futures::StreamExt;

const INTERVAL: Duration = Duration::from_millis(5000);

fn buffer() -> Arc<MemoryBuffer> {
    Arc::new(MemoryBuffer::unbounded(BufferId::new("runtime-test")))
}

fn fill(buffer: &MemoryBuffer, names: &[&str]) {
    for name in names {
        buffer.enqueue(make_message(name));
    }
}

fn producer_config() -> ProducerConfig {
    ProducerConfig {
        receive_interval_ms: 100,
        source: SourceConfig {
            topic: "plant/#".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn test_delivers_available_messages_on_demand() {
    let buffer = buffer();
    fill(&buffer, &["a", "b", "c"]);
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    assert!(producer.demand(3));
    let batch = deliveries.recv().await.unwrap();

    assert_eq!(topics(&batch), vec!["a", "b", "c"]);
    let snapshot = producer.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_demand, 0);
    assert!(!snapshot.timer_armed());
}

#[tokio::test]
async fn test_never_delivers_more_than_demanded() {
    let buffer = buffer();
    fill(&buffer, &["a", "b", "c", "d", "e", "f"]);
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    producer.demand(4);
    let batch = deliveries.recv().await.unwrap();
    producer.snapshot().await.unwrap();

    assert_eq!(batch.len(), 4);
    assert!(deliveries.try_recv().is_none());
    assert_eq!(buffer.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_buffer_backs_off_for_interval() {
    let buffer = buffer();
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    let started = tokio::time::Instant::now();
    producer.demand(5);
    let snapshot = producer.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_demand, 5);
    assert_eq!(snapshot.retry_delay, Some(INTERVAL));

    fill(&buffer, &["a", "b"]);
    let batch = deliveries.recv().await.unwrap();

    assert_eq!(topics(&batch), vec!["a", "b"]);
    assert!(started.elapsed() >= INTERVAL);
}

#[tokio::test(start_paused = true)]
async fn test_partial_delivery_completes_as_messages_arrive() {
    let buffer = buffer();
    fill(&buffer, &["a", "b"]);
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    producer.demand(5);
    let first = deliveries.recv().await.unwrap();
    assert_eq!(topics(&first), vec!["a", "b"]);

    fill(&buffer, &["c", "d", "e", "f"]);
    let mut rest = Vec::new();
    while rest.len() < 3 {
        rest.extend(deliveries.recv().await.unwrap());
    }

    assert_eq!(topics(&rest), vec!["c", "d", "e"]);
    let snapshot = producer.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_demand, 0);
    assert!(!snapshot.timer_armed());
    assert_eq!(buffer.len(), 1);
}

#[tokio::test]
async fn test_zero_demand_ignored() {
    let buffer = buffer();
    fill(&buffer, &["a"]);
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    producer.demand(0);
    let snapshot = producer.snapshot().await.unwrap();

    assert_eq!(snapshot.pending_demand, 0);
    assert!(deliveries.try_recv().is_none());
    assert_eq!(buffer.len(), 1);
}

#[tokio::test]
async fn test_deliveries_as_stream() {
    let buffer = buffer();
    fill(&buffer, &["a", "b"]);
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    producer.demand(1);
    let first = deliveries.next().await.unwrap();
    producer.demand(1);
    let second = deliveries.next().await.unwrap();

    assert_eq!(topics(&first), vec!["a"]);
    assert_eq!(topics(&second), vec!["b"]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timer_and_closes_deliveries() {
    let buffer = buffer();
    let (producer, mut deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);

    producer.demand(3);
    assert!(producer.snapshot().await.unwrap().timer_armed());

    producer.shutdown().await;
    fill(&buffer, &["late"]);

    assert!(deliveries.recv().await.is_none());
    assert_eq!(buffer.len(), 1);
}

#[tokio::test]
async fn test_dropped_consumer_stops_producer() {
    let buffer = buffer();
    let (producer, deliveries) = Producer::from_buffer(buffer.clone(), INTERVAL);
    drop(deliveries);

    fill(&buffer, &["a"]);
    producer.demand(1);

    tokio::time::timeout(Duration::from_secs(1), async {
        while producer.is_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("producer should stop once the consumer is gone");
    assert!(!producer.demand(1));
    assert!(producer.snapshot().await.is_none());
    // The undeliverable batch was already taken from the buffer.
    assert!(buffer.is_empty());
}

async fn wait_until_stopped(source: &MockSourceClient) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while source.is_running() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("source should stop with the producer");
}

#[tokio::test]
async fn test_dropped_consumer_stops_source() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    let (producer, deliveries) = Producer::start(&producer_config(), &provider, &source)
        .await
        .unwrap();
    drop(deliveries);

    assert!(source.push(make_message("plant/1")));
    producer.demand(1);

    wait_until_stopped(&source).await;
    assert!(!source.push(make_message("plant/2")));
    let buffer = provider.lookup(producer.buffer_id()).unwrap();
    assert!(buffer.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_source() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    let (producer, _deliveries) = Producer::start(&producer_config(), &provider, &source)
        .await
        .unwrap();
    assert!(source.is_running());

    producer.shutdown().await;

    wait_until_stopped(&source).await;
    assert!(!source.push(make_message("late")));
}

#[tokio::test]
async fn test_start_binds_source_to_buffer() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    let mut config = producer_config();
    config.buffer.name = Some("plant".to_string());

    let (producer, mut deliveries) = Producer::start(&config, &provider, &source)
        .await
        .unwrap();

    assert_eq!(producer.buffer_id(), &BufferId::new("plant"));
    assert_eq!(source.started().len(), 1);
    assert_eq!(source.started()[0].topic, "plant/#");

    source.push(make_message("plant/1"));
    producer.demand(1);
    let batch = deliveries.recv().await.unwrap();
    assert_eq!(topics(&batch), vec!["plant/1"]);
}

#[tokio::test]
async fn test_start_generates_buffer_id() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();

    let (first, _d1) = Producer::start(&producer_config(), &provider, &source)
        .await
        .unwrap();
    let (second, _d2) = Producer::start(&producer_config(), &provider, &source)
        .await
        .unwrap();

    assert_ne!(first.buffer_id(), second.buffer_id());
    assert_eq!(provider.buffer_count(), 2);
}

#[tokio::test]
async fn test_start_fails_when_buffer_fails() {
    let provider = MemoryBufferProvider::unbounded();
    provider.close();
    let source = MockSourceClient::new();

    let result = Producer::start(&producer_config(), &provider, &source).await;

    assert!(matches!(
        result,
        Err(StartupError::Buffer {
            source: BufferError::AlreadyStopped,
            ..
        })
    ));
    assert!(source.started().is_empty());
}

#[tokio::test]
async fn test_start_fails_when_source_fails() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    source.set_fail_on_start("connection refused");

    let result = Producer::start(&producer_config(), &provider, &source).await;

    match result {
        Err(StartupError::Source {
            source: SourceError::Connection(reason),
            ..
        }) => assert_eq!(reason, "connection refused"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("startup should fail"),
    }
}

#[tokio::test]
async fn test_failed_source_releases_created_buffer() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    source.set_fail_on_start("connection refused");

    for _ in 0..3 {
        let result = Producer::start(&producer_config(), &provider, &source).await;
        assert!(matches!(result, Err(StartupError::Source { .. })));
    }

    assert_eq!(provider.buffer_count(), 0);
}

#[tokio::test]
async fn test_failed_source_keeps_running_buffer() {
    let provider = MemoryBufferProvider::unbounded();
    let id = BufferId::new("plant");
    provider.start(&id).await.unwrap().enqueue(make_message("backlog"));

    let source = MockSourceClient::new();
    source.set_fail_on_start("connection refused");
    let mut config = producer_config();
    config.buffer.name = Some("plant".to_string());

    let result = Producer::start(&config, &provider, &source).await;

    assert!(matches!(result, Err(StartupError::Source { .. })));
    assert_eq!(provider.lookup(&id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_rejects_invalid_config() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();
    let mut config = producer_config();
    config.source.topic = "plant/#/bad".to_string();

    let result = Producer::start(&config, &provider, &source).await;

    assert!(matches!(result, Err(StartupError::Config(_))));
    assert_eq!(provider.buffer_count(), 0);
    assert!(source.started().is_empty());
}

#[tokio::test]
async fn test_dropping_handle_stops_producer() {
    let provider = MemoryBufferProvider::unbounded();
    let source = MockSourceClient::new();

    let (producer, mut deliveries) = Producer::start(&producer_config(), &provider, &source)
        .await
        .unwrap();
    drop(producer);

    assert!(deliveries.recv().await.is_none());
    wait_until_stopped(&source).await;
}
