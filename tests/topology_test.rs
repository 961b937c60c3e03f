//! Computation topology runtime integration tests

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use common::{init_test_logging, CountingStore};
use tasker_bulk::config::TopologyConfig;
use tasker_bulk::overflow::{MokaOverflowStore, OverflowRecordFilter};
use tasker_bulk::topology::{
    Computation, ComputationContext, ComputationDefinition, ComputationError, Record,
    StreamDefinition, StreamProcessor, TopologyBuilder,
};

const TIMEOUT: Duration = Duration::from_secs(10);

type Seen = Arc<Mutex<Vec<(usize, Record)>>>;

struct Collector {
    seen: Seen,
    delay: Duration,
}

#[async_trait]
impl Computation for Collector {
    async fn process_record(
        &mut self,
        ctx: &ComputationContext,
        _input_stream: &str,
        record: Record,
    ) -> Result<(), ComputationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().push((ctx.partition(), record));
        Ok(())
    }
}

fn collector(name: &str, stream: &str, concurrency: usize, seen: &Seen, delay: Duration) -> ComputationDefinition {
    let seen = Arc::clone(seen);
    ComputationDefinition::new(
        name,
        Arc::new(move || {
            Box::new(Collector {
                seen: Arc::clone(&seen),
                delay,
            }) as Box<dyn Computation>
        }),
    )
    .with_inputs([stream])
    .with_concurrency(concurrency)
}

fn config() -> TopologyConfig {
    init_test_logging();
    TopologyConfig {
        retry_delay_ms: 1,
        ..TopologyConfig::default()
    }
}

#[tokio::test]
async fn test_same_key_reaches_same_instance_in_order() {
    let seen: Seen = Arc::default();
    let topology = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("buckets"))
        .add_computation(collector("sink", "buckets", 4, &seen, Duration::ZERO))
        .build()
        .unwrap();
    let processor = StreamProcessor::start(topology, &config()).unwrap();

    for seq in 0..200u32 {
        let key = format!("command-{}", seq % 20);
        processor
            .append("buckets", Record::new(key, seq.to_be_bytes().to_vec()))
            .await
            .unwrap();
    }
    assert!(processor.await_idle(TIMEOUT).await);

    let seen = seen.lock();
    assert_eq!(seen.len(), 200);
    let mut partitions: HashMap<String, usize> = HashMap::new();
    let mut last_seq: HashMap<String, u32> = HashMap::new();
    for (partition, record) in seen.iter() {
        let owner = *partitions.entry(record.key().to_string()).or_insert(*partition);
        assert_eq!(owner, *partition, "key {} changed instance", record.key());

        let seq = u32::from_be_bytes(record.data().try_into().unwrap());
        if let Some(previous) = last_seq.insert(record.key().to_string(), seq) {
            assert!(previous < seq, "key {} out of order", record.key());
        }
    }
    assert_eq!(processor.stats("sink").unwrap().processed, 200);
    processor.shutdown(TIMEOUT).await.unwrap();
}

struct Flaky {
    attempts: Arc<AtomicUsize>,
    failures: usize,
}

#[async_trait]
impl Computation for Flaky {
    async fn process_record(
        &mut self,
        _ctx: &ComputationContext,
        _input_stream: &str,
        _record: Record,
    ) -> Result<(), ComputationError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(ComputationError::retryable("repository busy"));
        }
        Ok(())
    }
}

fn flaky(attempts: &Arc<AtomicUsize>, failures: usize) -> ComputationDefinition {
    let attempts = Arc::clone(attempts);
    ComputationDefinition::new(
        "flaky",
        Arc::new(move || {
            Box::new(Flaky {
                attempts: Arc::clone(&attempts),
                failures,
            }) as Box<dyn Computation>
        }),
    )
    .with_inputs(["in"])
    .with_concurrency(1)
}

#[tokio::test]
async fn test_transient_failures_are_redelivered() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let topology = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("in"))
        .add_computation(flaky(&attempts, 2))
        .build()
        .unwrap();
    let processor = StreamProcessor::start(topology, &config()).unwrap();

    processor.append("in", Record::new("k", b"x".to_vec())).await.unwrap();
    assert!(processor.await_idle(TIMEOUT).await);

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let stats = processor.stats("flaky").unwrap();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.dropped, 0);
}

#[tokio::test]
async fn test_exhausted_retries_drop_the_record() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let topology = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("in"))
        .add_computation(flaky(&attempts, usize::MAX))
        .build()
        .unwrap();
    let config = TopologyConfig {
        max_retries: 2,
        ..config()
    };
    let processor = StreamProcessor::start(topology, &config).unwrap();

    processor.append("in", Record::new("k", b"x".to_vec())).await.unwrap();
    assert!(processor.await_idle(TIMEOUT).await);

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(processor.stats("flaky").unwrap().dropped, 1);
}

#[tokio::test]
async fn test_slow_consumer_applies_back_pressure_without_loss() {
    let seen: Seen = Arc::default();
    let topology = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("in"))
        .add_computation(collector("slow", "in", 1, &seen, Duration::from_millis(5)))
        .build()
        .unwrap();
    let config = TopologyConfig {
        channel_capacity: 1,
        ..config()
    };
    let processor = StreamProcessor::start(topology, &config).unwrap();

    let started = tokio::time::Instant::now();
    for i in 0..20u8 {
        processor.append("in", Record::new("k", vec![i])).await.unwrap();
    }
    // With one slot the producer had to wait for most records to be consumed
    assert!(started.elapsed() >= Duration::from_millis(50));

    assert!(processor.await_idle(TIMEOUT).await);
    let data: Vec<u8> = seen.lock().iter().map(|(_, r)| r.data()[0]).collect();
    assert_eq!(data, (0..20u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unresolvable_overflow_reference_is_delivered_as_data_loss() {
    let store = Arc::new(CountingStore::new(Arc::new(MokaOverflowStore::new(
        1024 * 1024,
        Duration::from_secs(60),
    ))));
    store.lose_entries.store(true, Ordering::SeqCst);
    let filter = Arc::new(OverflowRecordFilter::new(store.clone(), 8, "overflow:"));

    let seen: Seen = Arc::default();
    let topology = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("big").with_filter(filter))
        .add_computation(collector("sink", "big", 1, &seen, Duration::ZERO))
        .build()
        .unwrap();
    let processor = StreamProcessor::start(topology, &config()).unwrap();

    processor.append("big", Record::new("k", vec![0u8; 64])).await.unwrap();
    processor.append("big", Record::new("k", vec![1u8; 4])).await.unwrap();
    assert!(processor.await_idle(TIMEOUT).await);

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].1.is_data_loss());
    assert!(seen[0].1.data().is_empty());
    assert!(!seen[1].1.is_data_loss());
    assert_eq!(seen[1].1.data(), &[1u8; 4]);
}

#[tokio::test]
async fn test_invalid_topologies_are_rejected() {
    let seen: Seen = Arc::default();

    let unknown = TopologyBuilder::new()
        .add_computation(collector("sink", "missing", 1, &seen, Duration::ZERO))
        .build();
    assert!(unknown.is_err());

    let duplicate = TopologyBuilder::new()
        .add_stream(StreamDefinition::new("in"))
        .add_computation(collector("sink", "in", 1, &seen, Duration::ZERO))
        .add_computation(collector("sink", "in", 1, &seen, Duration::ZERO))
        .build();
    assert!(duplicate.is_err());
}
