//! # Stream Processor
//!
//! Runs a validated [`Topology`]: one Tokio task per computation partition, each
//! fed by a bounded mpsc channel. A record appended to a stream is offered to
//! every consuming computation and routed to the partition owning its key, so
//! all records sharing a key reach the same instance in append order.
//!
//! ## Delivery
//!
//! - Appending waits while the target channel is full (back-pressure).
//! - Retryable failures are redelivered to the same instance after
//!   `retry_delay`, up to `max_retries` times. Records produced by a failed
//!   attempt are not withdrawn, so delivery downstream is at-least-once.
//! - Panics are caught and handled like retryable failures.
//! - Permanent failures and exhausted retries drop the record after logging.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use opentelemetry::KeyValue;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::builder::Topology;
use super::computation::{Computation, ComputationContext, ComputationMetadata};
use super::errors::TopologyError;
use super::filter::RecordFilter;
use super::partition::partition_for;
use super::record::{Record, RecordPayload};
use crate::config::TopologyConfig;
use crate::error::panic_message;
use crate::metrics;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Envelope {
    stream: Arc<str>,
    record: Record,
}

struct Subscriber {
    computation: Arc<str>,
    instances: Vec<mpsc::Sender<Envelope>>,
}

struct StreamRoute {
    partitions: Option<usize>,
    filters: Vec<Arc<dyn RecordFilter>>,
    subscribers: Vec<Subscriber>,
}

/// Per-computation counters
#[derive(Debug, Default)]
struct ComputationCounters {
    processed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
    panicked: AtomicU64,
}

/// Snapshot of a computation's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ComputationStats {
    pub processed: u64,
    pub retried: u64,
    pub dropped: u64,
    pub panicked: u64,
}

impl ComputationCounters {
    fn snapshot(&self) -> ComputationStats {
        ComputationStats {
            processed: self.processed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Shared routing table used by appenders and computation contexts
pub(crate) struct StreamRouter {
    streams: HashMap<String, StreamRoute>,
    accepting: AtomicBool,
    in_flight: AtomicI64,
}

impl StreamRouter {
    pub(crate) async fn append(&self, stream: &str, record: Record) -> Result<(), TopologyError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(TopologyError::ShutDown);
        }
        let route = self
            .streams
            .get(stream)
            .ok_or_else(|| TopologyError::UnknownStream(stream.to_string()))?;

        let mut record = record;
        for filter in &route.filters {
            record = filter
                .before_append(stream, record)
                .await
                .map_err(|e| TopologyError::Filter {
                    filter: filter.name().to_string(),
                    reason: e.to_string(),
                })?;
        }

        if route.subscribers.is_empty() {
            debug!(stream = %stream, key = %record.key(), "No consumer for stream, record discarded");
            return Ok(());
        }

        let stream_name: Arc<str> = Arc::from(stream);
        for subscriber in &route.subscribers {
            let instances = subscriber.instances.len();
            let partition =
                partition_for(record.key(), route.partitions.unwrap_or(instances)) % instances;
            let envelope = Envelope {
                stream: Arc::clone(&stream_name),
                record: record.clone(),
            };
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            if subscriber.instances[partition].send(envelope).await.is_err() {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                warn!(
                    stream = %stream,
                    computation = %subscriber.computation,
                    partition = partition,
                    "Computation instance no longer receiving"
                );
                return Err(TopologyError::StreamClosed(stream.to_string()));
            }
        }
        Ok(())
    }

    /// Apply read-side filters; an unreadable payload becomes a data-loss record
    async fn read_through(&self, stream: &str, record: Record) -> Record {
        let Some(route) = self.streams.get(stream) else {
            return record;
        };

        let mut record = record;
        for filter in route.filters.iter().rev() {
            let key = record.key().to_string();
            let reference = record.overflow_reference().unwrap_or(&key).to_string();
            let shell = record.without_payload();
            record = match filter.after_read(stream, record).await {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        stream = %stream,
                        key = %key,
                        filter = %filter.name(),
                        error = %e,
                        "Record payload lost on read"
                    );
                    shell.with_payload(RecordPayload::Lost {
                        reference,
                        reason: e.to_string(),
                    })
                }
            };
        }
        record
    }
}

/// Running topology
pub struct StreamProcessor {
    router: Arc<StreamRouter>,
    counters: HashMap<String, Arc<ComputationCounters>>,
    metadata: Vec<ComputationMetadata>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl StreamProcessor {
    /// Spawn every computation instance; must be called within a Tokio runtime
    pub fn start(topology: Topology, config: &TopologyConfig) -> Result<Self, TopologyError> {
        let (shutdown_tx, _) = watch::channel(false);

        let mut routes: HashMap<String, StreamRoute> = topology
            .streams()
            .iter()
            .map(|stream| {
                (
                    stream.name.clone(),
                    StreamRoute {
                        partitions: stream.partitions,
                        filters: stream.filters.clone(),
                        subscribers: Vec::new(),
                    },
                )
            })
            .collect();

        let mut pending = Vec::new();
        let mut counters = HashMap::new();
        for definition in topology.computations() {
            let concurrency = definition.concurrency.unwrap_or(config.default_concurrency);
            if concurrency == 0 {
                return Err(TopologyError::InvalidTopology(format!(
                    "computation {} must run at least one instance",
                    definition.name
                )));
            }
            let name: Arc<str> = Arc::from(definition.name.as_str());

            let mut senders = Vec::with_capacity(concurrency);
            let mut receivers = Vec::with_capacity(concurrency);
            for _ in 0..concurrency {
                let (tx, rx) = mpsc::channel(config.channel_capacity);
                senders.push(tx);
                receivers.push(rx);
            }

            for input in &definition.inputs {
                let route = routes
                    .get_mut(input)
                    .ok_or_else(|| TopologyError::UnknownStream(input.clone()))?;
                route.subscribers.push(Subscriber {
                    computation: Arc::clone(&name),
                    instances: senders.clone(),
                });
            }

            let computation_counters = Arc::new(ComputationCounters::default());
            counters.insert(definition.name.clone(), Arc::clone(&computation_counters));

            let outputs: Arc<HashSet<String>> =
                Arc::new(definition.outputs.iter().cloned().collect());
            for (partition, rx) in receivers.into_iter().enumerate() {
                pending.push((
                    Arc::clone(&name),
                    partition,
                    Arc::clone(&outputs),
                    (definition.factory)(),
                    rx,
                    Arc::clone(&computation_counters),
                ));
            }
        }

        let router = Arc::new(StreamRouter {
            streams: routes,
            accepting: AtomicBool::new(true),
            in_flight: AtomicI64::new(0),
        });

        let retry = RetryPolicy {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        };

        let mut handles = Vec::with_capacity(pending.len());
        for (name, partition, outputs, computation, rx, counters) in pending {
            let ctx = ComputationContext::new(name, partition, outputs, Arc::clone(&router));
            let instance = InstanceRunner {
                computation,
                ctx,
                rx,
                shutdown: shutdown_tx.subscribe(),
                router: Arc::clone(&router),
                counters,
                retry,
            };
            handles.push(tokio::spawn(instance.run()));
        }

        info!(
            streams = topology.streams().len(),
            computations = topology.computations().len(),
            instances = handles.len(),
            "Stream processor started"
        );

        Ok(Self {
            router,
            counters,
            metadata: topology
                .computations()
                .iter()
                .map(|definition| definition.metadata())
                .collect(),
            handles: parking_lot::Mutex::new(handles),
            shutdown_tx,
        })
    }

    /// Append a record to a stream from outside the topology
    pub async fn append(&self, stream: &str, record: Record) -> Result<(), TopologyError> {
        self.router.append(stream, record).await
    }

    /// Records delivered to an instance and not yet fully processed
    pub fn in_flight(&self) -> i64 {
        self.router.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no record is in flight; returns false on timeout
    pub async fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.in_flight() <= 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    pub fn stats(&self, computation: &str) -> Option<ComputationStats> {
        self.counters.get(computation).map(|c| c.snapshot())
    }

    pub fn computations(&self) -> &[ComputationMetadata] {
        &self.metadata
    }

    /// Stop accepting appends, drain in-flight records, then stop every instance
    ///
    /// Instances still busy when `timeout` elapses are aborted.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), TopologyError> {
        self.router.accepting.store(false, Ordering::Release);
        let started = Instant::now();
        let drained = self.await_idle(timeout).await;
        self.shutdown_tx.send_replace(true);

        let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let remaining = timeout.saturating_sub(started.elapsed());
        let joined = tokio::time::timeout(remaining, futures::future::join_all(handles.iter_mut()))
            .await
            .is_ok();
        if !joined {
            for handle in &handles {
                handle.abort();
            }
        }

        if drained && joined {
            info!("Stream processor shut down");
            Ok(())
        } else {
            warn!(
                in_flight = self.in_flight(),
                "Stream processor shutdown timed out, remaining instances aborted"
            );
            Err(TopologyError::Timeout(timeout))
        }
    }
}

impl Drop for StreamProcessor {
    fn drop(&mut self) {
        self.router.accepting.store(false, Ordering::Release);
        self.shutdown_tx.send_replace(true);
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("computations", &self.metadata)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

struct InstanceRunner {
    computation: Box<dyn Computation>,
    ctx: ComputationContext,
    rx: mpsc::Receiver<Envelope>,
    shutdown: watch::Receiver<bool>,
    router: Arc<StreamRouter>,
    counters: Arc<ComputationCounters>,
    retry: RetryPolicy,
}

impl InstanceRunner {
    async fn run(mut self) {
        let initialized = match self.computation.init(&self.ctx).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    computation = %self.ctx.computation(),
                    partition = self.ctx.partition(),
                    error = %e,
                    "Computation failed to initialize, its records will be dropped"
                );
                false
            }
        };

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let envelope = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                envelope = self.rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            if initialized {
                self.deliver(envelope).await;
            } else {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            self.router.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        self.computation.destroy().await;
        debug!(
            computation = %self.ctx.computation(),
            partition = self.ctx.partition(),
            "Computation instance stopped"
        );
    }

    async fn deliver(&mut self, envelope: Envelope) {
        let stream = envelope.stream;
        let record = self.router.read_through(&stream, envelope.record).await;
        let labels = [
            KeyValue::new("computation", self.ctx.computation().to_string()),
            KeyValue::new("stream", stream.to_string()),
        ];

        let mut attempt: u32 = 0;
        loop {
            let outcome = AssertUnwindSafe(self.computation.process_record(
                &self.ctx,
                &stream,
                record.clone(),
            ))
            .catch_unwind()
            .await;

            match outcome {
                Ok(Ok(())) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    metrics::topology::records_processed_total().add(1, &labels);
                    return;
                }
                Ok(Err(e)) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        computation = %self.ctx.computation(),
                        stream = %stream,
                        key = %record.key(),
                        attempt = attempt,
                        error = %e,
                        "Computation failed, redelivering record"
                    );
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    metrics::topology::records_retried_total().add(1, &labels);
                    tokio::time::sleep(self.retry.delay).await;
                }
                Ok(Err(e)) => {
                    error!(
                        computation = %self.ctx.computation(),
                        stream = %stream,
                        key = %record.key(),
                        attempts = attempt + 1,
                        error = %e,
                        "Computation failed, record dropped"
                    );
                    self.drop_record(&stream, &record, &e.to_string(), &labels).await;
                    return;
                }
                Err(panic) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        computation = %self.ctx.computation(),
                        stream = %stream,
                        key = %record.key(),
                        attempt = attempt,
                        panic_msg = %panic_message(panic.as_ref()),
                        "Computation panicked, redelivering record"
                    );
                    self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    metrics::topology::records_retried_total().add(1, &labels);
                    tokio::time::sleep(self.retry.delay).await;
                }
                Err(panic) => {
                    error!(
                        computation = %self.ctx.computation(),
                        stream = %stream,
                        key = %record.key(),
                        attempts = attempt + 1,
                        panic_msg = %panic_message(panic.as_ref()),
                        "Computation panicked, record dropped"
                    );
                    self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    let reason = format!("panicked: {}", panic_message(panic.as_ref()));
                    self.drop_record(&stream, &record, &reason, &labels).await;
                    return;
                }
            }
        }
    }

    /// Count a dropped record and let the computation account for it
    async fn drop_record(&mut self, stream: &str, record: &Record, reason: &str, labels: &[KeyValue]) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::topology::records_dropped_total().add(1, labels);

        let hook = self.computation.record_dropped(&self.ctx, stream, record, reason);
        if let Err(panic) = AssertUnwindSafe(hook).catch_unwind().await {
            error!(
                computation = %self.ctx.computation(),
                stream = %stream,
                key = %record.key(),
                panic_msg = %panic_message(panic.as_ref()),
                "Dropped-record hook panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{ComputationDefinition, ComputationError, StreamDefinition, TopologyBuilder};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records (partition, key) pairs it sees
    struct Recorder {
        seen: Arc<Mutex<Vec<(usize, String)>>>,
    }

    #[async_trait]
    impl Computation for Recorder {
        async fn process_record(
            &mut self,
            ctx: &ComputationContext,
            _input_stream: &str,
            record: Record,
        ) -> Result<(), ComputationError> {
            self.seen
                .lock()
                .push((ctx.partition(), record.key().to_string()));
            Ok(())
        }
    }

    fn recorder_topology(seen: Arc<Mutex<Vec<(usize, String)>>>) -> Topology {
        TopologyBuilder::new()
            .add_stream(StreamDefinition::new("in"))
            .add_computation(
                ComputationDefinition::new(
                    "recorder",
                    Arc::new(move || {
                        Box::new(Recorder {
                            seen: Arc::clone(&seen),
                        }) as Box<dyn Computation>
                    }),
                )
                .with_inputs(["in"])
                .with_concurrency(4),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_key_always_reaches_same_partition() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor =
            StreamProcessor::start(recorder_topology(Arc::clone(&seen)), &TopologyConfig::default())
                .unwrap();

        for i in 0..50 {
            let key = format!("key-{}", i % 5);
            processor.append("in", Record::new(key, vec![i as u8])).await.unwrap();
        }
        assert!(processor.await_idle(Duration::from_secs(5)).await);

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 50);
        let mut owners: HashMap<String, usize> = HashMap::new();
        for (partition, key) in seen {
            let owner = *owners.entry(key).or_insert(partition);
            assert_eq!(owner, partition);
        }
        assert_eq!(processor.stats("recorder").unwrap().processed, 50);
    }

    #[tokio::test]
    async fn test_unknown_stream_append_fails() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor =
            StreamProcessor::start(recorder_topology(seen), &TopologyConfig::default()).unwrap();
        let result = processor.append("nope", Record::new("k", Vec::new())).await;
        assert_eq!(result, Err(TopologyError::UnknownStream("nope".to_string())));
    }

    #[tokio::test]
    async fn test_append_after_shutdown_is_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let processor =
            StreamProcessor::start(recorder_topology(seen), &TopologyConfig::default()).unwrap();
        processor.shutdown(Duration::from_secs(1)).await.unwrap();
        let result = processor.append("in", Record::new("k", Vec::new())).await;
        assert_eq!(result, Err(TopologyError::ShutDown));
    }

    /// Always fails with a retryable error and remembers what was given up on
    struct AlwaysRetryable {
        dropped: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Computation for AlwaysRetryable {
        async fn process_record(
            &mut self,
            _ctx: &ComputationContext,
            _input_stream: &str,
            _record: Record,
        ) -> Result<(), ComputationError> {
            Err(ComputationError::retryable("backend unavailable"))
        }

        async fn record_dropped(
            &mut self,
            _ctx: &ComputationContext,
            _input_stream: &str,
            record: &Record,
            reason: &str,
        ) {
            self.dropped
                .lock()
                .push((record.key().to_string(), reason.to_string()));
        }
    }

    #[tokio::test]
    async fn test_exhausted_record_reaches_dropped_hook() {
        let dropped = Arc::new(Mutex::new(Vec::new()));
        let hook_sink = Arc::clone(&dropped);
        let topology = TopologyBuilder::new()
            .add_stream(StreamDefinition::new("in"))
            .add_computation(
                ComputationDefinition::new(
                    "flaky",
                    Arc::new(move || {
                        Box::new(AlwaysRetryable {
                            dropped: Arc::clone(&hook_sink),
                        }) as Box<dyn Computation>
                    }),
                )
                .with_inputs(["in"]),
            )
            .build()
            .unwrap();
        let config = TopologyConfig {
            max_retries: 2,
            retry_delay_ms: 1,
            ..TopologyConfig::default()
        };
        let processor = StreamProcessor::start(topology, &config).unwrap();

        processor.append("in", Record::new("k-1", vec![1])).await.unwrap();
        assert!(processor.await_idle(Duration::from_secs(5)).await);

        let dropped = dropped.lock().clone();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].0, "k-1");
        assert!(dropped[0].1.contains("backend unavailable"));
        let stats = processor.stats("flaky").unwrap();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.dropped, 1);
    }
}
