//! Sharded runtime around a [`FenceEngine`].
//!
//! Location samples are routed to one of N shard workers by a blake3 hash of
//! the subject id, so each subject has exactly one writer and its samples are
//! evaluated in submission order. A region's changes all go to the shard of
//! the subject that first owned it. Feed batches go to a separate feed
//! worker. Every queue is bounded and submission never blocks: a full queue
//! is reported as `QueueFull`.
//!
//! External sources are attached as channel receivers. A pump thread per
//! source forwards into the shards; when the source hangs up the runtime
//! publishes [`RuntimeSignal::SourceDisconnected`] and the owner decides
//! whether to resubscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::engine::FenceEngine;
use crate::error::{ExecutionError, FenceError, FenceResult};
use crate::feed::FeedBatch;
use crate::ids::{RegionId, SubjectId};
use crate::sample::LocationSample;
use crate::store::RegionChange;

/// Status published by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeSignal {
    /// An attached source hung up. Nothing more will arrive from it.
    SourceDisconnected { source: String },
    /// A worker could not apply a job.
    WorkerError { worker: String, error: FenceError },
}

enum Job {
    Sample(LocationSample),
    Region(RegionChange),
}

#[derive(Debug)]
struct SignalBus {
    tx: Sender<RuntimeSignal>,
    dropped: AtomicU64,
}

impl SignalBus {
    fn publish(&self, signal: RuntimeSignal) {
        if self.tx.try_send(signal).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Shared submission side: every sender into a worker lives here.
struct Router {
    engine: Arc<FenceEngine>,
    /// Shard that owns each region id seen so far.
    routes: Mutex<HashMap<RegionId, usize>>,
    shards: Vec<Sender<Job>>,
    shard_capacity: usize,
    feed: Sender<FeedBatch>,
    feed_capacity: usize,
}

fn shard_index(subject: &SubjectId, shards: usize) -> usize {
    let digest = blake3::hash(subject.as_str().as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    let bucket = u64::from_le_bytes(prefix) % shards.max(1) as u64;
    usize::try_from(bucket).unwrap_or(0)
}

fn queue_err<T>(err: TrySendError<T>, path: String, capacity: usize) -> FenceError {
    match err {
        TrySendError::Full(_) => FenceError::Execution(ExecutionError::QueueFull { path, capacity }),
        TrySendError::Disconnected(_) => FenceError::internal(format!("{path} worker is gone")),
    }
}

impl Router {
    fn shard_of(&self, subject: &SubjectId) -> usize {
        shard_index(subject, self.shards.len())
    }

    fn try_send(&self, idx: usize, job: Job) -> FenceResult<()> {
        self.shards[idx]
            .try_send(job)
            .map_err(|err| queue_err(err, format!("shard-{idx}"), self.shard_capacity))
    }

    fn try_submit_sample(&self, sample: LocationSample) -> FenceResult<()> {
        self.try_send(self.shard_of(&sample.subject), Job::Sample(sample))
    }

    /// Every change to one region id goes to the shard picked for its first
    /// change, so adds, moves and removals of that region apply in the order
    /// they were submitted.
    ///
    /// The first change is routed by the subject that owns the region in the
    /// registry, else the subject it names. A removal for a region nobody
    /// knows goes to shard 0, where it is a no-op.
    fn try_submit_region(&self, change: RegionChange) -> FenceResult<()> {
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| FenceError::internal("poisoned lock: runtime.routes"))?;

        let id = change.region_id().clone();
        let routed = match routes.get(&id) {
            Some(&idx) => Some(idx),
            None => match self.engine.registry().get(&id)? {
                Some(current) => Some(self.shard_of(&current.subject)),
                None => match &change {
                    RegionChange::Added { region } | RegionChange::Modified { region } => {
                        Some(self.shard_of(&region.subject))
                    }
                    RegionChange::Removed { .. } => None,
                },
            },
        };
        let Some(idx) = routed else {
            debug!(region = %id, "removal for unknown region");
            return self.try_send(0, Job::Region(change));
        };

        self.try_send(idx, Job::Region(change))?;
        routes.insert(id, idx);
        Ok(())
    }

    /// Blocking send used by pumps, so a slow shard pushes back on its source.
    fn forward(&self, sample: LocationSample) -> bool {
        let idx = self.shard_of(&sample.subject);
        self.shards[idx].send(Job::Sample(sample)).is_ok()
    }

    fn try_submit_batch(&self, batch: FeedBatch) -> FenceResult<()> {
        self.feed
            .try_send(batch)
            .map_err(|err| queue_err(err, "feed".to_string(), self.feed_capacity))
    }
}

/// Threaded runtime: shard workers, a feed worker and source pumps.
pub struct EngineRuntime {
    engine: Arc<FenceEngine>,
    router: Option<Arc<Router>>,
    workers: Vec<JoinHandle<()>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    stop_tx: Option<Sender<()>>,
    stop_rx: Receiver<()>,
    signals: Arc<SignalBus>,
    signal_rx: Receiver<RuntimeSignal>,
}

impl EngineRuntime {
    /// Starts the workers sized by the engine's configuration.
    ///
    /// # Panics
    ///
    /// Panics if a worker thread cannot be spawned.
    pub fn start(engine: Arc<FenceEngine>) -> Self {
        let config = engine.config().clone();
        let shard_count = config.shard_workers.max(1);
        let shard_capacity = config.sample_queue_capacity.max(1);
        let feed_capacity = config.feed_queue_capacity.max(1);

        let (signal_tx, signal_rx) = bounded(config.status_capacity.max(1));
        let signals = Arc::new(SignalBus {
            tx: signal_tx,
            dropped: AtomicU64::new(0),
        });

        let mut workers = Vec::with_capacity(shard_count + 1);
        let mut shards = Vec::with_capacity(shard_count);
        for idx in 0..shard_count {
            let (tx, rx) = bounded::<Job>(shard_capacity);
            let engine = Arc::clone(&engine);
            let signals = Arc::clone(&signals);
            let handle = thread::Builder::new()
                .name(format!("fencewatch-shard-{idx}"))
                .spawn(move || shard_loop(idx, &engine, &rx, &signals))
                .expect("failed to spawn fencewatch shard worker");
            shards.push(tx);
            workers.push(handle);
        }

        let (feed_tx, feed_rx) = bounded::<FeedBatch>(feed_capacity);
        {
            let engine = Arc::clone(&engine);
            let handle = thread::Builder::new()
                .name("fencewatch-feed".to_string())
                .spawn(move || feed_loop(&engine, &feed_rx))
                .expect("failed to spawn fencewatch feed worker");
            workers.push(handle);
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        info!(shards = shard_count, shard_capacity, feed_capacity, "runtime started");

        Self {
            router: Some(Arc::new(Router {
                engine: Arc::clone(&engine),
                routes: Mutex::new(HashMap::new()),
                shards,
                shard_capacity,
                feed: feed_tx,
                feed_capacity,
            })),
            engine,
            workers,
            pumps: Mutex::new(Vec::new()),
            stop_tx: Some(stop_tx),
            stop_rx,
            signals,
            signal_rx,
        }
    }

    /// The engine the workers drive.
    #[must_use]
    pub fn engine(&self) -> &Arc<FenceEngine> {
        &self.engine
    }

    fn router(&self) -> FenceResult<&Arc<Router>> {
        self.router
            .as_ref()
            .ok_or_else(|| FenceError::internal("runtime is shut down"))
    }

    /// Number of shard workers.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.router.as_ref().map_or(0, |r| r.shards.len())
    }

    /// Shard that owns `subject`. Stable for the life of the runtime.
    #[must_use]
    pub fn shard_for(&self, subject: &SubjectId) -> usize {
        shard_index(subject, self.shard_count())
    }

    /// Queues a sample on its subject's shard.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::QueueFull` if the shard queue is full.
    pub fn submit_sample(&self, sample: LocationSample) -> FenceResult<()> {
        self.router()?.try_submit_sample(sample)
    }

    /// Queues a region change.
    ///
    /// All changes to one region id land on one shard and apply in
    /// submission order, so a removal queued behind its add is never lost.
    /// That shard is the one of the subject that owned the region when it
    /// was first submitted. If a region later moves to another subject, that
    /// subject's samples see the move once it is applied, not at submission.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::QueueFull` if the shard queue is full.
    pub fn submit_region_change(&self, change: RegionChange) -> FenceResult<()> {
        self.router()?.try_submit_region(change)
    }

    /// Queues a feed batch on the feed worker.
    pub fn submit_feed_batch(&self, batch: FeedBatch) -> FenceResult<()> {
        self.router()?.try_submit_batch(batch)
    }

    /// Receiver for runtime status. Signals that do not fit are dropped.
    #[must_use]
    pub fn signals(&self) -> Receiver<RuntimeSignal> {
        self.signal_rx.clone()
    }

    /// Signals lost because the status stream was full.
    #[must_use]
    pub fn dropped_signals(&self) -> u64 {
        self.signals.dropped.load(Ordering::Relaxed)
    }

    /// Forwards samples from `source` until it hangs up or the runtime stops.
    pub fn attach_location_source(
        &self,
        name: impl Into<String>,
        source: Receiver<LocationSample>,
    ) -> FenceResult<()> {
        let router = Arc::clone(self.router()?);
        self.spawn_pump(name.into(), source, move |sample| router.forward(sample))
    }

    /// Forwards feed batches from `source` until it hangs up or the runtime stops.
    pub fn attach_change_feed(&self, name: impl Into<String>, source: Receiver<FeedBatch>) -> FenceResult<()> {
        let router = Arc::clone(self.router()?);
        self.spawn_pump(name.into(), source, move |batch| router.feed.send(batch).is_ok())
    }

    fn spawn_pump<T, F>(&self, name: String, source: Receiver<T>, forward: F) -> FenceResult<()>
    where
        T: Send + 'static,
        F: Fn(T) -> bool + Send + 'static,
    {
        let stop = self.stop_rx.clone();
        let signals = Arc::clone(&self.signals);
        let thread_name = format!("fencewatch-pump-{name}");
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || loop {
                select! {
                    recv(source) -> msg => match msg {
                        Ok(item) => {
                            if !forward(item) {
                                debug!(source = %name, "pump target closed");
                                break;
                            }
                        }
                        Err(_) => {
                            warn!(source = %name, "source disconnected");
                            signals.publish(RuntimeSignal::SourceDisconnected { source: name.clone() });
                            break;
                        }
                    },
                    recv(stop) -> _ => break,
                }
            })
            .map_err(|e| FenceError::internal(format!("failed to spawn pump: {e}")))?;

        self.pumps
            .lock()
            .map_err(|_| FenceError::internal("poisoned lock: runtime.pumps"))?
            .push(handle);
        Ok(())
    }

    fn halt(&mut self) {
        drop(self.stop_tx.take());
        let pumps = std::mem::take(self.pumps.get_mut().unwrap_or_else(PoisonError::into_inner));
        for handle in pumps {
            let _ = handle.join();
        }

        // Last senders go away here; workers drain their queues and exit.
        drop(self.router.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.engine.close_delivery();
    }

    /// Stops pumps, drains every queue and joins all threads.
    ///
    /// The engine's delivery queue, if any, is flushed and closed last.
    pub fn shutdown(mut self) {
        self.halt();
        info!("runtime stopped");
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        self.halt();
    }
}

fn shard_loop(idx: usize, engine: &FenceEngine, rx: &Receiver<Job>, signals: &SignalBus) {
    let worker = format!("shard-{idx}");
    for job in rx.iter() {
        let result = match job {
            Job::Sample(sample) => engine.handle_sample(&sample).map(|report| {
                if !report.is_clean() {
                    debug!(shard = idx, failures = report.failures.len(), "breach delivery failures");
                }
            }),
            Job::Region(change) => engine.apply_region_change(change).map(|_| ()),
        };
        if let Err(error) = result {
            signals.publish(RuntimeSignal::WorkerError {
                worker: worker.clone(),
                error,
            });
        }
    }
    debug!(shard = idx, "shard worker stopped");
}

fn feed_loop(engine: &FenceEngine, rx: &Receiver<FeedBatch>) {
    for batch in rx.iter() {
        let report = engine.handle_feed_batch(&batch);
        if !report.is_clean() {
            debug!(failures = report.failures.len(), "feed delivery failures");
        }
    }
    debug!("feed worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Barrier;
    use std::time::Duration;

    use chrono::Utc;

    use crate::config::EngineConfig;
    use crate::geo::GeoPoint;
    use crate::notify::{AlertSink, ChannelSink, DeliveryError, NotificationPayload};
    use crate::store::InMemoryNotificationLog;

    fn center() -> GeoPoint {
        GeoPoint::new(40.0, -74.0).unwrap()
    }

    fn engine_with(config: EngineConfig, sink: Arc<dyn AlertSink>) -> Arc<FenceEngine> {
        let engine = FenceEngine::new(config, sink, Arc::new(InMemoryNotificationLog::new()), Utc::now()).unwrap();
        engine
            .upsert_region(engine.region("r1", "parent", "child", "Mall", center()))
            .unwrap();
        Arc::new(engine)
    }

    struct GatedSink {
        gate: Arc<Barrier>,
    }

    impl AlertSink for GatedSink {
        fn deliver(&self, _payload: &NotificationPayload) -> Result<(), DeliveryError> {
            self.gate.wait();
            Ok(())
        }
    }

    #[test]
    fn subject_routing_is_stable() {
        let (sink, _stream) = ChannelSink::new(1);
        let config = EngineConfig {
            shard_workers: 4,
            ..EngineConfig::default()
        };
        let runtime = EngineRuntime::start(engine_with(config, Arc::new(sink)));
        assert_eq!(runtime.shard_count(), 4);

        let subject = SubjectId::from("child");
        let first = runtime.shard_for(&subject);
        for _ in 0..10 {
            assert_eq!(runtime.shard_for(&subject), first);
        }
        assert!(first < 4);
        runtime.shutdown();
    }

    #[test]
    fn full_shard_reports_queue_full() {
        let gate = Arc::new(Barrier::new(2));
        let config = EngineConfig {
            shard_workers: 1,
            sample_queue_capacity: 1,
            ..EngineConfig::default()
        };
        let runtime = EngineRuntime::start(engine_with(config, Arc::new(GatedSink { gate: Arc::clone(&gate) })));

        // The first sample breaches and parks the worker inside the sink.
        let inside = || LocationSample::now("child", center());
        runtime.submit_sample(inside()).unwrap();

        let mut saw_full = false;
        for _ in 0..100 {
            match runtime.submit_sample(inside()) {
                Ok(()) => thread::sleep(Duration::from_millis(1)),
                Err(FenceError::Execution(ExecutionError::QueueFull { path, capacity })) => {
                    assert_eq!(path, "shard-0");
                    assert_eq!(capacity, 1);
                    saw_full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(saw_full);

        gate.wait();
        runtime.shutdown();
    }

    #[test]
    fn malformed_sample_is_reported_as_worker_error() {
        let (sink, _stream) = ChannelSink::new(4);
        let runtime = EngineRuntime::start(engine_with(EngineConfig::default(), Arc::new(sink)));
        let signals = runtime.signals();

        runtime
            .submit_sample(LocationSample::missing_point("child", Utc::now()))
            .unwrap();
        match signals.recv_timeout(Duration::from_secs(5)).unwrap() {
            RuntimeSignal::WorkerError { error, .. } => assert!(error.is_execution()),
            other => panic!("unexpected signal: {other:?}"),
        }
        runtime.shutdown();
    }

    #[test]
    fn disconnected_source_is_signalled() {
        let (sink, _stream) = ChannelSink::new(4);
        let runtime = EngineRuntime::start(engine_with(EngineConfig::default(), Arc::new(sink)));
        let signals = runtime.signals();

        let (tx, rx) = bounded::<LocationSample>(4);
        runtime.attach_location_source("gps", rx).unwrap();
        drop(tx);

        let signal = signals.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            signal,
            RuntimeSignal::SourceDisconnected {
                source: "gps".to_string()
            }
        );
        runtime.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_work() {
        let (sink, stream) = ChannelSink::new(16);
        let runtime = EngineRuntime::start(engine_with(EngineConfig::default(), Arc::new(sink)));
        let engine = Arc::clone(runtime.engine());

        runtime
            .submit_sample(LocationSample::now("child", center().offset_north(500.0)))
            .unwrap();
        runtime.submit_sample(LocationSample::now("child", center())).unwrap();
        runtime.shutdown();

        assert_eq!(stream.drain().len(), 1);
        assert_eq!(engine.stats().unwrap().delivered, 1);
    }
}
