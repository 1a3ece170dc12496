use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{select, Sender};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    encoder::EncodeError,
    forwarder::sync::ForwarderHandle,
    handler::MetricHandler,
    metric::Metric,
    pool::{BufferPool, PoolStats},
    telemetry::{Telemetry, TelemetrySnapshot},
};

/// Errors that could occur while submitting a metric.
#[derive(Debug, Error, PartialEq)]
pub enum ClientError {
    /// The metric was malformed.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The client has been closed.
    #[error("client is closed")]
    Closed,
}

struct Shared {
    shards: Box<[Mutex<MetricHandler>]>,
    next_shard: AtomicUsize,
    namespace: Arc<str>,
    global_tags: Arc<[String]>,
}

impl Shared {
    fn flush(&self) {
        for shard in self.shards.iter() {
            shard.lock().flush();
        }
    }
}

struct Flusher {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Flusher {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> std::io::Result<Self> {
        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let ticker = crossbeam_channel::tick(interval);

        let handle = thread::Builder::new().name("dogstatsd-flusher".to_string()).spawn(move || {
            debug!(?interval, "Flusher started.");
            loop {
                select! {
                    recv(ticker) -> _ => shared.flush(),
                    recv(stop_rx) -> _ => break,
                }
            }
            debug!("Flusher stopped.");
        })?;

        Ok(Self { stop, handle })
    }

    fn stop(self) {
        drop(self.stop);
        if self.handle.join().is_err() {
            error!("Flusher panicked.");
        }
    }
}

/// A DogStatsD client.
///
/// Metrics submitted to the client are packed into payloads by a set of handler shards, each owning its own buffer,
/// and sent by background workers. Submitting a metric never blocks on I/O: when payloads cannot be queued fast enough,
/// they are dropped and counted in the client [telemetry][Self::telemetry].
///
/// Each submission goes to the next shard in round-robin order, so producers on different threads rarely contend for
/// the same shard. A background thread periodically flushes every shard, so that partially-filled payloads are sent
/// even when traffic is low.
///
/// Metrics without a namespace, or without global tags, get the client's namespace and global tags.
///
/// Dropping the client closes it.
pub struct DogStatsDClient {
    shared: Arc<Shared>,
    pool: Arc<BufferPool>,
    telemetry: Arc<Telemetry>,
    flusher: Mutex<Option<Flusher>>,
    forwarder: Mutex<Option<ForwarderHandle>>,
    closed: AtomicBool,
}

impl DogStatsDClient {
    pub(crate) fn new(
        shards: Vec<MetricHandler>,
        namespace: Arc<str>,
        global_tags: Arc<[String]>,
        pool: Arc<BufferPool>,
        telemetry: Arc<Telemetry>,
        forwarder: ForwarderHandle,
        flush_interval: Duration,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            shards: shards.into_iter().map(Mutex::new).collect(),
            next_shard: AtomicUsize::new(0),
            namespace,
            global_tags,
        });
        let flusher = Flusher::spawn(Arc::clone(&shared), flush_interval)?;

        Ok(Self {
            shared,
            pool,
            telemetry,
            flusher: Mutex::new(Some(flusher)),
            forwarder: Mutex::new(Some(forwarder)),
            closed: AtomicBool::new(false),
        })
    }

    /// Submits a metric.
    ///
    /// # Errors
    ///
    /// If the metric is malformed, or the client has been closed, an error is returned and the metric is not sent.
    pub fn submit(&self, mut metric: Metric<'_>) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        if !metric.has_namespace() {
            metric = metric.with_namespace(Arc::clone(&self.shared.namespace));
        }
        if !metric.has_global_tags() {
            metric = metric.with_global_tags(Arc::clone(&self.shared.global_tags));
        }

        let idx = self.shared.next_shard.fetch_add(1, Ordering::Relaxed) % self.shared.shards.len();
        let mut shard = self.shared.shards[idx].lock();

        // `close` marks the client closed before flushing each shard under its lock, so anything accepted here is
        // either flushed by `close` or rejected.
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        shard.process_metric(&metric)?;
        Ok(())
    }

    /// Submits a gauge.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn gauge(&self, name: &str, value: f64, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::gauge(name, value).with_borrowed_tags(tags))
    }

    /// Submits a counter.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn count(&self, name: &str, value: i64, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::count(name, value).with_borrowed_tags(tags))
    }

    /// Increments a counter by one.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn incr(&self, name: &str, tags: &[&str]) -> Result<(), ClientError> {
        self.count(name, 1, tags)
    }

    /// Decrements a counter by one.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn decr(&self, name: &str, tags: &[&str]) -> Result<(), ClientError> {
        self.count(name, -1, tags)
    }

    /// Submits a histogram value.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn histogram(&self, name: &str, value: f64, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::histogram(name, value).with_borrowed_tags(tags))
    }

    /// Submits a distribution value.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn distribution(&self, name: &str, value: f64, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::distribution(name, value).with_borrowed_tags(tags))
    }

    /// Submits a set member.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn set(&self, name: &str, value: &str, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::set(name, value).with_borrowed_tags(tags))
    }

    /// Submits a timing, sent in milliseconds.
    ///
    /// # Errors
    ///
    /// See [`submit`][Self::submit].
    pub fn timing(&self, name: &str, duration: Duration, tags: &[&str]) -> Result<(), ClientError> {
        self.submit(Metric::timing(name, duration.as_secs_f64() * 1000.0).with_borrowed_tags(tags))
    }

    /// Flushes every shard, queueing any partially-filled payloads for sending.
    pub fn flush(&self) {
        self.shared.flush();
    }

    /// Returns a snapshot of the client telemetry.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Returns a snapshot of the buffer pool statistics.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Closes the client.
    ///
    /// Pending metrics are flushed, and the background workers are stopped. Depending on the configuration, payloads
    /// still queued at that point are either sent or dropped. Any metric submitted afterwards is rejected.
    ///
    /// Calling this more than once is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }

        self.shared.flush();

        if let Some(mut forwarder) = self.forwarder.lock().take() {
            forwarder.shutdown();
        }

        debug!("Client closed.");
    }
}

impl Drop for DogStatsDClient {
    fn drop(&mut self) {
        self.close();
    }
}
