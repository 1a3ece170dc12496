use std::{mem, sync::Arc};

use tracing::warn;

use crate::{
    encoder::{EncodeError, LineEncoder, Points, WriteOutcome},
    forwarder::DispatchQueue,
    metric::Metric,
    pool::{BufferPool, StatsdBuffer},
    sampler::Sampler,
    telemetry::Telemetry,
};

/// Packs metrics into payload buffers.
///
/// A handler owns exactly one "current" buffer at a time. Metrics are sampled, encoded and appended to it, and
/// whenever it cannot hold the next line (or the next value of an aggregated metric), it is handed to the dispatch
/// queue and replaced by a fresh buffer from the pool.
///
/// Handlers are not meant to be shared: every method takes `&mut self`. Concurrent producers either own a handler
/// each, or serialize access to one, as [`DogStatsDClient`][crate::DogStatsDClient] does.
pub struct MetricHandler {
    pool: Arc<BufferPool>,
    queue: DispatchQueue,
    sampler: Arc<Sampler>,
    telemetry: Arc<Telemetry>,
    encoder: LineEncoder,
    current: StatsdBuffer,
}

impl MetricHandler {
    /// Creates a new `MetricHandler` that hands its buffers to the given queue.
    ///
    /// Buffers are borrowed from, and telemetry is recorded to, the pool and telemetry that the queue was created
    /// with.
    pub fn new(queue: DispatchQueue, sampler: Arc<Sampler>) -> Self {
        let pool = Arc::clone(queue.pool());
        let telemetry = Arc::clone(queue.telemetry());
        let current = pool.borrow();

        Self { pool, queue, sampler, telemetry, encoder: LineEncoder::new(), current }
    }

    /// Returns the number of bytes written into the current buffer.
    pub fn buffered_len(&self) -> usize {
        self.current.len()
    }

    /// Processes a single metric.
    ///
    /// If the metric is not sampled, nothing happens. Otherwise, it is written into the current buffer, flushing as
    /// many times as needed: a multi-value metric that does not fit is split on value boundaries across several
    /// buffers, with its name, type and tags repeated on every line.
    ///
    /// A single value whose line cannot fit even in an empty buffer is sent on its own, in a dedicated payload larger
    /// than the configured maximum.
    ///
    /// # Errors
    ///
    /// If the metric is malformed, an error is returned and nothing is written.
    pub fn process_metric(&mut self, metric: &Metric<'_>) -> Result<(), EncodeError> {
        if !self.sampler.should_sample(metric.rate()) {
            self.telemetry.track_sampled_out();
            return Ok(());
        }

        if let Err(e) = self.encoder.prepare(metric) {
            self.telemetry.track_encode_error();
            return Err(e);
        }

        let points = Points::from_value(metric.value());
        let mut next = 0;
        while next < points.len() {
            match self.encoder.write_points(&mut self.current, points, next) {
                WriteOutcome::Complete => next = points.len(),
                WriteOutcome::Partial(written) => {
                    next += written;
                    self.flush();
                }
                WriteOutcome::BufferFull if self.current.is_empty() => {
                    let line = self.encoder.render_single(points, next);
                    warn!(
                        metric = metric.name(),
                        line_len = line.len(),
                        buffer_len = self.current.capacity(),
                        "Metric line exceeds maximum payload length, sending as a standalone payload."
                    );
                    self.telemetry.track_oversized_payload();
                    self.queue.enqueue(StatsdBuffer::oversized(line));
                    next += 1;
                }
                WriteOutcome::BufferFull => self.flush(),
            }
        }

        self.telemetry.track_points(metric.metric_type(), points.len());
        Ok(())
    }

    /// Flushes the current buffer.
    ///
    /// If anything was written, the current buffer is enqueued for sending and replaced with a fresh one. Otherwise,
    /// this is a no-op.
    pub fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }

        let full = mem::replace(&mut self.current, self.pool.borrow());
        self.queue.enqueue(full);
    }
}

impl Drop for MetricHandler {
    fn drop(&mut self) {
        // No replacement is borrowed here. An empty buffer goes straight back to the pool through the queue.
        let current = mem::replace(&mut self.current, StatsdBuffer::detached());
        self.queue.enqueue(current);
    }
}
