use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use metrics::{counter, Counter};

use crate::metric::MetricType;

const METRIC_TYPES: usize = 6;

// Wire type names, in counter index order.
const METRIC_TYPE_NAMES: [&str; METRIC_TYPES] = ["gauge", "count", "histogram", "distribution", "set", "timing"];

macro_rules! telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

// A registered counter, along with its value as seen by this client.
struct TrackedCounter {
    handle: Counter,
    value: AtomicU64,
}

impl TrackedCounter {
    fn new(handle: Counter) -> Self {
        Self { handle, value: AtomicU64::new(0) }
    }

    fn increment(&self, value: u64) {
        self.handle.increment(value);
        self.value.fetch_add(value, Relaxed);
    }

    fn get(&self) -> u64 {
        self.value.load(Relaxed)
    }
}

/// Client telemetry.
///
/// `Telemetry` collects information about the client's behavior: how many points of each type were written, how many
/// payloads and bytes were sent or dropped, and why.
///
/// Every counter is registered with the installed `metrics` recorder when the telemetry is created, under the
/// `datadog.dogstatsd.client.*` names and labelled with `client_transport`. The same values can be read locally at any
/// time with [`snapshot`][Self::snapshot].
pub struct Telemetry {
    metric_points: Counter,
    points_by_type: [TrackedCounter; METRIC_TYPES],
    points_sampled_out: TrackedCounter,
    encode_errors: TrackedCounter,
    oversized_payloads: TrackedCounter,
    packets_sent: TrackedCounter,
    bytes_sent: TrackedCounter,
    packets_dropped: Counter,
    bytes_dropped: Counter,
    packets_dropped_queue: TrackedCounter,
    bytes_dropped_queue: TrackedCounter,
    packets_dropped_writer: TrackedCounter,
    bytes_dropped_writer: TrackedCounter,
}

impl Telemetry {
    /// Creates a new, zeroed `Telemetry` for a client sending over the given transport.
    pub fn new(transport: &'static str) -> Self {
        let base_labels = telemetry_tags!("client_transport" => transport);
        let tracked = |name: &'static str| TrackedCounter::new(counter!(name, base_labels.iter()));

        Self {
            metric_points: counter!("datadog.dogstatsd.client.metrics", base_labels.iter()),
            points_by_type: METRIC_TYPE_NAMES.map(|metric_type| {
                let labels = telemetry_tags!("client_transport" => transport, "metrics_type" => metric_type);
                TrackedCounter::new(counter!("datadog.dogstatsd.client.metrics_by_type", labels.iter()))
            }),
            points_sampled_out: tracked("datadog.dogstatsd.client.metrics_sampled_out"),
            encode_errors: tracked("datadog.dogstatsd.client.metrics_invalid"),
            oversized_payloads: tracked("datadog.dogstatsd.client.packets_oversized"),
            packets_sent: tracked("datadog.dogstatsd.client.packets_sent"),
            bytes_sent: tracked("datadog.dogstatsd.client.bytes_sent"),
            packets_dropped: counter!("datadog.dogstatsd.client.packets_dropped", base_labels.iter()),
            bytes_dropped: counter!("datadog.dogstatsd.client.bytes_dropped", base_labels.iter()),
            packets_dropped_queue: tracked("datadog.dogstatsd.client.packets_dropped_queue"),
            bytes_dropped_queue: tracked("datadog.dogstatsd.client.bytes_dropped_queue"),
            packets_dropped_writer: tracked("datadog.dogstatsd.client.packets_dropped_writer"),
            bytes_dropped_writer: tracked("datadog.dogstatsd.client.bytes_dropped_writer"),
        }
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let points = |metric_type: MetricType| self.points_by_type[type_index(metric_type)].get();

        TelemetrySnapshot {
            gauge_points: points(MetricType::Gauge),
            count_points: points(MetricType::Count),
            histogram_points: points(MetricType::Histogram),
            distribution_points: points(MetricType::Distribution),
            set_points: points(MetricType::Set),
            timing_points: points(MetricType::Timing),
            points_sampled_out: self.points_sampled_out.get(),
            encode_errors: self.encode_errors.get(),
            oversized_payloads: self.oversized_payloads.get(),
            packets_sent: self.packets_sent.get(),
            bytes_sent: self.bytes_sent.get(),
            packets_dropped_queue: self.packets_dropped_queue.get(),
            bytes_dropped_queue: self.bytes_dropped_queue.get(),
            packets_dropped_writer: self.packets_dropped_writer.get(),
            bytes_dropped_writer: self.bytes_dropped_writer.get(),
        }
    }

    /// Tracks points written for the given metric type.
    pub(crate) fn track_points(&self, metric_type: MetricType, points: usize) {
        let points = points as u64;
        self.metric_points.increment(points);
        self.points_by_type[type_index(metric_type)].increment(points);
    }

    /// Tracks a metric skipped by sampling.
    pub(crate) fn track_sampled_out(&self) {
        self.points_sampled_out.increment(1);
    }

    /// Tracks a malformed metric.
    pub(crate) fn track_encode_error(&self) {
        self.encode_errors.increment(1);
    }

    /// Tracks a line too large for a pooled buffer, sent as its own payload.
    pub(crate) fn track_oversized_payload(&self) {
        self.oversized_payloads.increment(1);
    }

    /// Tracks a successful packet send.
    pub(crate) fn track_packet_send_succeeded(&self, bytes_len: usize) {
        self.packets_sent.increment(1);
        self.bytes_sent.increment(bytes_len as u64);
    }

    /// Tracks a failed packet send.
    pub(crate) fn track_packet_send_failed(&self, bytes_len: usize) {
        self.packets_dropped.increment(1);
        self.bytes_dropped.increment(bytes_len as u64);
        self.packets_dropped_writer.increment(1);
        self.bytes_dropped_writer.increment(bytes_len as u64);
    }

    /// Tracks a packet dropped before reaching the transport, because the queue was full or shutting down.
    pub(crate) fn track_packet_dropped_queue(&self, bytes_len: usize) {
        self.packets_dropped.increment(1);
        self.bytes_dropped.increment(bytes_len as u64);
        self.packets_dropped_queue.increment(1);
        self.bytes_dropped_queue.increment(bytes_len as u64);
    }
}

// Aggregated variants share a counter with their single-value counterparts, as they have the same wire type.
fn type_index(metric_type: MetricType) -> usize {
    match metric_type {
        MetricType::Gauge => 0,
        MetricType::Count => 1,
        MetricType::Histogram | MetricType::HistogramAggregated => 2,
        MetricType::Distribution | MetricType::DistributionAggregated => 3,
        MetricType::Set => 4,
        MetricType::Timing => 5,
    }
}

/// A point-in-time copy of the client telemetry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TelemetrySnapshot {
    /// Gauge points written.
    pub gauge_points: u64,

    /// Counter points written.
    pub count_points: u64,

    /// Histogram points written, including each value of an aggregated histogram.
    pub histogram_points: u64,

    /// Distribution points written, including each value of an aggregated distribution.
    pub distribution_points: u64,

    /// Set points written.
    pub set_points: u64,

    /// Timing points written.
    pub timing_points: u64,

    /// Metrics skipped by sampling.
    pub points_sampled_out: u64,

    /// Metrics rejected as malformed.
    pub encode_errors: u64,

    /// Lines too large for a pooled buffer, sent as their own payload.
    pub oversized_payloads: u64,

    /// Payloads written to the transport.
    pub packets_sent: u64,

    /// Bytes written to the transport.
    pub bytes_sent: u64,

    /// Payloads dropped before reaching the transport.
    pub packets_dropped_queue: u64,

    /// Bytes dropped before reaching the transport.
    pub bytes_dropped_queue: u64,

    /// Payloads the transport failed to write.
    pub packets_dropped_writer: u64,

    /// Bytes the transport failed to write.
    pub bytes_dropped_writer: u64,
}

impl TelemetrySnapshot {
    /// Returns the total number of points written, across all metric types.
    pub fn metric_points(&self) -> u64 {
        self.gauge_points
            + self.count_points
            + self.histogram_points
            + self.distribution_points
            + self.set_points
            + self.timing_points
    }

    /// Returns the total number of payloads dropped, for any reason.
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped_queue + self.packets_dropped_writer
    }

    /// Returns the total number of bytes dropped, for any reason.
    pub fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped_queue + self.bytes_dropped_writer
    }
}
