//! A low-allocation client for sending metrics to a [DogStatsD][dsd]-compatible server.
//!
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/
//!
//! # Usage
//!
//! ```no_run
//! # use dogstatsd_client::{DogStatsDClientBuilder, Metric};
//! // First, create a builder.
//! //
//! // The builder can configure many aspects of the client, such as changing the remote address, the maximum payload
//! // size, how many payloads can be queued for sending, and more.
//! let client = DogStatsDClientBuilder::default()
//!     .with_namespace("myapp.")
//!     .with_global_tags(["env:prod"])
//!     .build()
//!     .expect("failed to build client");
//!
//! // Metrics can be submitted with the convenience methods...
//! client.incr("requests", &["endpoint:/users"]).expect("failed to submit metric");
//!
//! // ...or built directly, which allows setting a sample rate, or sending many values at once.
//! let latencies = Metric::distribution_aggregated("latency", vec![1.2, 3.4, 5.6], "endpoint:/users");
//! client.submit(latencies).expect("failed to submit metric");
//!
//! // Closing the client (or dropping it) flushes any pending metrics.
//! client.close();
//! ```
//!
//! # Design
//!
//! Submitted metrics go through a [`MetricHandler`], which samples them, renders them in the DogStatsD wire format, and
//! packs them into fixed-capacity payload buffers. Full buffers are handed to a bounded queue, and written to the
//! remote server by one or more background threads, after which they are returned to a [`BufferPool`] for reuse.
//!
//! Submitting a metric never blocks on I/O. When the queue is full, payloads are dropped and counted, rather than
//! blocking the producer: DogStatsD is a best-effort protocol, and losing some metrics under extreme load is preferable
//! to stalling the application.
//!
//! ## Multi-value payloads
//!
//! Aggregated histograms and distributions carry many values in a single line (DSD v1.1). When such a line does not
//! fit in the remaining space of a payload, it is split on value boundaries across as many payloads as needed, with
//! the name, type and tags repeated on every line.
//!
//! ## Full transport support for Unix domain sockets
//!
//! The client supports sending metrics over all three major allowable transports: UDP, and Unix domain sockets in
//! either `SOCK_DGRAM` or `SOCK_STREAM` mode. Custom transports can be provided by implementing [`Transport`].
//!
//! ## Telemetry
//!
//! The client keeps track of the number of points written, payloads and bytes sent or dropped, and so on. These
//! counters are registered with the installed [`metrics`] recorder under the `datadog.dogstatsd.client.*` names, and
//! are also available directly through [`DogStatsDClient::telemetry`].

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{BuildError, DogStatsDClientBuilder};

mod client;
pub use self::client::{ClientError, DogStatsDClient};

mod encoder;
pub use self::encoder::EncodeError;

mod forwarder;
pub use self::forwarder::{transport::Transport, DispatchQueue, QueueFullPolicy};

mod handler;
pub use self::handler::MetricHandler;

mod metric;
pub use self::metric::{AggregatedValues, Metric, MetricType, MetricValue};

mod pool;
pub use self::pool::{BufferPool, PoolConfiguration, PoolStats, StatsdBuffer};

mod sampler;
pub use self::sampler::{should_sample, Sampler};

mod telemetry;
pub use self::telemetry::{Telemetry, TelemetrySnapshot};
