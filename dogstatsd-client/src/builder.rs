use std::{env, net::SocketAddr, num::NonZeroUsize, sync::Arc, thread, time::Duration};

use thiserror::Error;

use crate::{
    client::DogStatsDClient,
    forwarder::{
        self,
        transport::{SocketTransport, Transport},
        DispatchQueue, ForwarderConfiguration, QueueFullPolicy, RemoteAddr,
    },
    handler::MetricHandler,
    pool::{BufferPool, PoolConfiguration},
    sampler::Sampler,
    telemetry::Telemetry,
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 1432;
const DEFAULT_INITIAL_BUFFERS: usize = 32;
const DEFAULT_MAX_BUFFERS: usize = 2048;
const DEFAULT_QUEUE_LEN: usize = 2048;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const MAX_DEFAULT_SHARDS: usize = 32;

/// Errors that could occur while building a DogStatsD client.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// A configuration value was out of range.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Details about the invalid value.
        reason: String,
    },

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread for client")]
    Backend(#[source] std::io::Error),
}

/// Builder for a DogStatsD client.
pub struct DogStatsDClientBuilder {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    max_payload_len: usize,
    max_metrics_per_payload: usize,
    initial_buffers: usize,
    max_buffers: usize,
    queue_len: usize,
    queue_full_policy: QueueFullPolicy,
    sender_workers: usize,
    shards: usize,
    flush_interval: Duration,
    drain_on_shutdown: bool,
    namespace: String,
    global_tags: Vec<String>,
}

impl DogStatsDClientBuilder {
    /// Creates a builder configured from the environment.
    ///
    /// The remote address is read from `DD_DOGSTATSD_URL` if set, or otherwise from `DD_AGENT_HOST` and
    /// `DD_DOGSTATSD_PORT` (defaulting to port 8125). The `env`, `service` and `version` global tags are added from
    /// `DD_ENV`, `DD_SERVICE` and `DD_VERSION`, respectively, when set.
    ///
    /// # Errors
    ///
    /// If the remote address read from the environment is not valid, an error will be returned.
    pub fn from_env() -> Result<Self, BuildError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|value| !value.is_empty()))
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, BuildError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::default();

        if let Some(url) = lookup("DD_DOGSTATSD_URL") {
            builder = builder.with_remote_address(url)?;
        } else if let Some(host) = lookup("DD_AGENT_HOST") {
            let port = lookup("DD_DOGSTATSD_PORT").unwrap_or_else(|| "8125".to_string());
            builder = builder.with_remote_address(format!("{host}:{port}"))?;
        }

        for (var, tag) in [("DD_ENV", "env"), ("DD_SERVICE", "service"), ("DD_VERSION", "version")] {
            if let Some(value) = lookup(var) {
                builder.global_tags.push(format!("{tag}:{value}"));
            }
        }

        Ok(builder)
    }

    /// Set the remote address to send metrics to.
    ///
    /// For UDP, the address simply needs to be in the format of `<host>:<port>`, optionally prefixed with `udp://`.
    /// For Unix domain sockets, an address in the format of `<scheme>://<path>`. The scheme can be either `unix` or
    /// `unixgram`, for a stream (`SOCK_STREAM`) or datagram (`SOCK_DGRAM`) socket, respectively.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr =
            RemoteAddr::try_from(addr.as_ref()).map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Set the write timeout for sending payloads.
    ///
    /// When the write timeout is reached, the write operation will be aborted and the payload being sent at the time
    /// will be dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length.
    ///
    /// This is the capacity of every pooled buffer, and so the maximum size of a payload sent to the remote server.
    /// A single metric value whose line is longer than this is still sent, in a payload of its own.
    ///
    /// This should generally be set to the same value (or lower) as `dogstatsd_buffer_size` in the Datadog Agent. The
    /// default fits in a single UDP datagram over a standard Ethernet MTU. For Unix domain sockets, 8192 bytes is
    /// recommended.
    ///
    /// Defaults to 1432 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the maximum number of metric lines in a single payload.
    ///
    /// Defaults to no limit.
    #[must_use]
    pub fn with_maximum_metrics_per_payload(mut self, max_metrics: usize) -> Self {
        self.max_metrics_per_payload = max_metrics;
        self
    }

    /// Set the number of buffers allocated up front, and the maximum number of buffers kept by the pool.
    ///
    /// When every pooled buffer is in use, extra buffers are allocated and freed after use.
    ///
    /// Defaults to 32 initial buffers, and 2048 maximum buffers.
    #[must_use]
    pub fn with_buffer_pool_size(mut self, initial_buffers: usize, max_buffers: usize) -> Self {
        self.initial_buffers = initial_buffers;
        self.max_buffers = max_buffers;
        self
    }

    /// Set the number of payloads that can be queued for sending.
    ///
    /// Defaults to 2048.
    #[must_use]
    pub fn with_queue_length(mut self, queue_len: usize) -> Self {
        self.queue_len = queue_len;
        self
    }

    /// Set what happens to a payload when the send queue is full.
    ///
    /// Defaults to [`QueueFullPolicy::Drop`].
    #[must_use]
    pub fn with_queue_full_policy(mut self, policy: QueueFullPolicy) -> Self {
        self.queue_full_policy = policy;
        self
    }

    /// Set the number of background threads sending payloads.
    ///
    /// Defaults to 1.
    #[must_use]
    pub fn with_sender_workers(mut self, workers: usize) -> Self {
        self.sender_workers = workers;
        self
    }

    /// Set the number of handler shards.
    ///
    /// Every shard owns one payload buffer. More shards reduce contention between threads submitting metrics
    /// concurrently, at the cost of more partially-filled payloads.
    ///
    /// Defaults to the available parallelism, up to 32.
    #[must_use]
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    /// Set how often partially-filled payloads are flushed.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Sets whether payloads still queued when the client is closed are sent, or dropped.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_drain_on_shutdown(mut self, drain_on_shutdown: bool) -> Self {
        self.drain_on_shutdown = drain_on_shutdown;
        self
    }

    /// Set the namespace, which is prepended to the name of every metric.
    ///
    /// The namespace is prepended verbatim, so it should generally end with a period, such as `myapp.`.
    ///
    /// Defaults to no namespace.
    #[must_use]
    pub fn with_namespace<S>(mut self, namespace: S) -> Self
    where
        S: Into<String>,
    {
        self.namespace = namespace.into();
        self
    }

    /// Add global tags, which are attached to every metric.
    ///
    /// Defaults to no global tags.
    #[must_use]
    pub fn with_global_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.global_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    fn validate(&self) -> Result<(), BuildError> {
        let invalid = |reason: &str| -> Result<(), BuildError> {
            Err(BuildError::InvalidConfiguration { reason: reason.to_string() })
        };

        if self.max_payload_len == 0 {
            return invalid("maximum payload length must be greater than zero");
        }
        if self.max_metrics_per_payload == 0 {
            return invalid("maximum metrics per payload must be greater than zero");
        }
        if self.max_buffers == 0 {
            return invalid("maximum buffer count must be greater than zero");
        }
        if self.queue_len == 0 {
            return invalid("queue length must be greater than zero");
        }
        if self.sender_workers == 0 {
            return invalid("sender worker count must be greater than zero");
        }
        if self.shards == 0 {
            return invalid("shard count must be greater than zero");
        }
        if self.flush_interval.is_zero() {
            return invalid("flush interval must be greater than zero");
        }

        Ok(())
    }

    /// Builds the client, sending to the configured remote address.
    ///
    /// The socket is connected lazily, when the first payload is sent.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background threads cannot be spawned, an error will be returned.
    pub fn build(self) -> Result<DogStatsDClient, BuildError> {
        let transport = Arc::new(SocketTransport::new(self.remote_addr.clone(), self.write_timeout));
        self.build_with_transport(transport)
    }

    /// Builds the client, sending payloads to the given transport instead of the configured remote address.
    ///
    /// # Errors
    ///
    /// If the configuration is invalid, or the background threads cannot be spawned, an error will be returned.
    pub fn build_with_transport(self, transport: Arc<dyn Transport>) -> Result<DogStatsDClient, BuildError> {
        self.validate()?;

        let telemetry = Arc::new(Telemetry::new(transport.transport_id()));
        let pool = Arc::new(BufferPool::new(&PoolConfiguration {
            initial_buffers: self.initial_buffers,
            max_buffers: self.max_buffers,
            buffer_len: self.max_payload_len,
            max_elements: self.max_metrics_per_payload,
        }));

        let forwarder_config = ForwarderConfiguration {
            queue_len: self.queue_len,
            workers: self.sender_workers,
            queue_full_policy: self.queue_full_policy,
            drain_on_shutdown: self.drain_on_shutdown,
        };

        let (queue, rx) = DispatchQueue::bounded(
            forwarder_config.queue_len,
            Arc::clone(&pool),
            Arc::clone(&telemetry),
            forwarder_config.queue_full_policy,
        );
        let forwarder = forwarder::sync::spawn(&forwarder_config, &rx, &transport, &pool, &telemetry)
            .map_err(BuildError::Backend)?;

        // Each shard gets its own sampler, so sampling never contends across shards.
        let shards = (0..self.shards)
            .map(|_| MetricHandler::new(queue.clone(), Arc::new(Sampler::new())))
            .collect::<Vec<_>>();

        DogStatsDClient::new(
            shards,
            Arc::from(self.namespace),
            Arc::from(self.global_tags),
            pool,
            telemetry,
            forwarder,
            self.flush_interval,
        )
        .map_err(BuildError::Backend)
    }
}

impl Default for DogStatsDClientBuilder {
    fn default() -> Self {
        let shards = thread::available_parallelism().map_or(1, NonZeroUsize::get).min(MAX_DEFAULT_SHARDS);

        DogStatsDClientBuilder {
            remote_addr: RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))]),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            max_metrics_per_payload: usize::MAX,
            initial_buffers: DEFAULT_INITIAL_BUFFERS,
            max_buffers: DEFAULT_MAX_BUFFERS,
            queue_len: DEFAULT_QUEUE_LEN,
            queue_full_policy: QueueFullPolicy::Drop,
            sender_workers: 1,
            shards,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_on_shutdown: true,
            namespace: String::new(),
            global_tags: Vec::new(),
        }
    }
}
