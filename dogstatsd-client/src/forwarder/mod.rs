use std::{
    net::{SocketAddr, ToSocketAddrs as _},
    sync::Arc,
    time::Duration,
};

#[cfg(unix)]
use std::path::PathBuf;

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use tracing::debug;

use crate::{
    pool::{BufferPool, StatsdBuffer},
    telemetry::Telemetry,
};

pub mod sync;
pub mod transport;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RemoteAddr {
    Udp(Vec<SocketAddr>),

    #[cfg(unix)]
    Unixgram(PathBuf),

    #[cfg(unix)]
    Unix(PathBuf),
}

impl RemoteAddr {
    /// Returns a short identifier of the socket type used for this address, as used in logs.
    pub const fn transport_id(&self) -> &'static str {
        match self {
            RemoteAddr::Udp(_) => "udp",
            #[cfg(unix)]
            RemoteAddr::Unix(_) => "uds-stream",
            #[cfg(unix)]
            RemoteAddr::Unixgram(_) => "uds",
        }
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        if let Some((scheme, rest)) = addr.split_once("://") {
            return match scheme {
                "udp" => resolve_udp(rest),
                #[cfg(unix)]
                "unix" => Ok(RemoteAddr::Unix(PathBuf::from(rest))),
                #[cfg(unix)]
                "unixgram" => Ok(RemoteAddr::Unixgram(PathBuf::from(rest))),
                _ => Err(format!("invalid scheme '{scheme}' (expected 'udp', 'unix' or 'unixgram')")),
            };
        }

        resolve_udp(addr)
    }
}

fn resolve_udp(addr: &str) -> Result<RemoteAddr, String> {
    match addr.to_socket_addrs() {
        Ok(addrs) => {
            let addrs = addrs.collect::<Vec<_>>();
            if addrs.is_empty() {
                Err(format!("'{addr}' did not resolve to any address"))
            } else {
                Ok(RemoteAddr::Udp(addrs))
            }
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Behavior of the dispatch queue when it is full.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QueueFullPolicy {
    /// Drop the payload immediately.
    Drop,

    /// Wait up to the given duration for room in the queue, and then drop the payload.
    Block(Duration),
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub struct ForwarderConfiguration {
    pub queue_len: usize,
    pub workers: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub drain_on_shutdown: bool,
}

/// Producer side of the bounded queue between metric handlers and the forwarder workers.
///
/// Enqueuing never blocks for longer than the configured [`QueueFullPolicy`] allows. Payloads that cannot be
/// enqueued are returned to the buffer pool and counted as dropped.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: Sender<StatsdBuffer>,
    pool: Arc<BufferPool>,
    telemetry: Arc<Telemetry>,
    policy: QueueFullPolicy,
}

impl DispatchQueue {
    /// Creates a bounded dispatch queue, returning the producer side and the consumer side.
    pub fn bounded(
        len: usize,
        pool: Arc<BufferPool>,
        telemetry: Arc<Telemetry>,
        policy: QueueFullPolicy,
    ) -> (Self, Receiver<StatsdBuffer>) {
        let (tx, rx) = crossbeam_channel::bounded(len);
        (Self { tx, pool, telemetry, policy }, rx)
    }

    /// Returns a reference to the buffer pool that dropped payloads are returned to.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Returns a reference to the telemetry that drops are recorded in.
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Enqueues a payload for sending.
    ///
    /// Empty payloads are returned to the pool without being enqueued.
    pub fn enqueue(&self, buffer: StatsdBuffer) {
        if buffer.is_empty() {
            self.pool.release(buffer);
            return;
        }

        let result = match self.policy {
            QueueFullPolicy::Drop => self.tx.try_send(buffer).map_err(|e| match e {
                TrySendError::Full(buffer) => (buffer, "queue full"),
                TrySendError::Disconnected(buffer) => (buffer, "queue closed"),
            }),
            QueueFullPolicy::Block(timeout) => self.tx.send_timeout(buffer, timeout).map_err(|e| match e {
                SendTimeoutError::Timeout(buffer) => (buffer, "queue full"),
                SendTimeoutError::Disconnected(buffer) => (buffer, "queue closed"),
            }),
        };

        if let Err((buffer, reason)) = result {
            debug!(reason, payload_len = buffer.len(), "Dropping payload.");
            self.telemetry.track_packet_dropped_queue(buffer.len());
            self.pool.release(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{DispatchQueue, QueueFullPolicy, RemoteAddr};
    use crate::{
        pool::{BufferPool, PoolConfiguration},
        telemetry::Telemetry,
    };

    fn queue(len: usize, policy: QueueFullPolicy) -> (DispatchQueue, crossbeam_channel::Receiver<crate::StatsdBuffer>) {
        let pool = Arc::new(BufferPool::new(&PoolConfiguration {
            initial_buffers: 4,
            max_buffers: 4,
            buffer_len: 64,
            max_elements: usize::MAX,
        }));
        DispatchQueue::bounded(len, pool, Arc::new(Telemetry::new("test")), policy)
    }

    fn filled(queue: &DispatchQueue) -> crate::StatsdBuffer {
        let mut buffer = queue.pool().borrow();
        buffer.write_line(&[b"a:1|c\n"]);
        buffer
    }

    #[test]
    fn remote_addr_parsing() {
        assert_eq!(
            RemoteAddr::try_from("127.0.0.1:8125"),
            Ok(RemoteAddr::Udp(vec!["127.0.0.1:8125".parse().unwrap()]))
        );
        assert_eq!(
            RemoteAddr::try_from("udp://127.0.0.1:9125"),
            Ok(RemoteAddr::Udp(vec!["127.0.0.1:9125".parse().unwrap()]))
        );
        assert!(RemoteAddr::try_from("tcp://127.0.0.1:8125").is_err());
        assert!(RemoteAddr::try_from("not an address").is_err());

        #[cfg(unix)]
        {
            assert_eq!(
                RemoteAddr::try_from("unix:///var/run/datadog/dsd.socket"),
                Ok(RemoteAddr::Unix("/var/run/datadog/dsd.socket".into()))
            );
            assert_eq!(
                RemoteAddr::try_from("unixgram:///var/run/datadog/dsd.socket"),
                Ok(RemoteAddr::Unixgram("/var/run/datadog/dsd.socket".into()))
            );
        }
    }

    #[test]
    fn empty_payloads_are_not_enqueued() {
        let (queue, rx) = queue(4, QueueFullPolicy::Drop);
        let before = queue.pool().available();

        let buffer = queue.pool().borrow();
        queue.enqueue(buffer);

        assert!(rx.is_empty());
        assert_eq!(queue.pool().available(), before);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (queue, rx) = queue(1, QueueFullPolicy::Drop);

        queue.enqueue(filled(&queue));
        queue.enqueue(filled(&queue));

        assert_eq!(rx.len(), 1);
        let snapshot = queue.telemetry().snapshot();
        assert_eq!(snapshot.packets_dropped_queue, 1);
        assert_eq!(snapshot.bytes_dropped_queue, 6);

        // The dropped payload went back to the pool: one buffer is queued, the rest are free.
        assert_eq!(queue.pool().available(), 3);
    }

    #[test]
    fn blocking_policy_times_out() {
        let (queue, rx) = queue(1, QueueFullPolicy::Block(Duration::from_millis(10)));

        queue.enqueue(filled(&queue));
        queue.enqueue(filled(&queue));

        assert_eq!(rx.len(), 1);
        assert_eq!(queue.telemetry().snapshot().packets_dropped_queue, 1);
    }

    #[test]
    fn closed_queue_drops() {
        let (queue, rx) = queue(4, QueueFullPolicy::Drop);
        drop(rx);

        queue.enqueue(filled(&queue));
        assert_eq!(queue.telemetry().snapshot().packets_dropped_queue, 1);
        assert_eq!(queue.pool().available(), 4);
    }
}
