use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{select, Receiver, Sender};
use tracing::{debug, error, trace};

use crate::{
    pool::{BufferPool, StatsdBuffer},
    telemetry::Telemetry,
};

use super::{transport::Transport, ForwarderConfiguration};

/// A sender worker.
///
/// Workers pull payloads from the dispatch queue, write them to the transport, and return them to the pool. On
/// shutdown, payloads still in the queue are either sent or discarded, depending on the configuration.
pub struct Forwarder {
    queue: Receiver<StatsdBuffer>,
    stop: Receiver<()>,
    transport: Arc<dyn Transport>,
    pool: Arc<BufferPool>,
    telemetry: Arc<Telemetry>,
    drain_on_shutdown: bool,
}

impl Forwarder {
    fn send(&self, buffer: StatsdBuffer) {
        let payload = buffer.as_bytes();
        match self.transport.send(payload) {
            Ok(_) => {
                trace!(payload_len = payload.len(), "Sent payload.");
                self.telemetry.track_packet_send_succeeded(payload.len());
            }
            Err(e) => {
                error!(error = %e, transport = self.transport.transport_id(), "Failed to send payload.");
                self.telemetry.track_packet_send_failed(payload.len());
            }
        }

        self.pool.release(buffer);
    }

    fn discard(&self, buffer: StatsdBuffer) {
        self.telemetry.track_packet_dropped_queue(buffer.len());
        self.pool.release(buffer);
    }

    fn finish(&self) {
        let mut drained = 0;
        let mut discarded = 0;
        for buffer in self.queue.try_iter() {
            if self.drain_on_shutdown {
                self.send(buffer);
                drained += 1;
            } else {
                self.discard(buffer);
                discarded += 1;
            }
        }

        debug!(drained, discarded, "Forwarder worker stopped.");
    }

    /// Runs the worker until the stop signal is received, or every producer is gone.
    pub fn run(self) {
        debug!(transport = self.transport.transport_id(), "Forwarder worker started.");

        loop {
            select! {
                recv(self.queue) -> msg => match msg {
                    Ok(buffer) => self.send(buffer),
                    // Every producer is gone and the queue is empty.
                    Err(_) => break,
                },
                recv(self.stop) -> _ => break,
            }
        }

        self.finish();
    }
}

/// Handle to a running set of sender workers.
pub struct ForwarderHandle {
    stop: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl ForwarderHandle {
    /// Signals every worker to stop, and waits for them to finish.
    ///
    /// Calling this more than once is a no-op.
    pub fn shutdown(&mut self) {
        // Workers observe the disconnection of the stop channel.
        drop(self.stop.take());

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Forwarder worker panicked.");
            }
        }
    }
}

impl Drop for ForwarderHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawns the configured number of sender workers.
///
/// # Errors
///
/// If a worker thread cannot be spawned, an error is returned and any workers already spawned are stopped.
pub fn spawn(
    config: &ForwarderConfiguration,
    queue: &Receiver<StatsdBuffer>,
    transport: &Arc<dyn Transport>,
    pool: &Arc<BufferPool>,
    telemetry: &Arc<Telemetry>,
) -> io::Result<ForwarderHandle> {
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
    let mut handle = ForwarderHandle { stop: Some(stop_tx), workers: Vec::with_capacity(config.workers) };

    for idx in 0..config.workers.max(1) {
        let forwarder = Forwarder {
            queue: queue.clone(),
            stop: stop_rx.clone(),
            transport: Arc::clone(transport),
            pool: Arc::clone(pool),
            telemetry: Arc::clone(telemetry),
            drain_on_shutdown: config.drain_on_shutdown,
        };

        let worker = thread::Builder::new().name(format!("dogstatsd-sender-{idx}")).spawn(move || forwarder.run())?;
        handle.workers.push(worker);
    }

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use std::{io, sync::Arc, time::Duration};

    use parking_lot::Mutex;

    use super::spawn;
    use crate::{
        forwarder::{transport::Transport, DispatchQueue, ForwarderConfiguration, QueueFullPolicy},
        pool::{BufferPool, PoolConfiguration},
        telemetry::Telemetry,
    };

    #[derive(Default)]
    struct Recording {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl Transport for Recording {
        fn send(&self, payload: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "no agent"));
            }
            self.payloads.lock().push(payload.to_vec());
            Ok(payload.len())
        }
    }

    fn setup(
        drain_on_shutdown: bool,
        workers: usize,
    ) -> (DispatchQueue, crossbeam_channel::Receiver<crate::StatsdBuffer>, ForwarderConfiguration) {
        let pool = Arc::new(BufferPool::new(&PoolConfiguration {
            initial_buffers: 4,
            max_buffers: 16,
            buffer_len: 64,
            max_elements: usize::MAX,
        }));
        let (queue, rx) = DispatchQueue::bounded(16, pool, Arc::new(Telemetry::new("test")), QueueFullPolicy::Drop);
        let config = ForwarderConfiguration {
            queue_len: 16,
            workers,
            queue_full_policy: QueueFullPolicy::Drop,
            drain_on_shutdown,
        };
        (queue, rx, config)
    }

    fn enqueue(queue: &DispatchQueue, line: &[u8]) {
        let mut buffer = queue.pool().borrow();
        buffer.write_line(&[line]);
        queue.enqueue(buffer);
    }

    #[test]
    fn sends_queued_payloads_and_recycles_buffers() {
        let (queue, rx, config) = setup(true, 2);
        let recording = Arc::new(Recording::default());
        let transport: Arc<dyn Transport> = recording.clone();

        let mut handle = spawn(&config, &rx, &transport, queue.pool(), queue.telemetry()).unwrap();
        for i in 0..8 {
            enqueue(&queue, format!("m{i}:1|c\n").as_bytes());
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recording.payloads.lock().len() < 8 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.shutdown();

        let mut payloads = recording.payloads.lock().clone();
        payloads.sort();
        let expected = (0..8).map(|i| format!("m{i}:1|c\n").into_bytes()).collect::<Vec<_>>();
        assert_eq!(payloads, expected);

        let snapshot = queue.telemetry().snapshot();
        assert_eq!(snapshot.packets_sent, 8);
        assert_eq!(snapshot.bytes_sent, 56);
        assert_eq!(queue.pool().stats().transient, 0);
    }

    #[test]
    fn shutdown_drains_queue() {
        let (queue, rx, config) = setup(true, 1);
        let recording = Arc::new(Recording::default());
        let transport: Arc<dyn Transport> = recording.clone();

        // Fill the queue before any worker exists, so the payloads are only picked up while stopping.
        for _ in 0..5 {
            enqueue(&queue, b"a:1|c\n");
        }

        let mut handle = spawn(&config, &rx, &transport, queue.pool(), queue.telemetry()).unwrap();
        handle.shutdown();

        assert_eq!(recording.payloads.lock().len(), 5);
        assert!(rx.is_empty());
    }

    #[test]
    fn shutdown_without_drain_discards() {
        let (queue, rx, config) = setup(false, 1);
        let transport: Arc<dyn Transport> = Arc::new(Recording::default());

        for _ in 0..5 {
            enqueue(&queue, b"a:1|c\n");
        }

        let mut handle = spawn(&config, &rx, &transport, queue.pool(), queue.telemetry()).unwrap();
        handle.shutdown();

        // The worker may race the stop signal and send some payloads, but nothing is left behind.
        let snapshot = queue.telemetry().snapshot();
        assert_eq!(snapshot.packets_sent + snapshot.packets_dropped_queue, 5);
        assert!(rx.is_empty());
    }

    #[test]
    fn send_failures_are_counted() {
        let (queue, rx, config) = setup(true, 1);
        let transport: Arc<dyn Transport> = Arc::new(Recording { fail: true, ..Default::default() });

        enqueue(&queue, b"a:1|c\n");
        let mut handle = spawn(&config, &rx, &transport, queue.pool(), queue.telemetry()).unwrap();
        handle.shutdown();

        let snapshot = queue.telemetry().snapshot();
        assert_eq!(snapshot.packets_dropped_writer, 1);
        assert_eq!(snapshot.bytes_dropped_writer, 6);
        assert_eq!(queue.pool().available(), 4);
    }
}
