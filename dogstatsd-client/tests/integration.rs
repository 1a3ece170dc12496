use std::{
    io,
    net::UdpSocket,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use dogstatsd_client::{
    ClientError, DogStatsDClient, DogStatsDClientBuilder, EncodeError, Metric, QueueFullPolicy, Transport,
};
use parking_lot::Mutex;

#[derive(Default)]
struct RecordingTransport {
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl RecordingTransport {
    fn payloads(&self) -> Vec<String> {
        self.payloads.lock().iter().map(|p| String::from_utf8(p.clone()).unwrap()).collect()
    }

    fn wait_for(&self, count: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.payloads.lock().len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.payloads.lock().push(payload.to_vec());
        Ok(payload.len())
    }
}

// Blocks every send until the gate is opened by dropping its sender.
struct GatedTransport {
    gate: crossbeam_channel::Receiver<()>,
}

impl Transport for GatedTransport {
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        let _ = self.gate.recv();
        Ok(payload.len())
    }
}

fn recording_client(builder: DogStatsDClientBuilder) -> (Arc<RecordingTransport>, DogStatsDClient) {
    let transport = Arc::new(RecordingTransport::default());
    let client = builder.build_with_transport(transport.clone()).unwrap();
    (transport, client)
}

#[test]
fn sends_over_udp() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let addr = server.local_addr().unwrap();

    let client = DogStatsDClientBuilder::default()
        .with_remote_address(addr.to_string())
        .unwrap()
        .with_namespace("ns.")
        .with_global_tags(["env:test"])
        .with_shards(1)
        .with_flush_interval(Duration::from_secs(60))
        .build()
        .unwrap();

    client.gauge("gauge", 21.0, &["tag1"]).unwrap();
    client.count("count", 3, &[]).unwrap();
    client.close();

    let mut buf = [0; 1500];
    let n = server.recv(&mut buf).unwrap();
    assert_eq!(std::str::from_utf8(&buf[..n]).unwrap(), "ns.gauge:21|g|#env:test,tag1\nns.count:3|c|#env:test\n");
    assert_eq!(client.telemetry().packets_sent, 1);
}

#[test]
fn client_defaults_only_fill_missing_fields() {
    let (transport, client) = recording_client(
        DogStatsDClientBuilder::default()
            .with_namespace("ns.")
            .with_global_tags(["env:test"])
            .with_shards(1)
            .with_flush_interval(Duration::from_secs(60)),
    );

    client.submit(Metric::gauge("g", 1.0).with_namespace("other.")).unwrap();
    client.submit(Metric::gauge("g", 2.0).with_global_tags(vec!["team:core".to_string()])).unwrap();
    client.close();

    assert_eq!(transport.payloads(), vec!["other.g:1|g|#env:test\nns.g:2|g|#team:core\n"]);
}

#[test]
fn concurrent_producers() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 5_000;

    let (transport, client) = recording_client(
        DogStatsDClientBuilder::default()
            .with_maximum_payload_length(256)
            .with_shards(4)
            .with_queue_full_policy(QueueFullPolicy::Block(Duration::from_secs(5))),
    );
    let client = Arc::new(client);

    let handles = (0..THREADS)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    client.incr("hits", &["route:/"]).unwrap();
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    client.close();

    let payloads = transport.payloads();
    let mut total = 0;
    for payload in &payloads {
        assert!(payload.len() <= 256);
        assert!(payload.ends_with('\n'));
        for line in payload.lines() {
            assert_eq!(line, "hits:1|c|#route:/");
            total += 1;
        }
    }
    assert_eq!(total, THREADS * PER_THREAD);

    let telemetry = client.telemetry();
    assert_eq!(telemetry.count_points, (THREADS * PER_THREAD) as u64);
    assert_eq!(telemetry.packets_sent, payloads.len() as u64);
    assert_eq!(telemetry.packets_dropped(), 0);
}

#[test]
fn aggregated_values_are_split_across_payloads() {
    let (transport, client) =
        recording_client(DogStatsDClientBuilder::default().with_maximum_payload_length(64).with_shards(1));

    let values = (1..=20).map(f64::from).collect::<Vec<_>>();
    client.submit(Metric::distribution_aggregated("latency", values.clone(), "route:/")).unwrap();
    client.close();

    let payloads = transport.payloads();
    assert!(payloads.len() > 1);

    let mut emitted = Vec::new();
    for payload in &payloads {
        assert!(payload.len() <= 64);
        let line = payload.strip_suffix('\n').unwrap();
        let (head, trailer) = line.split_once('|').unwrap();
        assert_eq!(trailer, "d|#route:/");
        let mut parts = head.split(':');
        assert_eq!(parts.next(), Some("latency"));
        emitted.extend(parts.map(|v| v.parse::<f64>().unwrap()));
    }
    assert_eq!(emitted, values);
}

#[test]
fn periodic_flush() {
    let (transport, client) =
        recording_client(DogStatsDClientBuilder::default().with_flush_interval(Duration::from_millis(10)));

    client.incr("idle", &[]).unwrap();
    assert!(transport.wait_for(1), "flusher should send the pending payload");
    assert_eq!(transport.payloads(), vec!["idle:1|c\n"]);
}

#[test]
fn errors() {
    let (transport, client) = recording_client(DogStatsDClientBuilder::default());

    assert_eq!(client.gauge("", 1.0, &[]), Err(ClientError::Encode(EncodeError::EmptyName)));
    assert_eq!(
        client.histogram("h", f64::NAN, &[]),
        Err(ClientError::Encode(EncodeError::NonFiniteValue { name: "h".to_string() }))
    );
    assert_eq!(client.telemetry().encode_errors, 2);

    client.close();
    client.close();
    assert_eq!(client.incr("late", &[]), Err(ClientError::Closed));
    assert!(transport.payloads().is_empty());
}

#[test]
fn full_queue_drops_instead_of_blocking() {
    const METRICS: u64 = 10;

    let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
    let client = DogStatsDClientBuilder::default()
        .with_maximum_metrics_per_payload(1)
        .with_queue_length(1)
        .with_shards(1)
        .build_with_transport(Arc::new(GatedTransport { gate: gate_rx }))
        .unwrap();

    for _ in 0..METRICS {
        client.incr("a", &[]).unwrap();
    }
    client.flush();

    let dropped = client.telemetry().packets_dropped_queue;
    assert!(dropped >= 1);

    drop(gate_tx);
    client.close();

    let telemetry = client.telemetry();
    assert_eq!(telemetry.packets_sent + telemetry.packets_dropped_queue, METRICS);
    assert_eq!(telemetry.bytes_sent + telemetry.bytes_dropped_queue, METRICS * 6);
}

#[test]
fn timing_is_sent_in_milliseconds() {
    let (transport, client) = recording_client(
        DogStatsDClientBuilder::default().with_shards(1).with_flush_interval(Duration::from_secs(60)),
    );

    client.timing("query", Duration::from_micros(1500), &[]).unwrap();
    client.set("users", "alice", &[]).unwrap();
    client.close();

    assert_eq!(transport.payloads(), vec!["query:1.500000|ms\nusers:alice|s\n"]);
}

#[test]
fn submissions_racing_close_are_sent_or_rejected() {
    const THREADS: usize = 4;

    let (transport, client) = recording_client(
        DogStatsDClientBuilder::default()
            .with_shards(2)
            .with_flush_interval(Duration::from_secs(60))
            .with_queue_full_policy(QueueFullPolicy::Block(Duration::from_secs(5))),
    );
    let client = Arc::new(client);

    let handles = (0..THREADS)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let mut accepted = 0;
                loop {
                    match client.incr("racing", &[]) {
                        Ok(()) => accepted += 1,
                        Err(ClientError::Closed) => return accepted,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    thread::sleep(Duration::from_millis(20));
    client.close();

    let accepted: usize = handles.into_iter().map(|handle| handle.join().unwrap()).sum();
    let sent = transport.payloads().iter().map(|payload| payload.lines().count()).sum::<usize>();

    assert!(accepted > 0);
    assert_eq!(sent, accepted);
    assert_eq!(client.telemetry().packets_dropped(), 0);
}
