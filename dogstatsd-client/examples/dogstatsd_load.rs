use std::{sync::Arc, thread};

use dogstatsd_client::{DogStatsDClientBuilder, Metric};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

fn main() {
    tracing_subscriber::fmt::init();

    let client = DogStatsDClientBuilder::default()
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .with_namespace("load.")
        .with_global_tags(["system:foo"])
        .build()
        .expect("failed to build DogStatsD client");
    let client = Arc::new(client);

    // Pretend to do some work on a few threads, reporting as we go.
    let workers = (0..4)
        .map(|worker| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let mut rng = Xoshiro256StarStar::from_rng(&mut rand::rng());
                let worker_tag = format!("worker:{worker}");
                let tags = [worker_tag.as_str()];

                for _ in 0..100_000 {
                    client.incr("server_loops", &tags).expect("failed to submit metric");
                    client
                        .submit(
                            Metric::histogram("server_loop_delta_secs", rng.random_range(0.0..1.0))
                                .with_borrowed_tags(&tags)
                                .with_rate(0.1),
                        )
                        .expect("failed to submit metric");

                    let batch = (0..16).map(|_| rng.random_range(0.0..250.0)).collect();
                    client
                        .submit(Metric::distribution_aggregated("request_latency_ms", batch, worker_tag.as_str()))
                        .expect("failed to submit metric");
                }
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        worker.join().expect("worker panicked");
    }

    client.close();

    let telemetry = client.telemetry();
    println!(
        "points: {}, payloads sent: {}, payloads dropped: {}, bytes sent: {}",
        telemetry.metric_points(),
        telemetry.packets_sent,
        telemetry.packets_dropped(),
        telemetry.bytes_sent
    );
    println!("pool: {:?}", client.pool_stats());
}
