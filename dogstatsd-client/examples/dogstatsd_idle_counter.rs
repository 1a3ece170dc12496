use std::time::{Duration, Instant};

use dogstatsd_client::DogStatsDClientBuilder;

fn main() {
    tracing_subscriber::fmt::init();

    let client = DogStatsDClientBuilder::from_env()
        .expect("failed to read configuration from environment")
        .with_remote_address("localhost:9125")
        .expect("failed to parse remote address")
        .with_flush_interval(Duration::from_secs(1))
        .build()
        .expect("failed to build DogStatsD client");

    client.incr("idle_metric", &[]).expect("failed to submit metric");

    // Loop over and over, incrementing our counter every 10 seconds or so. The background flusher sends the
    // otherwise-idle payload without any explicit flush.
    let mut last_update = Instant::now();
    loop {
        if last_update.elapsed() > Duration::from_secs(10) {
            client.incr("idle_metric", &[]).expect("failed to submit metric");
            last_update = Instant::now();
        }

        std::thread::sleep(Duration::from_secs(1));
    }
}
