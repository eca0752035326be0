//! Measures what source tracking costs a worker loop.
//!
//! Runs two workloads against the in-memory broker: a rolling counter fed round-robin from ten
//! keys and then drained until every key has expired, and a read/acknowledge loop over a queue
//! filled from several nodes, once with tracking disabled and once enabled.

use futures_util::stream::StreamExt;
use roost::{mock::MockBroker, ConsumerConfig, RollingCounter, TrackingConfig};
use std::{
    error::Error as StdError,
    time::{Duration, Instant},
};
use structopt::StructOpt;
use tracing::info;

const QUEUE: &str = "q";

#[derive(Debug, StructOpt)]
struct Args {
    /// Number of keys added to the counter, and of jobs read from the queue
    #[structopt(long, default_value = "10000")]
    jobs: usize,

    /// Window of the rolling counter, in seconds
    #[structopt(long, default_value = "0.1")]
    ttl_secs: f64,

    /// Number of broker nodes the jobs are spread across
    #[structopt(long, default_value = "3")]
    nodes: usize,
}

fn count_incoming(args: &Args, mut counter: RollingCounter<char>) -> Duration {
    let start = Instant::now();

    for (key, _) in "1234567890".chars().cycle().zip(0..args.jobs) {
        counter.add(key);
    }
    // blocks the runtime thread, which has nothing else to run until the drain is done
    while counter.max().is_some() {
        std::thread::sleep(Duration::from_millis(1));
    }

    start.elapsed()
}

async fn read_jobs(
    args: &Args,
    ttl: Duration,
    track: bool,
) -> Result<Duration, Box<dyn StdError>> {
    let broker = MockBroker::new();
    let nodes: Vec<_> = (0..args.nodes.max(1))
        .map(|n| broker.node(format!("node{n}")))
        .collect();
    for (i, node) in (0..args.jobs).zip(nodes.iter().cycle()) {
        node.add_job(QUEUE, i.to_string());
    }

    let config =
        ConsumerConfig::new(QUEUE).tracking(TrackingConfig::default().enabled(track).ttl(ttl));
    let mut jobs = broker.consumer_from_config(&config)?;
    let start = Instant::now();

    while broker.pending(QUEUE) > 0 {
        let Some(job) = jobs.next().await else {
            break;
        };
        // normally you'd do work here
        job?.ack().await?;
    }

    let elapsed = start.elapsed();
    info!(
        track,
        acked = broker.acked(QUEUE),
        preferred = ?jobs.preferred_source(),
        "finished reading jobs"
    );
    Ok(elapsed)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn StdError>> {
    tracing_subscriber::fmt::init();
    let args = Args::from_args();

    // keep the window short so the counter drain finishes quickly
    let counter = RollingCounter::from_secs_f64(args.ttl_secs)?;
    let ttl = counter.ttl();

    let counting = count_incoming(&args, counter);
    println!("count_incoming: {} keys added and expired in {:?}", args.jobs, counting);

    let untracked = read_jobs(&args, ttl, false).await?;
    let tracked = read_jobs(&args, ttl, true).await?;
    println!(
        "read_jobs: {:?}/job untracked, {:?}/job tracked",
        untracked / args.jobs.max(1) as u32,
        tracked / args.jobs.max(1) as u32,
    );

    Ok(())
}
