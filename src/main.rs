use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use clap::Parser;
use colored::*;
use hazard_fifo::Queue;
use rand::Rng;

mod demo;

const N_PUSH_THREADS: usize = 4;
const N_POP_THREADS: usize = 4;
const REFERENCE_NUM: i64 = 1_000_000;
const QUICK_NUM: i64 = 2_000;
const KILL_SENTINEL: i64 = -1;

/// Command-line driver for the hazard-pointer FIFO queue.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run the reference stress scenario: 4 producers x NUM pushes, 4
    /// consumers, 4 kill sentinels broadcast after producers join.
    #[arg(short, long)]
    stress_test: bool,

    /// Scale the stress scenario to the reference 1,000,000 pushes per
    /// producer instead of the smaller interactive default.
    #[arg(long)]
    full: bool,

    /// Print each push/pop's linearization as it happens.
    #[arg(short, long)]
    verbose: bool,

    /// Run the diagnostics helper instead of any demo.
    #[arg(long)]
    diagnose: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    println!("{}", "Hazard-Pointer FIFO Queue Demonstration".green().bold());
    println!("=========================================\n");

    if args.diagnose {
        println!("{}", "Running diagnostics...".yellow().bold());
        demo::diagnose();
        return;
    }

    if args.stress_test {
        stress_test(args.full, args.verbose);
    } else {
        basic_demo();
    }

    println!("\n{}", "Demonstration complete!".green().bold());
}

fn basic_demo() {
    println!("{}", "Running basic demonstration...".yellow().bold());

    let queue = Queue::new();
    let handle = queue.attach().expect("attach should succeed");

    println!("Pushing values 1, 2, 3 onto the queue");
    handle.push(1).expect("push should succeed");
    handle.push(2).expect("push should succeed");
    handle.push(3).expect("push should succeed");

    println!("\nPopping values from the queue:");
    while let Some(value) = handle.pop() {
        println!("Popped: {value}");
    }
    println!("Queue observed empty.");
}

/// Runs the reference producer/consumer scenario: each of `N_PUSH_THREADS`
/// producers pushes the same range `0..num`, so every integer in that range
/// should be received exactly `N_PUSH_THREADS` times across all consumers;
/// after producers join, `N_POP_THREADS` kill sentinels (`-1`) are pushed to
/// end the consumers.
fn stress_test(full: bool, verbose: bool) {
    let num = if full { REFERENCE_NUM } else { QUICK_NUM };
    println!(
        "{}",
        format!("\nRunning stress test: {N_PUSH_THREADS} producers x {num} pushes, {N_POP_THREADS} consumers")
            .yellow()
            .bold()
    );

    let queue = Arc::new(Queue::new());
    let start = Instant::now();

    let producers: Vec<_> = (0..N_PUSH_THREADS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let handle = queue.attach().expect("attach should succeed");
                let mut rng = rand::rng();
                for i in 0..num {
                    handle.push(i).expect("push should succeed");
                    if verbose && rng.random::<f32>() < 0.0001 {
                        println!("{}", format!("producer {id}: pushed {i}").blue());
                    }
                }
            })
        })
        .collect();

    // recv_counts[v] tallies how many times integer v was received across
    // every consumer; index `num` counts kill sentinels received.
    let recv_counts: Vec<Arc<Vec<AtomicUsize>>> = (0..N_POP_THREADS)
        .map(|_| Arc::new((0..=num as usize).map(|_| AtomicUsize::new(0)).collect()))
        .collect();
    let kills_seen = Arc::new(AtomicUsize::new(0));

    let consumers: Vec<_> = (0..N_POP_THREADS)
        .map(|id| {
            let queue = Arc::clone(&queue);
            let counts = Arc::clone(&recv_counts[id]);
            let kills_seen = Arc::clone(&kills_seen);
            thread::spawn(move || {
                let handle = queue.attach().expect("attach should succeed");
                loop {
                    match handle.pop() {
                        Some(KILL_SENTINEL) => {
                            kills_seen.fetch_add(1, Ordering::SeqCst);
                            if verbose {
                                println!("{}", format!("consumer {id}: kill signal").magenta());
                            }
                            break;
                        }
                        Some(v) if (0..num).contains(&v) => {
                            counts[v as usize].fetch_add(1, Ordering::SeqCst);
                        }
                        Some(v) => println!("unexpected value {v}"),
                        None => thread::yield_now(),
                    }
                }
            })
        })
        .collect();

    for p in producers {
        p.join().expect("producer thread panicked");
    }
    println!("All producers joined.");

    let sentinel_pusher = queue.attach().expect("attach should succeed");
    for _ in 0..N_POP_THREADS {
        sentinel_pusher
            .push(KILL_SENTINEL)
            .expect("push should succeed");
    }
    drop(sentinel_pusher);

    for c in consumers {
        c.join().expect("consumer thread panicked");
    }

    let elapsed = Instant::now().duration_since(start);
    println!(
        "Stress test completed in {:.2}s ({} consumer kill signals received)",
        elapsed.as_secs_f32(),
        kills_seen.load(Ordering::SeqCst)
    );

    let mut mismatches = 0;
    for v in 0..num as usize {
        let total: usize = recv_counts.iter().map(|c| c[v].load(Ordering::SeqCst)).sum();
        if total != N_PUSH_THREADS {
            mismatches += 1;
        }
    }

    if mismatches == 0 && kills_seen.load(Ordering::SeqCst) == N_POP_THREADS {
        println!("{}", "Stress test validation passed!".green().bold());
    } else {
        println!(
            "{}",
            format!("Stress test validation FAILED: {mismatches} value(s) with wrong multiplicity")
                .red()
                .bold()
        );
    }
}
