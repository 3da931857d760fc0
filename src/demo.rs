//! Diagnostics helper for the CLI demo.
//!
//! Exercised with `cargo run -- --diagnose`: a single-threaded round trip
//! followed by a two-thread handoff, both run with `tracing` at `trace`
//! level so the hazard-publish/CAS/retire steps are visible.

use std::sync::Arc;
use std::thread;

use hazard_fifo::Queue;

pub fn diagnose() {
    println!("Single-threaded round trip");
    let queue = Queue::new();
    let handle = queue.attach().expect("attach should succeed");
    handle.push(42).expect("push should succeed");
    match handle.pop() {
        Some(value) => println!("  popped {value}"),
        None => println!("  pop observed an empty queue"),
    }

    println!("\nCross-thread handoff");
    let queue = Arc::new(Queue::new());
    let producer = queue.attach().expect("attach should succeed");
    producer.push(42).expect("push should succeed");
    drop(producer);

    let consumer_queue = Arc::clone(&queue);
    let handle = thread::spawn(move || {
        let consumer = consumer_queue.attach().expect("attach should succeed");
        let result = consumer.pop();
        println!("  thread popped {result:?}");
    });
    handle.join().expect("diagnostic thread panicked");

    println!("\nDiagnostics complete");
}
