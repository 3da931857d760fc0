use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use hazard_fifo::Queue;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn custom_criterion() -> Criterion {
    Criterion::default()
        .sample_size(10)
        .measurement_time(Duration::from_secs(1))
        .warm_up_time(Duration::from_secs(1))
}

fn queue_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queue Operations");

    group.measurement_time(Duration::from_secs(1));
    group.warm_up_time(Duration::from_secs(1));
    group.sample_size(10);

    group.bench_function("push", |b| {
        b.iter_batched(
            Queue::<i32>::new,
            |queue| {
                let handle = queue.attach().expect("attach should succeed");
                handle.push(42).expect("push should succeed");
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("pop", |b| {
        b.iter_batched(
            || {
                let queue = Queue::new();
                let handle = queue.attach().expect("attach should succeed");
                handle.push(42).expect("push should succeed");
                drop(handle);
                queue
            },
            |queue| {
                let handle = queue.attach().expect("attach should succeed");
                let _ = handle.pop();
            },
            BatchSize::SmallInput,
        );
    });

    group.bench_function("concurrent_push_pop_2_threads", |b| {
        b.iter_batched(
            || Arc::new(Queue::<i32>::new()),
            |queue| {
                let producer_queue = Arc::clone(&queue);
                let producer = thread::spawn(move || {
                    let handle = producer_queue.attach().expect("attach should succeed");
                    handle.push(1).expect("push should succeed");
                    handle.push(2).expect("push should succeed");
                });

                let consumer_queue = Arc::clone(&queue);
                let consumer = thread::spawn(move || {
                    let handle = consumer_queue.attach().expect("attach should succeed");
                    let _ = handle.pop();
                    let _ = handle.pop();
                });

                producer.join().expect("producer thread panicked");
                consumer.join().expect("consumer thread panicked");
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group! {
    name = benches;
    config = custom_criterion();
    targets = queue_bench
}
criterion_main!(benches);
