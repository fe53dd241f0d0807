use parallel_pipeline::{
    queue_set, BoxError, CancelToken, PipelineBuilder, PipelineError, Route, Stage, StageConfig,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(50);

fn identity(n: usize) -> Result<usize, BoxError> {
    Ok(n)
}

#[test]
fn test_three_stage_roundtrip_delivers_each_item_once() {
    const ITEMS: usize = 10_000;
    let cancel = CancelToken::new();
    let delivered: Arc<Vec<AtomicU32>> =
        Arc::new((0..ITEMS).map(|_| AtomicU32::new(0)).collect());
    let sink_view = Arc::clone(&delivered);

    let mut pipeline = PipelineBuilder::<usize, usize>::with_entry(&cancel, 2, 64)
        .transform(
            "first",
            StageConfig {
                workers: 2,
                queues: 3,
                capacity: 64,
            },
            |_| identity,
        )
        .expect("first stage")
        .transform(
            "second",
            StageConfig {
                workers: 2,
                queues: 2,
                capacity: 64,
            },
            |_| identity,
        )
        .expect("second stage")
        .sink("record", 2, move |_| {
            let delivered = Arc::clone(&sink_view);
            move |n: usize| -> Result<(), BoxError> {
                delivered[n].fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .expect("sink stage");

    for i in 0..ITEMS {
        assert!(matches!(pipeline.feed(i), Route::Accepted { .. }));
    }
    pipeline.wait().expect("pipeline run");

    for (i, count) in delivered.iter().enumerate() {
        assert_eq!(count.load(Ordering::Relaxed), 1, "item {i} delivery count");
    }
}

#[test]
fn test_cancellation_unblocks_idle_stages_promptly() {
    let cancel = CancelToken::new();
    let entry = queue_set(1, 8);
    let mid = queue_set(1, 8);

    let relay = Stage::transform("relay", entry, mid.clone(), identity, cancel.clone())
        .expect("relay stage")
        .with_poll_timeout(POLL);
    let tail = Stage::sink(
        "tail",
        mid.clone(),
        |_n: usize| -> Result<(), BoxError> { Ok(()) },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);

    let relay_worker = thread::spawn(move || relay.run());
    let tail_worker = thread::spawn(move || tail.run());

    // Let both workers settle into their idle polling loops
    thread::sleep(Duration::from_millis(120));
    let raised_at = Instant::now();
    cancel.cancel();

    let relay_outcome = relay_worker.join().unwrap();
    let tail_outcome = tail_worker.join().unwrap();
    let latency = raised_at.elapsed();

    assert!(relay_outcome.is_cancelled());
    assert!(tail_outcome.is_cancelled());
    assert!(
        latency < Duration::from_millis(400),
        "workers took {latency:?} to observe cancellation"
    );
    assert!(mid.iter().all(|q| q.is_completed()));
}

#[test]
fn test_fault_releases_downstream_via_completion() {
    let cancel = CancelToken::new();
    let entry = queue_set(1, 8);
    let mid = queue_set(2, 8);

    let reject_all = |_n: usize| -> Result<usize, BoxError> { Err("broken transform".into()) };
    let faulty = Stage::transform("faulty", entry.clone(), mid.clone(), reject_all, cancel.clone())
        .expect("faulty stage")
        .with_poll_timeout(POLL);

    let consumed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&consumed);
    let tail = Stage::sink(
        "tail",
        mid.clone(),
        move |_n: usize| -> Result<(), BoxError> {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
        cancel.clone(),
    )
    .with_poll_timeout(POLL);

    let faulty_worker = thread::spawn(move || faulty.run());
    let tail_worker = thread::spawn(move || tail.run());

    entry[0].push(1).unwrap();
    entry[0].mark_completed();

    // Nobody cancels: the sink must still terminate, released by the
    // faulted stage completing its outputs
    let fault = faulty_worker.join().unwrap();
    let tail_outcome = tail_worker.join().unwrap();

    assert!(fault.is_faulted());
    assert!(matches!(
        fault.into_result(),
        Err(PipelineError::Processing { .. })
    ));
    assert!(tail_outcome.is_completed());
    assert_eq!(consumed.load(Ordering::Relaxed), 0);
    assert!(mid.iter().all(|q| q.is_exhausted()));
}

#[test]
fn test_eight_workers_drain_shared_inputs_exactly_once() {
    const ITEMS: usize = 250_000;
    let cancel = CancelToken::new();
    let delivered: Arc<Vec<AtomicU32>> =
        Arc::new((0..ITEMS).map(|_| AtomicU32::new(0)).collect());
    let sink_view = Arc::clone(&delivered);

    let mut pipeline = PipelineBuilder::<usize, usize>::with_entry(&cancel, 1, 100)
        .sink("drain", 8, move |_| {
            let delivered = Arc::clone(&sink_view);
            move |n: usize| -> Result<(), BoxError> {
                delivered[n].fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .expect("sink stage");

    for i in 0..ITEMS {
        pipeline.feed(i);
    }
    pipeline.wait().expect("pipeline run");

    let double_processed = delivered
        .iter()
        .filter(|c| c.load(Ordering::Relaxed) != 1)
        .count();
    assert_eq!(double_processed, 0);
}

#[test]
fn test_producer_threads_feed_through_entry_handles() {
    const PER_PRODUCER: usize = 1_000;
    let cancel = CancelToken::new();
    let total = Arc::new(AtomicUsize::new(0));
    let sum = Arc::clone(&total);

    let pipeline = PipelineBuilder::<usize, usize>::with_entry(&cancel, 4, 32)
        .transform(
            "tag",
            StageConfig {
                workers: 2,
                queues: 2,
                capacity: 32,
            },
            |_| identity,
        )
        .expect("tag stage")
        .sink("tally", 2, move |_| {
            let sum = Arc::clone(&sum);
            move |_n: usize| -> Result<(), BoxError> {
                sum.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .expect("sink stage");

    let mut producers = Vec::new();
    for p in 0..3 {
        let entry = pipeline.entry_handles();
        producers.push(thread::spawn(move || {
            // Spread pushes across the entry fan, one queue per producer
            let queue = &entry[p % entry.len()];
            for i in 0..PER_PRODUCER {
                queue.push(i).unwrap();
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }
    pipeline.wait().expect("pipeline run");

    assert_eq!(total.load(Ordering::Relaxed), 3 * PER_PRODUCER);
}

#[test]
fn test_cancelled_pipeline_still_joins_cleanly() {
    let cancel = CancelToken::new();
    let consumed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&consumed);

    let mut pipeline = PipelineBuilder::<usize, usize>::new(&cancel)
        .transform("slow", StageConfig::default(), |_| {
            |n: usize| -> Result<usize, BoxError> {
                thread::sleep(Duration::from_millis(1));
                Ok(n)
            }
        })
        .expect("slow stage")
        .sink("count", 1, move |_| {
            let counter = Arc::clone(&counter);
            move |_n: usize| -> Result<(), BoxError> {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        })
        .expect("sink stage");

    for i in 0..1_000 {
        if matches!(pipeline.feed(i), Route::Cancelled) {
            break;
        }
        if i == 100 {
            pipeline.cancel();
        }
    }
    // Cancellation is voluntary shutdown, not an error
    pipeline.wait().expect("cancelled pipeline joins");
    assert!(consumed.load(Ordering::Relaxed) <= 1_000);
}
