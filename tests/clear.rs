use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use segq::{Queue, SEGMENT_CAPACITY};

mod common;

use common::Tracked;

#[test]
fn clear_resets_to_one_empty_segment() {
    common::init_logging();
    let queue = Queue::new().expect("queue");
    queue.enqueue_many(0..3 * SEGMENT_CAPACITY + 5).expect("enqueue");
    assert_eq!(queue.segment_count(), 4);

    queue.clear().expect("clear");
    assert_eq!(queue.count(), 0);
    assert!(queue.is_empty());
    assert_eq!(queue.segment_count(), 1);
    assert_eq!(queue.try_dequeue(), None);

    queue.enqueue(7).expect("enqueue");
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.try_dequeue(), Some(7));
    assert_eq!(queue.try_dequeue(), None);
}

#[test]
fn clear_on_empty_queue() {
    let queue: Queue<String> = Queue::new().expect("queue");
    queue.clear().expect("clear");
    queue.clear().expect("clear twice");
    assert!(queue.is_empty());
    queue.enqueue("after".to_string()).expect("enqueue");
    assert_eq!(queue.try_dequeue().as_deref(), Some("after"));
}

#[test]
fn cleared_items_are_dropped_once() {
    let drops = Arc::new(AtomicUsize::new(0));
    let queue = Queue::new().expect("queue");
    let total = 2 * SEGMENT_CAPACITY + 10;
    for value in 0..total as u64 {
        queue.enqueue(Tracked::new(value, &drops)).expect("enqueue");
    }

    let first = queue.try_dequeue().expect("first item");
    assert_eq!(first.value, 0);
    drop(first);

    queue.clear().expect("clear");
    assert!(common::settle_epochs(|| drops.load(Ordering::Acquire) == total));

    queue.enqueue(Tracked::new(99, &drops)).expect("enqueue");
    drop(queue);
    assert_eq!(drops.load(Ordering::Acquire), total + 1);
}

#[test]
fn clear_races_with_producers_and_consumers() {
    const PRODUCERS: u64 = 3;
    const PER_PRODUCER: u64 = 50_000;

    let drops = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(Queue::new().expect("queue"));
    let dequeued = Arc::new(AtomicUsize::new(0));
    let producing = Arc::new(AtomicUsize::new(PRODUCERS as usize));

    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        let drops = Arc::clone(&drops);
        let producing = Arc::clone(&producing);
        handles.push(thread::spawn(move || {
            for seq in 0..PER_PRODUCER {
                queue
                    .enqueue(Tracked::new((producer << 32) | seq, &drops))
                    .expect("enqueue");
            }
            producing.fetch_sub(1, Ordering::AcqRel);
        }));
    }
    {
        let queue = Arc::clone(&queue);
        let dequeued = Arc::clone(&dequeued);
        let producing = Arc::clone(&producing);
        handles.push(thread::spawn(move || loop {
            match queue.try_dequeue() {
                Some(_) => {
                    dequeued.fetch_add(1, Ordering::AcqRel);
                }
                None if producing.load(Ordering::Acquire) == 0 => break,
                None => thread::yield_now(),
            }
        }));
    }

    while producing.load(Ordering::Acquire) > 0 {
        queue.clear().expect("clear");
        thread::yield_now();
    }
    for handle in handles {
        handle.join().expect("join");
    }
    queue.clear().expect("final clear");

    let created = (PRODUCERS * PER_PRODUCER) as usize;
    assert!(common::settle_epochs(|| drops.load(Ordering::Acquire) == created));
    assert!(dequeued.load(Ordering::Acquire) <= created);
    assert_eq!(queue.count(), 0);
}
