//! Sharing one counter between worker threads behind an external lock.

use crate::{clock::ManualClock, RollingCounter};
use parking_lot::Mutex;
use std::{sync::Arc, thread, time::Duration};

#[test]
fn counter_is_send() {
    let counter = RollingCounter::<String>::new(Duration::from_secs(1)).unwrap();
    crate::tests::assert_send_val(&counter);
}

#[test]
fn locked_counter_serializes_writers() {
    let clock = ManualClock::new();
    let counter = Arc::new(Mutex::new(
        RollingCounter::with_clock(Duration::from_secs(60), clock.clone()).unwrap(),
    ));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let counter = Arc::clone(&counter);
            let clock = clock.clone();
            thread::spawn(move || {
                for _ in 0..=worker * 10 {
                    let mut counter = counter.lock();
                    clock.advance(Duration::from_micros(1));
                    counter.add(worker);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut counter = counter.lock();
    assert_eq!(counter.len(), 4);
    for worker in 0..4 {
        assert_eq!(counter.count(&worker), worker * 10 + 1);
    }
    assert_eq!(counter.max(), Some(3));
}
