// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The notify/notifications handshake between a parent and a worker thread.

use linchpin::thread::{Lifecycle, Thread, current};
use std::time::Duration;

#[test]
fn test_notify_handshake_delivers_every_notification() {
    // The worker collects notifications until it has seen three in total;
    // batches may coalesce (each take can observe 1..=3) but the sum is
    // exact.
    let mut worker = Thread::new(|| {
        let core = current();
        let mut total = 0u32;
        while total < 3 {
            let batch = core.take_notifications();
            assert!(batch <= 3);
            total += batch;
            std::thread::sleep(Duration::from_millis(1));
        }
        total
    });

    worker.start().unwrap();
    while worker.state() != Lifecycle::Running {
        std::thread::sleep(Duration::from_millis(1));
    }

    for _ in 0..3 {
        worker.notify().unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(worker.join().unwrap(), 3);
    assert_eq!(worker.state(), Lifecycle::Joined);
}

#[test]
fn test_exit_value_survives_repeated_joins() {
    let mut worker = Thread::new(|| "done".to_string());
    worker.start().unwrap();
    assert_eq!(worker.join().unwrap(), "done");
    assert_eq!(worker.join().unwrap(), "done");
}
