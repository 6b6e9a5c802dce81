// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The race-free stop handshake: a completed `stop()` means no callback is
//! in flight and none will begin until the next `start()`.

use linchpin::tick::units_to_ticks;
use linchpin::timer::{Timer, TimerState};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

#[test]
fn test_stop_blocks_until_the_in_flight_callback_returns() {
    let fires = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&fires);
    // Each callback dwells well past the 1 ms period, so a stop issued
    // mid-callback genuinely races an in-flight invocation.
    let timer = Timer::periodic(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        0
    })
    .unwrap();

    timer.start(units_to_ticks(1, 1_000)).unwrap(); // 1 ms period
    while fires.load(Ordering::SeqCst) == 0 {
        std::thread::sleep(Duration::from_micros(100));
    }

    let issued = Instant::now();
    timer.stop().unwrap();
    // The handshake window is max(1 s, 2 x interval); give generous slack
    // for a loaded host on top of that.
    assert!(issued.elapsed() < Duration::from_secs(5));
    assert_eq!(timer.state(), TimerState::Idle);

    // No further callback may begin after stop() has returned.
    let at_stop = fires.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fires.load(Ordering::SeqCst), at_stop);

    // The timer remains usable: start followed by an immediate stop.
    timer.start(units_to_ticks(1, 1_000)).unwrap();
    timer.stop().unwrap();
    assert_eq!(timer.state(), TimerState::Idle);
}

#[test]
fn test_oneshot_returns_to_idle_without_stop() {
    let fires = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&fires);
    let timer = Timer::oneshot(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        0
    })
    .unwrap();

    timer.start(units_to_ticks(5, 1_000)).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fires.load(Ordering::SeqCst), 1);
    assert_eq!(timer.state(), TimerState::Idle);

    // Re-arm after the self-disarm.
    timer.start(units_to_ticks(5, 1_000)).unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(fires.load(Ordering::SeqCst), 2);
}

#[test]
fn test_drop_joins_the_service_thread() {
    let fires = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&fires);
    let timer = Timer::periodic(move || {
        counted.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(2));
        0
    })
    .unwrap();
    timer.start(units_to_ticks(1, 1_000)).unwrap();
    while fires.load(Ordering::SeqCst) == 0 {
        std::thread::sleep(Duration::from_micros(100));
    }
    drop(timer);
    // After drop has joined the service thread, the count is frozen.
    let at_drop = fires.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(fires.load(Ordering::SeqCst), at_drop);
}
