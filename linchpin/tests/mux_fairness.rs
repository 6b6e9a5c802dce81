// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Readiness accounting and round-robin fairness across waits.

use linchpin::mux::Mux;
use linchpin::tick::{Sticks, units_to_ticks};
use std::collections::HashSet;
use std::os::fd::{AsRawFd, OwnedFd};

fn second() -> Sticks { units_to_ticks(1, 1) as Sticks }

fn pipes(count: usize) -> Vec<(OwnedFd, OwnedFd)> {
    (0..count).map(|_| rustix::pipe::pipe().unwrap()).collect()
}

#[test]
fn test_wait_count_matches_ready_drains_exactly() {
    let pipes = pipes(16);
    let mut mux = Mux::new().unwrap();
    for (reader, _) in &pipes {
        mux.register_read(reader.as_raw_fd()).unwrap();
    }
    for (_, writer) in &pipes {
        rustix::io::write(writer, b"x").unwrap();
    }

    let ready = mux.wait(second()).unwrap();
    assert_eq!(ready, 16);

    let mut seen = HashSet::new();
    for _ in 0..16 {
        let fd = mux.ready_read().expect("a banked descriptor");
        assert!(seen.insert(fd), "descriptor {fd} delivered twice");
    }
    assert_eq!(mux.ready_read(), None); // The seventeenth call is exhausted.

    let expected: HashSet<_> = pipes.iter().map(|(r, _)| r.as_raw_fd()).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_delivery_round_robins_across_waits() {
    let pipes = pipes(4);
    let mut mux = Mux::new().unwrap();
    let mut fds: Vec<_> = pipes.iter().map(|(r, _)| r.as_raw_fd()).collect();
    fds.sort_unstable();
    for &fd in &fds {
        mux.register_read(fd).unwrap();
    }

    let mut write_all = || {
        for (_, writer) in &pipes {
            rustix::io::write(writer, b"x").unwrap();
        }
    };

    // First wait: delivery starts from the lowest descriptor.
    write_all();
    assert_eq!(mux.wait(second()).unwrap(), 4);
    assert_eq!(mux.ready_read(), Some(fds[0]));
    assert_eq!(mux.ready_read(), Some(fds[1]));
    // Two left banked; the next wait rebanks fresh readiness.

    // Second wait: delivery resumes past the cursor rather than restarting
    // at the lowest descriptor.
    write_all();
    assert_eq!(mux.wait(second()).unwrap(), 4);
    assert_eq!(mux.ready_read(), Some(fds[2]));
    assert_eq!(mux.ready_read(), Some(fds[3]));
    assert_eq!(mux.ready_read(), Some(fds[0]));
    assert_eq!(mux.ready_read(), Some(fds[1]));
    assert_eq!(mux.ready_read(), None);
}

#[test]
fn test_timeout_returns_zero_ready() {
    let pipes = pipes(1);
    let mut mux = Mux::new().unwrap();
    mux.register_read(pipes[0].0.as_raw_fd()).unwrap();
    let ready = mux.wait(units_to_ticks(10, 1_000) as Sticks).unwrap(); // 10 ms
    assert_eq!(ready, 0);
}
