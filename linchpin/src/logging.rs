// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Opt-in `tracing` bootstrap.
//!
//! The library itself only *emits* through [`tracing`]; it never installs a
//! subscriber behind the application's back. Binaries and tests that want to
//! see the crate's diagnostics call [`init`] once, early; the filter comes
//! from `RUST_LOG` in the usual way.

use tracing_subscriber::EnvFilter;

/// Installs an env-filtered formatting subscriber as the global default.
/// Safe to call more than once; only the first call takes effect.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
