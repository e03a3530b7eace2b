//! Shared test setup. A `tests/common/mod.rs` (rather than `tests/common.rs`)
//! is not itself picked up as a separate test binary by cargo.

/// Installs a process-wide `tracing` subscriber the first time it's called;
/// later calls (from other tests in the same binary) are no-ops, since
/// `try_init` only fails when a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::level_filters::LevelFilter::DEBUG.into())
                .from_env_lossy(),
        )
        .try_init();
}
