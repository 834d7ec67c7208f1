use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use tracing_subscriber::EnvFilter;

static NEXT: AtomicUsize = AtomicUsize::new(0);
static TRACING: Once = Once::new();

/// Unique pipe name per test, so tests can run in parallel and across
/// concurrent `cargo test` invocations.
pub fn unique_name(tag: &str) -> String {
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("shmpipe-{}-{}-{}", tag, std::process::id(), n)
}

/// Honours `RUST_LOG`, writing through the test harness' capture.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
