// crates/test-utils/src/lib.rs

//! Fakes and builders shared by the `projrun` integration tests.

pub mod builders;
pub mod fakes;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

static TRACING: Once = Once::new();

/// How long a test may wait on a launched process.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a test-captured subscriber once per test binary.
///
/// Filtered by `RUST_LOG`, `info` otherwise. Output only shows for failing
/// tests unless `--nocapture` is passed.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking once [`TEST_TIMEOUT`] has passed.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test timed out after {TEST_TIMEOUT:?}"),
    }
}
