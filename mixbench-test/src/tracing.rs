//! Log capture for tests.

use tracing_subscriber::EnvFilter;

/// Everything from the mixbench crates, and only errors from dependencies.
const DIRECTIVES: &str = "error,mixbench=trace,mixbench_storage=trace,mixbench_cli=trace";

/// Routes logs into the output captured by the test harness.
///
/// Call it at the top of any test whose logs are worth seeing on failure. Only the first call in a
/// test binary installs the subscriber; later calls do nothing.
///
/// ```
/// mixbench_test::tracing::init();
/// mixbench_test::tracing::init();
/// ```
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(DIRECTIVES))
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
