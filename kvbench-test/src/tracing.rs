use tracing_subscriber::EnvFilter;

/// Crates whose logs tests want to see in full.
const CRATE_NAMES: &[&str] = &["kvbench", "kvbench_store", "kvbench_types"];

/// Routes benchmark logs into the output captured by the test harness.
///
/// Everything from the kvbench crates is shown down to `TRACE`. The AWS SDK, `reqwest`, `hyper`
/// and the axum server behind the fake Elasticsearch only get through with errors, so a failing
/// test shows the simulation steps without connection-pool chatter. Calling this more than once
/// is harmless.
///
/// ```
/// kvbench_test::tracing::init();
/// ```
pub fn init() {
    let env_filter = CRATE_NAMES
        .iter()
        .filter_map(|name| format!("{name}=TRACE").parse().ok())
        .fold(EnvFilter::new("ERROR"), EnvFilter::add_directive);

    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}
