/// Send `tracing` output (and the library's `log` records) to stderr, keeping
/// stdout for results.
pub fn init(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
