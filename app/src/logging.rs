/// Installs the process logger.
///
/// Honors `RUST_LOG`; defaults to `info` so session lifecycle messages are
/// visible without configuration.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
