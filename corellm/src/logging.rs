/// Installs the process-wide logger
///
/// Logs are written to stderr so they never interleave with the transcript
/// on stdout. `RUST_LOG` overrides the default filter.
///
/// Log level is Debug in development builds and Info in production builds
pub fn init() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .target(env_logger::Target::Stderr)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init()
}
