use log::LevelFilter;

/// Installs the global logger at `level`; `RUST_LOG` takes precedence.
/// Calling it twice is harmless, the second call is ignored.
pub fn init(level: LevelFilter) {
    let default = level.to_string().to_lowercase();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .try_init();
}
