use env_logger::{Builder, Env};

/// Initialise `env_logger` once. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logger(default_filter: &str) {
    let env = Env::default().default_filter_or(default_filter);
    let _ = Builder::from_env(env)
        .format_timestamp_millis()
        .format_target(true)
        .try_init();
}
