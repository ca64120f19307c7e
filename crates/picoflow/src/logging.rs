use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Build the filter for the subscriber: `RUST_LOG` when set and valid, `level` otherwise.
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install a compact formatter on stderr as the global subscriber.
///
/// Does nothing if a global subscriber is already set.
pub fn init(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
