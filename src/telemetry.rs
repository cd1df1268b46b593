use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Installs the global subscriber. `RUST_LOG` wins over the default level.
pub fn init(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(true))
            .init(),
        LogFormat::Compact => Registry::default()
            .with(env_filter)
            .with(fmt::layer().with_target(false).compact())
            .init(),
    }
}
