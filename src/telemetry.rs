use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the stderr log subscriber. `RUST_LOG` wins over `default_filter`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}
