use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// JSON logs to stderr, keeping stdout free for the report.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ev_insight=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();
}
