use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber. `RUST_LOG` wins over the verbosity flag.
pub fn setup_tracing(verbosity_level: u8) {
    let default_directive = match verbosity_level {
        0 => "info,zenoh=warn",
        1 => "debug,zenoh=info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let json = std::env::var("SWERVE_LOG_JSON").is_ok();
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    info!(verbosity_level, json, "Logging initialized");
}
