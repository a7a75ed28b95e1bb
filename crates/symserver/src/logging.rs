use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// Initializes the global [`tracing`] subscriber based on the logging config.
///
/// `RUST_LOG` takes precedence over the configured filter directives.
pub fn init_logging(config: &Config) {
    if config.logging.enable_backtraces {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    let directives =
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    let filter = EnvFilter::new(directives);

    let format = match config.logging.format {
        LogFormat::Auto => {
            if console::user_attended() {
                LogFormat::Pretty
            } else {
                LogFormat::Simplified
            }
        }
        other => other,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Simplified | LogFormat::Auto => builder.compact().init(),
    }
}
