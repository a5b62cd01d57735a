use std::io;
use tracing_subscriber::{fmt, EnvFilter};

/// Directive used when neither `RUST_LOG` nor the config provide a level.
pub const DEFAULT_DIRECTIVE: &str = "info,sqlx=warn,sea_orm=warn";

fn filter_for(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match level {
        Some(l) if !l.trim().is_empty() => {
            EnvFilter::new(format!("{},sqlx=warn,sea_orm=warn", l.trim().to_ascii_lowercase()))
        }
        _ => EnvFilter::new(DEFAULT_DIRECTIVE),
    })
}

/// Initialize tracing subscriber with sensible defaults and stdout writer.
/// - Respects `RUST_LOG` if set
/// - Otherwise uses the configured `level`, falling back to `info`
/// - Writes to stdout to improve visibility in environments that hide stderr
pub fn init_logging_default(level: Option<&str>) {
    let _ = fmt()
        .with_env_filter(filter_for(level))
        .with_target(false)
        .compact()
        .with_writer(io::stdout)
        .try_init();
}

/// Initialize tracing subscriber with JSON structured output.
pub fn init_logging_json(level: Option<&str>) {
    let _ = fmt()
        .with_env_filter(filter_for(level))
        .with_target(true)
        .json()
        .with_writer(io::stdout)
        .try_init();
}

/// Pick the output format from config.
pub fn init_logging(level: Option<&str>, json: bool) {
    if json {
        init_logging_json(level);
    } else {
        init_logging_default(level);
    }
}
