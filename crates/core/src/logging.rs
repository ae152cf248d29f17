//! Logging setup
//!
//! Structured logging through `tracing`, rendered as text or JSON on stderr
//! so stdout stays free for command output. Chaincode container output
//! captured by the engine client is emitted through the same subscriber.
//!
//! ## Environment Variables
//!
//! * `CCVM_LOG` - filter directive, e.g. `debug` or `ccvm_core=trace`
//! * `CCVM_LOG_FORMAT` - `json` for JSON lines, anything else for text
//! * `CCVM_LOG_SPAN_EVENTS` - comma or `|` separated span events
//!   (`none`, `new`, `close`, `enter`, `exit`, `active`, `full`)
//! * `RUST_LOG` - fallback filter when `CCVM_LOG` is unset

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const ENV_LOG: &str = "CCVM_LOG";
pub const ENV_LOG_FORMAT: &str = "CCVM_LOG_FORMAT";
pub const ENV_LOG_SPAN_EVENTS: &str = "CCVM_LOG_SPAN_EVENTS";

static INIT: Once = Once::new();

/// Install the global subscriber
///
/// `format` overrides `CCVM_LOG_FORMAT`; `level` overrides `CCVM_LOG`.
/// Calling it again is a no-op.
///
/// ```rust
/// ccvm_core::logging::init(Some("json"), Some("debug")).expect("logging");
/// ```
pub fn init(format: Option<&str>, level: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter(level);

        let env_format = std::env::var(ENV_LOG_FORMAT).ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");
        let span_events = span_events_for_format(effective_format);

        // try_init: a test harness may already own the global subscriber
        let installed = match effective_format {
            "json" => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_events(span_events)
                        .with_writer(io::stderr),
                )
                .with(filter)
                .try_init(),
            _ => tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_span_events(span_events)
                        .with_writer(io::stderr),
                )
                .with(filter)
                .try_init(),
        };

        if installed.is_ok() {
            tracing::debug!("Logging initialized with format: {}", effective_format);
        }
    });

    Ok(())
}

fn create_env_filter(level: Option<&str>) -> EnvFilter {
    let spec = level
        .map(str::to_string)
        .or_else(|| std::env::var(ENV_LOG).ok());

    match spec {
        Some(spec) => EnvFilter::try_new(&spec).unwrap_or_else(|_| {
            eprintln!("Invalid log filter '{}', using 'info'", spec);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn span_events_for_format(format: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    if let Ok(raw) = std::env::var(ENV_LOG_SPAN_EVENTS) {
        return parse_span_events(&raw);
    }

    match format {
        "json" => FmtSpan::NEW | FmtSpan::CLOSE,
        _ => FmtSpan::NONE,
    }
}

fn parse_span_events(raw: &str) -> fmt::format::FmtSpan {
    use fmt::format::FmtSpan;

    raw.split(&[',', '|'][..])
        .map(|t| t.trim().to_lowercase())
        .fold(FmtSpan::NONE, |acc, token| {
            acc | match token.as_str() {
                "new" => FmtSpan::NEW,
                "close" => FmtSpan::CLOSE,
                "enter" => FmtSpan::ENTER,
                "exit" => FmtSpan::EXIT,
                "active" => FmtSpan::ACTIVE,
                "full" => FmtSpan::FULL,
                _ => FmtSpan::NONE,
            }
        })
}

/// Whether [`init`] has run
pub fn is_initialized() -> bool {
    INIT.is_completed()
}
