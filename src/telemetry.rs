use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{Result, SayrError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for TracingFormat {
    type Err = SayrError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(TracingFormat::Pretty),
            "json" => Ok(TracingFormat::Json),
            other => Err(SayrError::Config(format!("unknown log format `{other}`"))),
        }
    }
}

/// Install the global subscriber. `RUST_LOG` picks the filter (default `info`).
pub fn init_tracing(format: TracingFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        TracingFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init(),
        TracingFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
    };
    installed
        .map_err(|err| SayrError::Config(format!("failed to install tracing subscriber: {err}")))
}
