use thiserror::Error;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to initialize tracer: {0}")]
    Tracer(String),

    #[error("failed to install subscriber: {0}")]
    Subscriber(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// `LOG_FORMAT=json` selects JSON lines, anything else the compact format.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Fetch an opentelemetry::trace::TraceId as hex through the full tracing stack
pub fn get_trace_id() -> opentelemetry::trace::TraceId {
    use opentelemetry::trace::TraceContextExt as _; // opentelemetry::Context -> opentelemetry::trace::Span
    use tracing_opentelemetry::OpenTelemetrySpanExt as _; // tracing::Span to opentelemetry::Context

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

#[cfg(feature = "telemetry")]
async fn init_tracer() -> Result<opentelemetry::sdk::trace::Tracer, TelemetryError> {
    let otlp_endpoint = std::env::var("OPENTELEMETRY_ENDPOINT_URL")
        .map_err(|_| TelemetryError::Tracer("OPENTELEMETRY_ENDPOINT_URL is not set".to_string()))?;

    let channel = tonic::transport::Channel::from_shared(otlp_endpoint)
        .map_err(|e| TelemetryError::Tracer(e.to_string()))?
        .connect()
        .await
        .map_err(|e| TelemetryError::Tracer(e.to_string()))?;

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_channel(channel))
        .with_trace_config(opentelemetry::sdk::trace::config().with_resource(
            opentelemetry::sdk::Resource::new(vec![opentelemetry::KeyValue::new(
                "service.name",
                "neon-operator",
            )]),
        ))
        .install_batch(opentelemetry::runtime::Tokio)
        .map_err(|e| TelemetryError::Tracer(e.to_string()))
}

/// Initialize tracing
pub async fn init(format: LogFormat) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    let compact = (format == LogFormat::Compact).then(|| tracing_subscriber::fmt::layer().compact());
    let json = (format == LogFormat::Json).then(|| tracing_subscriber::fmt::layer().json());

    let collector = Registry::default().with(env_filter).with(compact).with(json);

    #[cfg(feature = "telemetry")]
    let collector = collector.with(tracing_opentelemetry::layer().with_tracer(init_tracer().await?));

    tracing::subscriber::set_global_default(collector).map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_selection() {
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Compact);
    }

    #[test]
    fn trace_id_outside_a_span_is_invalid() {
        assert_eq!(get_trace_id(), opentelemetry::trace::TraceId::INVALID);
    }
}
