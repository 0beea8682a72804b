//! Tracing subscriber setup with optional OTLP span export.

use crate::config::TelemetryConfig;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithHttpConfig as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::fmt::format;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

const MAX_MESSAGE_CHARS: usize = 280;

/// Install the global subscriber. Returns the tracer provider when OTLP
/// export is enabled; the caller must shut it down before exit to flush spans.
pub fn init_tracing(debug: bool, telemetry: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let field_formatter = format::debug_fn(|writer, field, value| {
        let field_name = field.name();
        if field_name == "message" {
            let formatted = format!("{value:?}");
            let (truncated, was_truncated) = truncate_for_log(&formatted, MAX_MESSAGE_CHARS);
            write!(writer, "{field_name}={truncated}")?;
            if was_truncated {
                write!(writer, "...")?;
            }
            Ok(())
        } else {
            write!(writer, "{field_name}={value:?}")
        }
    });
    let filter = build_env_filter(debug);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .fmt_fields(field_formatter)
        .compact();

    match build_otlp_provider(telemetry) {
        Some(provider) => {
            let tracer = provider.tracer("threadrelay");
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();
            Some(provider)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .init();
            None
        }
    }
}

/// `RUST_LOG` wins when set; otherwise `debug` or `info`.
fn build_env_filter(debug: bool) -> tracing_subscriber::EnvFilter {
    if let Ok(filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        return filter;
    }
    if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::new("info")
    }
}

/// Normalise an OTLP endpoint to the HTTP/protobuf traces path.
fn traces_endpoint(endpoint: &str) -> String {
    if endpoint.ends_with("/v1/traces") {
        endpoint.to_owned()
    } else {
        format!("{}/v1/traces", endpoint.trim_end_matches('/'))
    }
}

fn build_otlp_provider(telemetry: &TelemetryConfig) -> Option<SdkTracerProvider> {
    use opentelemetry_otlp::WithExportConfig as _;

    let endpoint = traces_endpoint(telemetry.otlp_endpoint.as_deref()?);

    let mut exporter_builder = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint);
    if !telemetry.otlp_headers.is_empty() {
        exporter_builder = exporter_builder.with_headers(telemetry.otlp_headers.clone());
    }
    // The subscriber is not installed yet, so stderr is the only channel.
    let exporter = exporter_builder
        .build()
        .map_err(|error| eprintln!("failed to build OTLP exporter: {error}"))
        .ok()?;

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(telemetry.service_name.clone())
        .build();

    let sampler = if (telemetry.sample_rate - 1.0).abs() < f64::EPSILON {
        opentelemetry_sdk::trace::Sampler::AlwaysOn
    } else {
        opentelemetry_sdk::trace::Sampler::ParentBased(Box::new(
            opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(telemetry.sample_rate),
        ))
    };

    // The exporter's reqwest client needs a Tokio runtime, so the batch
    // processor must run on it rather than on its own thread.
    let batch_processor =
        opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor::builder(
            exporter,
            opentelemetry_sdk::runtime::Tokio,
        )
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_span_processor(batch_processor)
            .with_resource(resource)
            .with_sampler(sampler)
            .build(),
    )
}

/// Truncate to at most `max_chars` characters, reporting whether anything was cut.
fn truncate_for_log(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => (&text[..index], true),
        None => (text, false),
    }
}

/// Shortened copy of `text` for a log field, marked with `...` when cut.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match truncate_for_log(text, max_chars) {
        (head, true) => format!("{head}..."),
        (whole, false) => whole.to_string(),
    }
}
