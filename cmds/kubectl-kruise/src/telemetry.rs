//! Logging and trace export.
//!
//! Logs go to stderr so stdout carries nothing but result lines.

use std::io::IsTerminal;

use anyhow::Result;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
	layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

const SERVICE_NAME: &str = "kubectl-kruise";

/// Flushes exported spans when dropped. Keep it alive until exit.
pub struct TelemetryGuard {
	tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
	fn drop(&mut self) {
		if let Some(provider) = self.tracer_provider.take() {
			if let Err(e) = provider.shutdown() {
				eprintln!("failed to shut down tracer provider: {e}");
			}
		}
	}
}

/// Log level precedence: `--log-level`, then `RUST_LOG`, then `warn`.
fn filter(log_level: Option<Level>) -> EnvFilter {
	match log_level {
		Some(level) => EnvFilter::new(level.as_str()),
		None => EnvFilter::builder()
			.with_default_directive(Level::WARN.into())
			.from_env_lossy(),
	}
}

/// Pretty output on a terminal, JSON lines otherwise.
fn fmt_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
	S: Subscriber + for<'span> LookupSpan<'span>,
{
	let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
	if std::io::stderr().is_terminal() {
		layer.pretty().boxed()
	} else {
		layer.json().boxed()
	}
}

fn otel_export_enabled() -> bool {
	std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_ENDPOINT).is_ok()
		|| std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_TRACES_ENDPOINT).is_ok()
}

/// Span exporter for the protocol named by `OTEL_EXPORTER_OTLP_PROTOCOL`.
fn span_exporter() -> Result<SpanExporter> {
	let protocol = std::env::var(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL);
	let exporter = match protocol
		.as_deref()
		.unwrap_or(opentelemetry_otlp::OTEL_EXPORTER_OTLP_PROTOCOL_DEFAULT)
	{
		"grpc" => SpanExporter::builder().with_tonic().build()?,
		_ => SpanExporter::builder().with_http().build()?,
	};
	Ok(exporter)
}

fn tracer_provider() -> Result<SdkTracerProvider> {
	// OTEL_SERVICE_NAME and OTEL_RESOURCE_ATTRIBUTES are read by the builder.
	let mut resource = Resource::builder();
	if std::env::var("OTEL_SERVICE_NAME").is_err() {
		resource = resource.with_service_name(SERVICE_NAME);
	}

	let provider = SdkTracerProvider::builder()
		.with_resource(resource.build())
		.with_batch_exporter(span_exporter()?)
		.build();
	opentelemetry::global::set_tracer_provider(provider.clone());
	Ok(provider)
}

/// Install the global subscriber.
///
/// An OTLP layer is added when `OTEL_EXPORTER_OTLP_ENDPOINT` or
/// `OTEL_EXPORTER_OTLP_TRACES_ENDPOINT` is set.
pub fn init(log_level: Option<Level>) -> Result<TelemetryGuard> {
	let registry = tracing_subscriber::registry()
		.with(filter(log_level))
		.with(fmt_layer());

	if !otel_export_enabled() {
		registry.init();
		return Ok(TelemetryGuard {
			tracer_provider: None,
		});
	}

	let provider = tracer_provider()?;
	let otel_layer = tracing_opentelemetry::layer()
		.with_error_records_to_exceptions(true)
		.with_tracer(provider.tracer(SERVICE_NAME));
	registry.with(otel_layer).init();

	Ok(TelemetryGuard {
		tracer_provider: Some(provider),
	})
}
