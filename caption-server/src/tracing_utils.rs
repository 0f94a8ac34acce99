//! Inspired by: https://github.com/open-telemetry/opentelemetry-rust HTTP examples
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::{
    global,
    propagation::{Extractor, Injector},
    Context, KeyValue,
};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace, trace::Sampler, Resource};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    /// Get a value for a key from the HeaderMap.  If the value can't be converted to &str, returns None
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    /// Collect all the keys from the HeaderMap.
    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|key| key.as_str()).collect::<Vec<_>>()
    }
}

/// Inject context into the headers of an outgoing HTTP request.
struct HeaderInjector<'a>(pub &'a mut HeaderMap);

impl<'a> Injector for HeaderInjector<'a> {
    /// Set a key and value in the HeaderMap.  Does nothing if the key or value are not valid inputs
    fn set(&mut self, key: &str, value: String) {
        if let Ok(key) = HeaderName::from_bytes(key.as_bytes()) {
            if let Ok(val) = HeaderValue::from_str(&value) {
                self.0.insert(key, val);
            }
        }
    }
}

/// Get context from a span and inject into the given headers.
pub fn inject_span(headers: &mut HeaderMap, span: &Span) {
    let ctx = span.context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&ctx, &mut HeaderInjector(headers))
    })
}

/// Extract the remote parent context carried by incoming request headers.
pub fn extract_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(headers)))
}

pub trait ExtractTelemetryContext {
    fn extract_context_span(&self, span: &Span);
}

impl ExtractTelemetryContext for HeaderMap {
    fn extract_context_span(&self, span: &Span) {
        span.set_parent(extract_context(self));
    }
}

pub fn init_logging(service_name: String, json_output: bool, otlp_endpoint: Option<String>) {
    let mut layers = Vec::new();
    // Configure log level; use info by default
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = match json_output {
        true => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed(),
        false => tracing_subscriber::fmt::layer().boxed(),
    };
    layers.push(fmt_layer);

    if let Some(tracing_otlp_endpoint) = otlp_endpoint {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(tracing_otlp_endpoint),
            )
            .with_trace_config(
                trace::config()
                    .with_resource(Resource::new(vec![KeyValue::new(
                        "service.name",
                        service_name,
                    )]))
                    .with_sampler(Sampler::AlwaysOn),
            )
            .install_batch(opentelemetry_sdk::runtime::Tokio);

        if let Ok(tracer) = tracer {
            layers.push(tracing_opentelemetry::layer().with_tracer(tracer).boxed());
        };
    }

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(layers)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_injector_skips_invalid_values() {
        let mut headers = HeaderMap::new();
        let mut injector = HeaderInjector(&mut headers);
        injector.set("traceparent", "00-abc-def-01".to_string());
        injector.set("bad header", "value".to_string());
        injector.set("tracestate", "line\nbreak".to_string());
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["traceparent"], "00-abc-def-01");
    }

    #[test]
    fn test_header_extractor_reads_keys() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static("00-abc-def-01"));
        let extractor = HeaderExtractor(&headers);
        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.get("missing"), None);
        assert_eq!(extractor.keys(), vec!["traceparent"]);
    }
}
