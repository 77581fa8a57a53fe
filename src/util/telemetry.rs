use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{ExporterBuildError, Protocol, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::constants::{SERVICE_NAME, TRACER_NAME};
use crate::util::env::Config;

const DEFAULT_FILTER: &str = "canva_thumbnail_relay=debug,tower_http=debug,axum=debug,info";

pub type TelemetryResult<T> = core::result::Result<T, TelemetryErr>;

#[derive(Debug, Error)]
pub enum TelemetryErr {
    #[error(transparent)]
    ExporterBuild(#[from] ExporterBuildError),
}

/// Console logging, plus OTLP trace export when a collector endpoint is configured.
#[derive(Debug)]
pub struct Telemetry {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn new(config: &Config) -> TelemetryResult<Telemetry> {
        let tracer_provider = match config.otel_exporter_endpoint.as_deref() {
            Some(collector_url) => Some(build_tracer_provider(collector_url)?),
            None => None,
        };

        Ok(Self { tracer_provider })
    }

    /// Installs the global subscriber. `RUST_LOG` overrides the default filter.
    pub fn register(self) -> Self {
        let trace_layer = self.tracer_provider.as_ref().map(|provider| {
            global::set_tracer_provider(provider.clone());
            tracing_opentelemetry::layer().with_tracer(provider.tracer(TRACER_NAME))
        });

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();

        self
    }

    pub fn shutdown(self) {
        let Some(provider) = self.tracer_provider else {
            return;
        };

        if let Err(e) = provider.shutdown() {
            eprintln!("error during tracing shutdown: {e:?}");
        } else {
            println!("tracing shut down ok");
        }
    }
}

fn build_tracer_provider(collector_url: &str) -> TelemetryResult<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_protocol(Protocol::Grpc)
        .with_endpoint(collector_url)
        .with_timeout(Duration::from_secs(5))
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(base_attrs())
        .build())
}

fn base_attrs() -> Resource {
    Resource::builder()
        .with_attributes([
            KeyValue::new("service.name", SERVICE_NAME),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        ])
        .build()
}
