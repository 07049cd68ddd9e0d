//! File mostly copied from dicom-rs.
//!
//! https://github.com/Enet4/dicom-rs/blob/dbd41ed3a0d1536747c6b8ea2b286e4c6e8ccc8a/storescp/src/main.rs

use camino::Utf8PathBuf;
use opentelemetry::global;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use tracing_subscriber::EnvFilter;

use dicomkeep::run_server_from_env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    init_tracing().unwrap();

    let config_path = std::env::var("DICOMKEEP_CONFIG_PATH").ok().map(Utf8PathBuf::from);
    let result = run_server_from_env(config_path.as_deref(), None);

    global::shutdown_tracer_provider();
    result
}

fn init_tracing() -> Result<(), opentelemetry::trace::TraceError> {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let exporter = opentelemetry_otlp::new_exporter()
        .http()
        .build_span_exporter()?;
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();
    global::set_tracer_provider(provider);
    Ok(())
}
