//! OpenTelemetry metrics export module
//!
//! Exports exec tracing counters to an OpenTelemetry Collector. Disabled
//! unless `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

use anyhow::{Context, Result};
use log::info;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use crate::assembler::Exec;

/// Metric export interval in seconds
const METRIC_EXPORT_INTERVAL_SECS: u64 = 30;

/// Global metrics handle
static METRICS: OnceLock<ExecSnoopMetrics> = OnceLock::new();

/// Global MeterProvider for graceful shutdown
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Global active probes count (for ObservableGauge callback)
static ACTIVE_PROBES: OnceLock<RwLock<HashMap<String, u64>>> = OnceLock::new();

fn active_probes_map() -> &'static RwLock<HashMap<String, u64>> {
    ACTIVE_PROBES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Note: Do NOT add _total suffix to Counter names (Prometheus adds it automatically)
pub struct ExecSnoopMetrics {
    pub exec_events: Counter<u64>,
    pub argument_records: Counter<u64>,
    pub truncated_commands: Counter<u64>,
    pub ancestor_matches: Counter<u64>,
    pub lost_events: Counter<u64>,
}

impl ExecSnoopMetrics {
    fn new(meter: &Meter) -> Self {
        Self {
            exec_events: meter
                .u64_counter("exec_events")
                .with_description("Number of completed exec syscalls")
                .with_unit("events")
                .build(),
            argument_records: meter
                .u64_counter("argument_records")
                .with_description("Number of argument records received")
                .with_unit("records")
                .build(),
            truncated_commands: meter
                .u64_counter("truncated_commands")
                .with_description("Command lines cut short by the argument limit")
                .with_unit("events")
                .build(),
            ancestor_matches: meter
                .u64_counter("ancestor_matches")
                .with_description("Execs descending from the watched ancestor")
                .with_unit("events")
                .build(),
            lost_events: meter
                .u64_counter("lost_events")
                .with_description("Records dropped because a perf buffer was full")
                .with_unit("events")
                .build(),
        }
    }
}

/// Priority:
/// 1. OTEL_EXPORTER_OTLP_ENDPOINT environment variable
/// 2. If not set, metrics are disabled (no default fallback)
fn get_otlp_endpoint() -> Option<String> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;
    if endpoint.is_empty() {
        return None;
    }

    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        Some(format!("http://{}", endpoint))
    } else {
        Some(endpoint)
    }
}

/// Initialize OpenTelemetry metrics provider
///
/// Configures metrics export to OTLP Collector via gRPC.
/// Skips initialization if OTEL_EXPORTER_OTLP_ENDPOINT is not set.
pub fn init_metrics() -> Result<()> {
    let endpoint = match get_otlp_endpoint() {
        Some(ep) => ep,
        None => {
            info!("OTEL_EXPORTER_OTLP_ENDPOINT not set. Metrics export disabled.");
            return Ok(());
        }
    };

    info!("Initializing OpenTelemetry metrics exporter");
    info!("OTLP endpoint: {}", endpoint);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to create OTLP metric exporter")?;

    let reader = PeriodicReader::builder(exporter, opentelemetry_sdk::runtime::Tokio)
        .with_interval(Duration::from_secs(METRIC_EXPORT_INTERVAL_SECS))
        .build();

    let resource = Resource::default().merge(&Resource::new(vec![
        KeyValue::new("service.name", "execsnoop"),
        KeyValue::new("telemetry.sdk.language", "rust"),
    ]));

    let provider = SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build();

    global::set_meter_provider(provider.clone());
    let _ = METER_PROVIDER.set(provider);

    let meter = global::meter("execsnoop");

    let _active_probes_gauge = meter
        .u64_observable_gauge("active_probes")
        .with_description("Number of attached exec tracepoints")
        .with_unit("probes")
        .with_callback(|observer| {
            if let Ok(probes) = active_probes_map().read() {
                for (probe_name, count) in probes.iter() {
                    observer.observe(*count, &[KeyValue::new("probe", probe_name.clone())]);
                }
            }
        })
        .build();

    let _ = METRICS.set(ExecSnoopMetrics::new(&meter));

    info!("OpenTelemetry metrics initialized successfully");
    Ok(())
}

pub fn metrics() -> Option<&'static ExecSnoopMetrics> {
    METRICS.get()
}

pub fn record_exec(exec: &Exec) {
    if let Some(m) = metrics() {
        let result = if exec.succeeded() { "success" } else { "failure" };
        m.exec_events.add(1, &[KeyValue::new("result", result)]);
        m.argument_records.add(exec.command.args.len() as u64, &[]);
        if exec.command.truncated {
            m.truncated_commands.add(1, &[]);
        }
        if exec.ancestor {
            m.ancestor_matches.add(1, &[]);
        }
    }
}

pub fn record_lost_events(cpu: u32, count: usize) {
    if let Some(m) = metrics() {
        m.lost_events.add(count as u64, &[KeyValue::new("cpu", cpu as i64)]);
    }
}

/// Record active probe count
/// Updates the global active probes map for ObservableGauge callback
pub fn record_active_probe(probe_name: &str, count: u64) {
    if let Ok(mut probes) = active_probes_map().write() {
        probes.insert(probe_name.to_string(), count);
        info!("Active probe registered: {} = {}", probe_name, count);
    }
}

/// Shutdown OpenTelemetry (graceful shutdown)
/// Flushes pending metrics and shuts down the MeterProvider
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        info!("Shutting down OpenTelemetry metrics...");
        if let Err(e) = provider.shutdown() {
            log::warn!("Failed to shutdown MeterProvider: {}", e);
        } else {
            info!("OpenTelemetry metrics shutdown complete");
        }
    }
}
