use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    tool_calls: Counter<u64>,
    tool_duration_ms: Histogram<f64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("factflux.pipeline");
        PipelineMetrics {
            runs: meter
                .u64_counter("pipeline_runs_total")
                .with_description("Total research pipeline runs by status")
                .init(),
            duration_ms: meter
                .f64_histogram("pipeline_duration_ms")
                .with_description("End-to-end pipeline runtime in milliseconds")
                .init(),
            tool_calls: meter
                .u64_counter("research_tool_calls_total")
                .with_description("Tool invocations by tool and status")
                .init(),
            tool_duration_ms: meter
                .f64_histogram("research_tool_duration_ms")
                .with_description("Tool runtime in milliseconds")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("FACTFLUX_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "FACTFLUX_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
}

/// Record one pipeline run (no-op if no provider installed).
pub fn record_pipeline_metrics(status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];
    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
}

/// Record one tool invocation.
pub fn record_tool_metrics(tool: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("tool", tool.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    metrics.tool_calls.add(1, &attrs);
    metrics.tool_duration_ms.record(duration_ms as f64, &attrs);
}
