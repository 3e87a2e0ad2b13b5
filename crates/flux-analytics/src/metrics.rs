use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// 初始化 Prometheus metrics exporter
pub fn init_metrics(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!(target: "pipeline", "Metrics exporter started on http://{}/metrics", addr);
    Ok(())
}

/// 描述所有指标
fn describe_metrics() {
    // 帧源
    describe_counter!(
        "flux_frames_captured_total",
        "Total number of JPEG frames read from the decoder"
    );
    describe_counter!(
        "flux_frames_dropped_total",
        "Frames dropped because the frame queue was full"
    );

    // 推理分发
    describe_counter!(
        "flux_detect_attempts_total",
        "Total number of detect calls to the inference service"
    );
    describe_counter!(
        "flux_detect_failures_total",
        "Frames dropped after exhausting detect attempts"
    );
    describe_counter!(
        "flux_results_dropped_total",
        "Detection results dropped because the result queue was full"
    );

    // 报警过滤
    describe_counter!("flux_alerts_admitted_total", "Total number of alerts admitted");
    describe_counter!(
        "flux_alerts_suppressed_total",
        "Uncertain detections suppressed as duplicates"
    );

    // 流水线与广播
    describe_counter!(
        "flux_pipeline_dropped_total",
        "Items dropped between pipeline stages, labelled by stage"
    );
    describe_gauge!("flux_hub_consumers", "Number of connected live consumers");
    describe_counter!(
        "flux_hub_evictions_total",
        "Consumers evicted because their outbound queue was full"
    );
}
