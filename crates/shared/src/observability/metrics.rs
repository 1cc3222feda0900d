//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 收集兑换相关指标，
//! 通过独立 HTTP 端口暴露给 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 指标服务器句柄
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    pub(crate) fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 安装 Prometheus recorder 并启动 `/metrics` 端点
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_metrics();
    metrics::counter!("service_starts_total", "service" => config.service_name.clone())
        .increment(1);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册指标描述
fn describe_metrics() {
    metrics::describe_counter!(
        "promo_redemptions_total",
        "Total number of promo redemption attempts by outcome"
    );
    metrics::describe_histogram!(
        "promo_redemption_duration_seconds",
        "Promo redemption duration in seconds"
    );
    metrics::describe_counter!(
        "fraud_checks_total",
        "Total number of fraud gate decisions by source"
    );
    metrics::describe_histogram!(
        "fraud_check_duration_seconds",
        "Remote fraud check duration in seconds"
    );
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次兑换结果
///
/// outcome 取值：success / not_found / forbidden / error
#[inline]
pub fn record_redemption(mode: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "promo_redemptions_total",
        "mode" => mode.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "promo_redemption_duration_seconds",
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// 记录一次反欺诈判定
///
/// source 取值：cache / remote；allowed 为最终判定
#[inline]
pub fn record_fraud_check(source: &str, allowed: bool) {
    metrics::counter!(
        "fraud_checks_total",
        "source" => source.to_string(),
        "allowed" => allowed.to_string()
    )
    .increment(1);
}

/// 记录远程反欺诈调用耗时
#[inline]
pub fn record_fraud_call_duration(status: &str, duration_secs: f64) {
    metrics::histogram!(
        "fraud_check_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration_secs);
}
