//! 指标收集模块
//!
//! 基于 metrics 库记录桥接层的连接与订阅指标。启用 `prometheus` feature 时
//! 安装 Prometheus recorder，可通过 [`MetricsCollector::render`] 导出；
//! 未安装全局 recorder 时，所有记录调用都是空操作。

use metrics::{describe_counter, describe_gauge, Unit};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::Config;
use crate::error::{ObservabilityError, Result};

/// 握手尝试次数
pub const HANDSHAKE_ATTEMPTS: &str = "chatlink_handshake_attempts_total";
/// 握手失败次数（超时或 ERROR 帧）
pub const HANDSHAKE_FAILURES: &str = "chatlink_handshake_failures_total";
/// 当前连接状态（0 断开 / 1 连接中 / 2 已连接）
pub const CONNECTION_STATE: &str = "chatlink_connection_state";
/// 转发到监听流的入站消息
pub const FRAMES_FORWARDED: &str = "chatlink_inbound_forwarded_total";
/// 被丢弃的入站消息（无法解析或缺少 id）
pub const FRAMES_DROPPED: &str = "chatlink_inbound_dropped_total";
/// 发送到 broker 的出站消息
pub const MESSAGES_SENT: &str = "chatlink_outbound_sent_total";

/// 指标收集器
pub struct MetricsCollector {
    /// Prometheus 句柄
    #[cfg(feature = "prometheus")]
    handle: Option<PrometheusHandle>,
    enabled: bool,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.enabled)
            .field("exporting", &self.is_exporting())
            .finish()
    }
}

impl MetricsCollector {
    /// 启用时安装 recorder（若配置允许）并注册指标描述
    pub fn new(config: &Config) -> Result<Self> {
        let mut collector = Self {
            #[cfg(feature = "prometheus")]
            handle: None,
            enabled: config.metrics_enabled,
        };
        if !config.metrics_enabled {
            return Ok(collector);
        }

        #[cfg(feature = "prometheus")]
        if config.prometheus_enabled {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).map_err(|e| {
                ObservabilityError::Metrics(format!("Failed to set global recorder: {}", e))
            })?;
            collector.handle = Some(handle);
        }

        // recorder 安装之后注册，描述才会被记录
        describe_bridge_metrics();
        tracing::info!(
            target: "chatlink_observability",
            app = %config.app_name,
            exporting = collector.is_exporting(),
            "Metrics collector initialized"
        );

        Ok(collector)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 是否安装了 Prometheus recorder
    pub fn is_exporting(&self) -> bool {
        #[cfg(feature = "prometheus")]
        {
            self.handle.is_some()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            false
        }
    }

    /// Prometheus 文本格式的当前指标；未导出时为空
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.handle
                .as_ref()
                .map(PrometheusHandle::render)
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// 注册桥接层指标描述
pub fn describe_bridge_metrics() {
    describe_counter!(
        HANDSHAKE_ATTEMPTS,
        Unit::Count,
        "Number of STOMP handshakes started"
    );
    describe_counter!(
        HANDSHAKE_FAILURES,
        Unit::Count,
        "Number of STOMP handshakes that failed or timed out"
    );
    describe_gauge!(
        CONNECTION_STATE,
        Unit::Count,
        "Connection lifecycle state: 0 disconnected, 1 connecting, 2 connected"
    );
    describe_counter!(
        FRAMES_FORWARDED,
        Unit::Count,
        "Inbound chat messages forwarded to observers"
    );
    describe_counter!(
        FRAMES_DROPPED,
        Unit::Count,
        "Inbound chat messages dropped as malformed"
    );
    describe_counter!(
        MESSAGES_SENT,
        Unit::Count,
        "Outbound chat messages handed to the broker"
    );
}

/// 连接指标记录器
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    /// 记录一次握手尝试
    pub fn record_handshake_attempt() {
        metrics::counter!(HANDSHAKE_ATTEMPTS).increment(1);
    }

    /// 记录一次握手失败
    pub fn record_handshake_failure(reason: &'static str) {
        metrics::counter!(HANDSHAKE_FAILURES, "reason" => reason).increment(1);
    }

    /// 设置连接状态
    pub fn set_state(state: u8) {
        metrics::gauge!(CONNECTION_STATE).set(f64::from(state));
    }
}

/// 订阅指标记录器
pub struct SubscriptionMetrics;

impl SubscriptionMetrics {
    /// 记录转发的入站消息
    pub fn record_forwarded() {
        metrics::counter!(FRAMES_FORWARDED).increment(1);
    }

    /// 记录丢弃的入站消息
    pub fn record_dropped(reason: &'static str) {
        metrics::counter!(FRAMES_DROPPED, "reason" => reason).increment(1);
    }

    /// 记录出站消息
    pub fn record_sent() {
        metrics::counter!(MESSAGES_SENT).increment(1);
    }
}
