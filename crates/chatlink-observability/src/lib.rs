//! chatlink observability
//!
//! 日志（tracing-subscriber，stdout 与可选文件）与指标描述的统一初始化。
//! 进程内只应调用一次 [`Observability::init`]。

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::Config;
pub use error::{ObservabilityError, Result};
pub use logging::{create_channel_span, create_connection_span, LogManager};
pub use metrics::{ConnectionMetrics, MetricsCollector, SubscriptionMetrics};

use parking_lot::RwLock;

/// 持有日志管理器；drop 时刷新文件输出
#[derive(Debug)]
pub struct Observability {
    log_manager: RwLock<LogManager>,
    metrics: MetricsCollector,
}

impl Observability {
    pub fn init(config: Config) -> Result<Self> {
        let log_manager = LogManager::new(&config)?;
        let metrics = MetricsCollector::new(&config)?;

        tracing::info!(
            target: "chatlink_observability",
            app = %config.app_name,
            metrics = metrics.is_enabled(),
            "Observability initialized"
        );

        Ok(Self {
            log_manager: RwLock::new(log_manager),
            metrics,
        })
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_enabled()
    }

    /// Prometheus 文本格式的指标快照
    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }

    /// 运行时替换过滤表达式
    pub fn update_log_level(&self, level: &str) -> Result<()> {
        self.log_manager.write().update_level(level)
    }
}
