//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能：stdout 与可选的文件输出，
//! 以及运行时调整日志级别。

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::SubscriberExt,
    registry::LookupSpan,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

/// 日志管理器
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: Option<Arc<RwLock<ReloadHandle>>>,

    /// 文件输出的后台写线程句柄，drop 时刷新缓冲
    file_guard: Option<WorkerGuard>,

    /// 是否已初始化
    initialized: bool,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("config", &self.config)
            .field("file_output", &self.file_guard.is_some())
            .field("initialized", &self.initialized)
            .finish()
    }
}

impl LogManager {
    /// 创建新的日志管理器并安装全局 subscriber
    pub fn new(config: &Config) -> Result<Self> {
        let mut manager = Self {
            config: config.logging.clone(),
            reload_handle: None,
            file_guard: None,
            initialized: false,
        };

        manager.init()?;

        Ok(manager)
    }

    /// 初始化日志系统
    fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        // 构建环境过滤器
        let filter = self.build_filter()?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let stdout_layer = if self.config.stdout {
            Some(fmt_layer(&self.config, std::io::stdout, true))
        } else {
            None
        };

        let file_layer = match self.config.file_path.as_deref() {
            Some(path) => {
                let (writer, guard) = file_writer(path)?;
                self.file_guard = Some(guard);
                Some(fmt_layer(&self.config, writer, false))
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| ObservabilityError::Logging(format!("Failed to install subscriber: {}", e)))?;

        self.reload_handle = Some(Arc::new(RwLock::new(reload_handle)));
        self.initialized = true;

        tracing::info!(
            target: "chatlink_observability",
            "Log manager initialized with level: {}",
            self.config.level
        );

        Ok(())
    }

    /// 构建环境过滤器
    fn build_filter(&self) -> Result<EnvFilter> {
        build_filter(&self.config)
    }

    /// 动态更新日志级别
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(level)
            .map_err(|e| ObservabilityError::Logging(format!("Invalid log level: {}", e)))?;

        if let Some(ref handle) = self.reload_handle {
            handle
                .write()
                .modify(|filter| {
                    *filter = new_filter;
                })
                .map_err(|e| {
                    ObservabilityError::Logging(format!("Failed to update log level: {}", e))
                })?;

            self.config.level = level.to_string();

            tracing::info!(
                target: "chatlink_observability",
                "Log level updated to: {}",
                level
            );

            Ok(())
        } else {
            Err(ObservabilityError::Logging("Log manager not initialized".to_string()))
        }
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ObservabilityError::Logging(format!("Invalid log level: {}", e)))?;

    // 添加模块级别的过滤器
    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::Logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

fn fmt_layer<S, W>(config: &LoggingConfig, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_line_number(config.include_line_number)
        .with_file(true)
        .with_ansi(ansi);

    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::Config(format!("Invalid log file path: {:?}", path)))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    std::fs::create_dir_all(directory)?;
    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// 创建带有频道上下文的 span
pub fn create_channel_span(channel_id: &str) -> tracing::Span {
    tracing::info_span!(
        "channel",
        channel_id = %channel_id,
    )
}

/// 创建带有连接周期上下文的 span
pub fn create_connection_span(endpoint: &str, epoch: u64) -> tracing::Span {
    tracing::info_span!(
        "connection",
        endpoint = %endpoint,
        epoch = epoch,
    )
}
