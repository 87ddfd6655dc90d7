use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObservabilityError {
    /// 配置本身不可用，例如日志文件路径没有文件名
    #[error("Invalid observability config: {0}")]
    Config(String),

    /// 过滤表达式无效或全局 subscriber 已存在
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// 全局 recorder 已被安装
    #[error("Metrics setup failed: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
