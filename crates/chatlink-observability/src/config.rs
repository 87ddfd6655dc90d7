//! 观测性配置
//!
//! CLI 根据 chatlink 配置文件与命令行参数构建，不单独持久化。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 写入日志与指标描述的应用名
    pub app_name: String,
    /// 日志输出
    pub logging: LoggingConfig,
    /// 为 false 时不注册指标描述
    pub metrics_enabled: bool,
    /// 安装 Prometheus recorder（需要 `prometheus` feature）
    pub prometheus_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "chatlink".to_string(),
            logging: LoggingConfig::default(),
            metrics_enabled: true,
            prometheus_enabled: true,
        }
    }
}

impl Config {
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.logging.level = level.into();
        self
    }

    pub fn with_json_format(mut self, json: bool) -> Self {
        self.logging.json_format = json;
        self
    }

    /// 同时输出到文件（父目录不存在时自动创建）
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.logging.file_path = Some(path.into());
        self
    }

    pub fn with_prometheus(mut self, enabled: bool) -> Self {
        self.prometheus_enabled = enabled;
        self
    }

    pub fn with_stdout(mut self, stdout: bool) -> Self {
        self.logging.stdout = stdout;
        self
    }

    /// 单个模块的级别，叠加在 `level` 之上
    pub fn with_module_level(mut self, module: impl Into<String>, level: impl Into<String>) -> Self {
        self.logging.module_levels.insert(module.into(), level.into());
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别或 EnvFilter 表达式
    pub level: String,
    pub json_format: bool,
    pub stdout: bool,
    /// 为 None 时不写文件
    pub file_path: Option<PathBuf>,
    pub module_levels: HashMap<String, String>,
    pub include_target: bool,
    pub include_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            json_format: false,
            stdout: true,
            file_path: None,
            module_levels: HashMap::new(),
            include_target: true,
            include_line_number: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_log_level("debug")
            .with_json_format(true)
            .with_stdout(false)
            .with_log_file("/tmp/chatlink.log")
            .with_module_level("tungstenite", "warn");

        assert_eq!(config.app_name, "chatlink");
        assert!(config.metrics_enabled);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(!config.logging.stdout);
        assert_eq!(
            config.logging.file_path,
            Some(PathBuf::from("/tmp/chatlink.log"))
        );
        assert_eq!(
            config.logging.module_levels.get("tungstenite").map(String::as_str),
            Some("warn")
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"logging": {"level": "warn"}, "metrics_enabled": false}"#)
                .unwrap();
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.include_target);
        assert!(!config.metrics_enabled);
        assert_eq!(config.app_name, "chatlink");
    }
}
