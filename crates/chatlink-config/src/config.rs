use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 主配置结构体
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            broker: BrokerConfig::default(),
            credentials: CredentialsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// 获取配置值的快捷方法
    pub fn get_value(&self, key: &str) -> Option<String> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["version"] => Some(self.version.clone()),
            ["broker", "host"] => Some(self.broker.host.clone()),
            ["broker", "secure"] => Some(self.broker.secure.to_string()),
            ["broker", "base_path"] => Some(self.broker.base_path.clone()),
            ["broker", "framing"] => Some(self.broker.framing.to_string()),
            ["broker", "handshake_timeout_secs"] => {
                Some(self.broker.handshake_timeout_secs.to_string())
            }
            ["broker", "heartbeat_ms"] => Some(self.broker.heartbeat_ms.to_string()),
            ["broker", "connect_headers", name] => self.broker.connect_headers.get(*name).cloned(),
            ["credentials", "token_file"] => self.credentials.token_file.clone(),
            ["credentials", "token_env"] => Some(self.credentials.token_env.clone()),
            ["logging", "level"] => Some(self.logging.level.to_string()),
            ["logging", "file"] => self.logging.file.clone(),
            ["logging", "json"] => Some(self.logging.json.to_string()),
            _ => None,
        }
    }

    /// 设置配置值
    pub fn set_value(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            ["broker", "host"] => {
                self.broker.host = value.to_string();
            }
            ["broker", "secure"] => {
                self.broker.secure = parse_bool(value)?;
            }
            ["broker", "base_path"] => {
                self.broker.base_path = value.to_string();
            }
            ["broker", "framing"] => {
                self.broker.framing = value.parse()?;
            }
            ["broker", "handshake_timeout_secs"] => {
                self.broker.handshake_timeout_secs = parse_number(value)?;
            }
            ["broker", "heartbeat_ms"] => {
                self.broker.heartbeat_ms = parse_number(value)?;
            }
            ["broker", "connect_headers", name] => {
                self.broker
                    .connect_headers
                    .insert(name.to_string(), value.to_string());
            }
            ["credentials", "token_file"] => {
                self.credentials.token_file = Some(value.to_string());
            }
            ["credentials", "token_env"] => {
                self.credentials.token_env = value.to_string();
            }
            ["logging", "level"] => {
                self.logging.level = value.parse()?;
            }
            ["logging", "file"] => {
                self.logging.file = Some(value.to_string());
            }
            ["logging", "json"] => {
                self.logging.json = parse_bool(value)?;
            }
            _ => return Err(ConfigError::KeyNotFound(key.to_string())),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> ConfigResult<bool> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid boolean: {}", value)))
}

fn parse_number(value: &str) -> ConfigResult<u64> {
    value
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid number: {}", value)))
}

/// 固定的 STOMP 端点后缀
pub const CHAT_ENDPOINT_SUFFIX: &str = "/websocket/chat";

/// Broker 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// 主机与端口 (e.g., "localhost:8080")
    pub host: String,
    /// 使用 wss:// 而不是 ws://
    #[serde(default)]
    pub secure: bool,
    /// 部署上下文路径，末尾的 `/` 会被忽略
    #[serde(default)]
    pub base_path: String,
    /// WebSocket 帧格式
    #[serde(default)]
    pub framing: Framing,
    /// 握手超时（秒），0 表示一直等待
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// 客户端心跳间隔（毫秒），0 表示不发送
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// 附加在 CONNECT 帧上的头
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub connect_headers: HashMap<String, String>,
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost:8080".to_string(),
            secure: false,
            base_path: String::new(),
            framing: Framing::default(),
            handshake_timeout_secs: default_handshake_timeout(),
            heartbeat_ms: default_heartbeat_ms(),
            connect_headers: HashMap::new(),
        }
    }
}

impl BrokerConfig {
    /// Endpoint without query string: scheme + host + base path + fixed suffix
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let base = self.base_path.trim_end_matches('/');
        format!("{}://{}{}{}", scheme, self.host, base, CHAT_ENDPOINT_SUFFIX)
    }
}

/// WebSocket 帧格式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// 每条 WebSocket 文本消息就是一个 STOMP 帧
    Raw,
    /// SockJS websocket 传输（o / h / a[...] / c[...]）
    #[default]
    SockJs,
}

impl std::fmt::Display for Framing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Framing::Raw => write!(f, "raw"),
            Framing::SockJs => write!(f, "sockjs"),
        }
    }
}

impl std::str::FromStr for Framing {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(Framing::Raw),
            "sockjs" => Ok(Framing::SockJs),
            _ => Err(ConfigError::Validation(format!("Invalid framing: {}", s))),
        }
    }
}

/// 凭证配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialsConfig {
    /// 持久化的 token 文件
    pub token_file: Option<String>,
    /// 会话级 token 的环境变量名
    pub token_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            token_file: Some("~/.chatlink/credentials/authentication-token".to_string()),
            token_env: "CHATLINK_AUTH_TOKEN".to_string(),
        }
    }
}

/// 日志级别
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(level)
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(ConfigError::Validation(format!("Invalid log level: {}", s))),
        }
    }
}

/// Logging 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<String>,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: Some("~/.chatlink/logs/chatlink.log".to_string()),
            json: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.host, "localhost:8080");
        assert_eq!(config.broker.framing, Framing::SockJs);
        assert_eq!(config.broker.handshake_timeout_secs, 30);
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let mut broker = BrokerConfig::default();
        assert_eq!(broker.endpoint(), "ws://localhost:8080/websocket/chat");

        broker.base_path = "/app/".to_string();
        broker.secure = true;
        broker.host = "chat.example.com".to_string();
        assert_eq!(broker.endpoint(), "wss://chat.example.com/app/websocket/chat");
    }

    #[test]
    fn test_get_and_set_value() {
        let mut config = Config::default();
        config.set_value("broker.framing", "raw").unwrap();
        config.set_value("broker.heartbeat_ms", "0").unwrap();
        config.set_value("broker.connect_headers.login", "alice").unwrap();
        config.set_value("logging.level", "warning").unwrap();

        assert_eq!(config.get_value("broker.framing").as_deref(), Some("raw"));
        assert_eq!(config.get_value("broker.heartbeat_ms").as_deref(), Some("0"));
        assert_eq!(
            config.get_value("broker.connect_headers.login").as_deref(),
            Some("alice")
        );
        assert_eq!(config.get_value("logging.level").as_deref(), Some("warn"));
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let mut config = Config::default();
        assert!(matches!(
            config.set_value("broker.secure", "yes"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            config.set_value("broker.nope", "1"),
            Err(ConfigError::KeyNotFound(_))
        ));
        assert!(config.set_value("broker.framing", "xhr").is_err());
    }

    #[test]
    fn test_broker_defaults_when_fields_missing() {
        let broker: BrokerConfig = toml::from_str(r#"host = "broker:61613""#).unwrap();
        assert_eq!(broker.host, "broker:61613");
        assert_eq!(broker.heartbeat_ms, 10_000);
        assert!(broker.connect_headers.is_empty());
    }
}
