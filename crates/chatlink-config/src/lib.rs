pub mod config;
pub mod credentials;
pub mod manager;

pub use config::{
    BrokerConfig, Config, ConfigError, ConfigResult, CredentialsConfig, Framing, LogLevel,
    LoggingConfig, CHAT_ENDPOINT_SUFFIX,
};
pub use credentials::CredentialStore;
pub use manager::ConfigManager;

use std::path::PathBuf;

/// 获取 chatlink 配置目录路径
pub fn chatlink_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chatlink"))
}

/// 获取默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    chatlink_dir().map(|dir| dir.join("config.json"))
}

/// 获取默认凭证目录
pub fn default_credentials_dir() -> Option<PathBuf> {
    chatlink_dir().map(|dir| dir.join("credentials"))
}

/// 获取默认日志文件路径
pub fn default_log_path() -> Option<PathBuf> {
    chatlink_dir().map(|dir| dir.join("logs").join("chatlink.log"))
}

/// 初始化 chatlink 目录结构
pub async fn init_chatlink_dirs() -> ConfigResult<()> {
    if let Some(root) = chatlink_dir() {
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(root.join("logs")).await?;
        tokio::fs::create_dir_all(root.join("credentials")).await?;
    }
    Ok(())
}

/// 展开路径中的 ~ 为用户主目录
pub fn expand_tilde(path: &str) -> Option<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chatlink_dir() {
        let dir = chatlink_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().to_string_lossy().contains(".chatlink"));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.chatlink/config.json");
        assert!(expanded.is_some());
        assert!(!expanded.unwrap().to_string_lossy().starts_with('~'));

        assert_eq!(
            expand_tilde("/var/lib/chatlink/token"),
            Some(PathBuf::from("/var/lib/chatlink/token"))
        );
    }
}
