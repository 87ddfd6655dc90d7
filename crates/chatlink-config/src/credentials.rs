//! 访问令牌查找
//!
//! 两个来源按顺序查找：持久化的本地 token 文件优先，其次是进程内的
//! 会话 token（启动时从环境变量读取，也可以在运行时设置）。

use crate::config::{ConfigResult, CredentialsConfig};
use crate::expand_tilde;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// 令牌存储
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    local_file: Option<PathBuf>,
    session: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    /// 根据配置构建，会话 token 从 `token_env` 指定的环境变量初始化
    pub fn from_config(config: &CredentialsConfig) -> Self {
        let local_file = config.token_file.as_deref().and_then(expand_tilde);
        let session = std::env::var(&config.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty());

        Self {
            local_file,
            session: Arc::new(RwLock::new(session)),
        }
    }

    /// 只有会话 token，没有本地文件
    pub fn in_memory(token: Option<String>) -> Self {
        Self {
            local_file: None,
            session: Arc::new(RwLock::new(token)),
        }
    }

    /// 指定本地 token 文件
    pub fn with_local_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_file = Some(path.into());
        self
    }

    /// 当前的访问令牌；本地优先，都没有时返回 None
    pub async fn token(&self) -> Option<String> {
        if let Some(path) = &self.local_file {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => {
                    let token = content.trim();
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!("Failed to read token file {:?}: {}", path, e),
            }
        }

        self.session.read().clone()
    }

    /// 设置或清除会话 token
    pub fn set_session_token(&self, token: Option<String>) {
        *self.session.write() = token;
    }

    /// 持久化 token 到本地文件
    pub async fn store_local(&self, token: &str) -> ConfigResult<()> {
        let Some(path) = &self.local_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, token.trim()).await?;
        debug!("Stored access token at {:?}", path);
        Ok(())
    }

    /// 删除本地 token 文件
    pub async fn clear_local(&self) -> ConfigResult<()> {
        if let Some(path) = &self.local_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_token_wins_over_session() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("credentials").join("authentication-token");
        let store = CredentialStore::in_memory(Some("session-token".to_string()))
            .with_local_file(&path);

        assert_eq!(store.token().await.as_deref(), Some("session-token"));

        store.store_local("local-token\n").await.unwrap();
        assert_eq!(store.token().await.as_deref(), Some("local-token"));

        store.clear_local().await.unwrap();
        store.clear_local().await.unwrap();
        assert_eq!(store.token().await.as_deref(), Some("session-token"));
    }

    #[tokio::test]
    async fn no_token_anywhere() {
        let store = CredentialStore::in_memory(None);
        assert!(store.token().await.is_none());

        store.set_session_token(Some("abc".to_string()));
        assert_eq!(store.token().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn session_token_seeded_from_env() {
        std::env::set_var("CHATLINK_TEST_SESSION_TOKEN", "from-env");
        let config = CredentialsConfig {
            token_file: None,
            token_env: "CHATLINK_TEST_SESSION_TOKEN".to_string(),
        };
        let store = CredentialStore::from_config(&config);
        assert_eq!(store.token().await.as_deref(), Some("from-env"));
    }
}
