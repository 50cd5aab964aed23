use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// 进程内存储，仅适用于单进程部署和测试
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://shipqueue.db?mode=rwc".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if self.backend == StorageBackend::Sqlite {
            ValidationUtils::validate_not_empty(&self.url, "storage.url")?;
            if !self.url.starts_with("sqlite:") {
                return Err(crate::ConfigError::Validation(format!(
                    "storage.url 必须是sqlite连接串: {}",
                    self.url
                )));
            }
        }
        ValidationUtils::validate_count(
            self.max_connections as usize,
            "storage.max_connections",
            100,
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.connection_timeout_seconds,
            "storage.connection_timeout_seconds",
        )?;
        Ok(())
    }
}
