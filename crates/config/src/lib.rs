//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 存储后端与持久化超时
//! - JWT认证与认证超时
//! - 订阅中心队列容量
//! - 历史消息分页

use std::{env, time::Duration};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 默认配置文件，可通过 `CHAT_CONFIG` 覆盖
pub const DEFAULT_CONFIG_FILE: &str = "chat.yaml";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 存储配置
    pub storage: StorageConfig,
    /// 认证配置
    pub auth: AuthConfig,
    /// 订阅中心配置
    pub hub: HubConfig,
    /// 历史消息配置
    pub history: HistoryConfig,
    /// 默认日志过滤级别（`RUST_LOG` 优先）
    pub log_level: String,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 存储后端
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// 单次持久化调用的超时（毫秒）
    pub timeout_ms: u64,
}

impl StorageConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
    /// 单次认证调用的超时（毫秒）
    pub timeout_ms: u64,
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 订阅中心配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    /// 每个订阅者的待投递队列容量，满时丢弃并记录
    pub subscriber_queue_capacity: usize,
}

/// 历史消息分页配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl AppConfig {
    /// 分层加载：默认值 → YAML 文件（可选）→ `CHAT_` 前缀环境变量。
    ///
    /// 环境变量以双下划线分隔层级，例如 `CHAT_STORAGE__BACKEND=postgres`。
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment()
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let file = env::var("CHAT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Figment::from(Serialized::defaults(Self::from_env_with_defaults()))
            .merge(Yaml::file(file))
            .merge(Env::prefixed("CHAT_").split("__"))
    }

    /// 从环境变量加载配置，关键安全配置（JWT_SECRET）必须显式提供
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_env_with_defaults();
        config.auth.jwt_secret =
            env::var("JWT_SECRET").map_err(|_| ConfigError::MissingEnv("JWT_SECRET"))?;
        if config.storage.backend == StorageBackend::Postgres && config.storage.database_url.is_none()
        {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }
        config.validate()?;
        Ok(config)
    }

    /// 从环境变量加载配置，开发环境版本
    /// 提供不安全的默认值，仅用于测试和开发
    pub fn from_env_with_defaults() -> Self {
        let database_url = env::var("DATABASE_URL").ok();
        let backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            _ if database_url.is_some() => StorageBackend::Postgres,
            _ => StorageBackend::Memory,
        };

        Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parse_env("SERVER_PORT").unwrap_or(8080),
            },
            storage: StorageConfig {
                backend,
                database_url,
                max_connections: parse_env("DB_MAX_CONNECTIONS").unwrap_or(5),
                timeout_ms: parse_env("STORAGE_TIMEOUT_MS").unwrap_or(3_000),
            },
            auth: AuthConfig {
                jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                    "dev-secret-key-not-for-production-use-minimum-32-chars".to_string()
                }),
                token_ttl_minutes: parse_env("JWT_TTL_MINUTES").unwrap_or(120),
                timeout_ms: parse_env("AUTH_TIMEOUT_MS").unwrap_or(1_000),
            },
            hub: HubConfig {
                subscriber_queue_capacity: parse_env("HUB_QUEUE_CAPACITY").unwrap_or(256),
            },
            history: HistoryConfig {
                default_page_size: parse_env("HISTORY_PAGE_SIZE").unwrap_or(50),
                max_page_size: parse_env("HISTORY_MAX_PAGE_SIZE").unwrap_or(200),
            },
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // JWT密钥至少256位/32字节
        if self.auth.jwt_secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.auth.token_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidAuthConfig(
                "token ttl must be positive".to_string(),
            ));
        }

        if self.auth.timeout_ms == 0 {
            return Err(ConfigError::InvalidAuthConfig(
                "auth timeout must be greater than 0".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Postgres {
            match self.storage.database_url.as_deref() {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidDatabaseUrl(
                        "Database URL cannot be empty for the postgres backend".to_string(),
                    ))
                }
            }
            if self.storage.max_connections == 0 {
                return Err(ConfigError::InvalidStorageConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        if self.storage.timeout_ms == 0 {
            return Err(ConfigError::InvalidStorageConfig(
                "storage timeout must be greater than 0".to_string(),
            ));
        }

        if self.hub.subscriber_queue_capacity == 0 {
            return Err(ConfigError::InvalidHubConfig(
                "subscriber queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.history.default_page_size == 0
            || self.history.default_page_size > self.history.max_page_size
        {
            return Err(ConfigError::InvalidHistoryConfig(format!(
                "default page size {} must be within 1..={}",
                self.history.default_page_size, self.history.max_page_size
            )));
        }

        Ok(())
    }

    pub fn is_development_secret(&self) -> bool {
        self.auth.jwt_secret.contains("dev-secret")
            || self.auth.jwt_secret.contains("not-for-production")
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.parse().ok())
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid auth configuration: {0}")]
    InvalidAuthConfig(String),
    #[error("Invalid storage configuration: {0}")]
    InvalidStorageConfig(String),
    #[error("Invalid hub configuration: {0}")]
    InvalidHubConfig(String),
    #[error("Invalid history configuration: {0}")]
    InvalidHistoryConfig(String),
}

impl Default for AppConfig {
    /// 默认配置使用开发环境版本
    fn default() -> Self {
        Self::from_env_with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let config = AppConfig::from_env_with_defaults();
            assert!(config.validate().is_ok());
            assert_eq!(config.storage.backend, StorageBackend::Memory);
            assert_eq!(config.auth.token_ttl_minutes, 120);
            assert!(config.is_development_secret());
            Ok(())
        });
    }

    #[test]
    fn test_from_env_requires_jwt_secret() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let result = AppConfig::from_env();
            assert!(matches!(result, Err(ConfigError::MissingEnv("JWT_SECRET"))));
            Ok(())
        });
    }

    #[test]
    fn test_database_url_selects_postgres() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.set_env("JWT_SECRET", "production-secret-key-with-at-least-32-characters");
            jail.set_env("DATABASE_URL", "postgres://user:pass@db:5432/chat");
            let config = AppConfig::from_env().map_err(|e| e.to_string())?;
            assert_eq!(config.storage.backend, StorageBackend::Postgres);
            assert_eq!(
                config.storage.database_url.as_deref(),
                Some("postgres://user:pass@db:5432/chat")
            );
            Ok(())
        });
    }

    #[test]
    fn test_layered_load_yaml_then_env() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            jail.create_file(
                "chat.yaml",
                r#"
                server:
                  port: 9000
                hub:
                  subscriber_queue_capacity: 8
                "#,
            )?;
            jail.set_env("CHAT_HUB__SUBSCRIBER_QUEUE_CAPACITY", "16");
            jail.set_env("CHAT_STORAGE__TIMEOUT_MS", "250");

            let config = AppConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 9000);
            assert_eq!(config.hub.subscriber_queue_capacity, 16);
            assert_eq!(config.storage.timeout(), Duration::from_millis(250));
            Ok(())
        });
    }

    #[test]
    fn test_validation() {
        Jail::expect_with(|jail| {
            jail.clear_env();
            let mut config = AppConfig::from_env_with_defaults();

            config.auth.jwt_secret = "short".to_string();
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidJwtSecret(_))
            ));
            config.auth.jwt_secret = "production-grade-secret-key-with-sufficient-length".to_string();

            config.storage.backend = StorageBackend::Postgres;
            config.storage.database_url = None;
            assert!(config.validate().is_err());
            config.storage.database_url = Some("postgres://db/chat".to_string());
            assert!(config.validate().is_ok());

            config.storage.timeout_ms = 0;
            assert!(config.validate().is_err());
            config.storage.timeout_ms = 100;

            config.hub.subscriber_queue_capacity = 0;
            assert!(config.validate().is_err());
            config.hub.subscriber_queue_capacity = 1;

            config.history.default_page_size = 500;
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidHistoryConfig(_))
            ));
            Ok(())
        });
    }
}
