use std::sync::Arc;

use application::{
    Authenticator, InMemoryMessageStore, InMemoryRoomRegistry, MessageStore, RoomRegistry,
};
use config::{AppConfig, StorageBackend};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    auth::JwtAuthenticator,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgMessageStore, PgRoomRegistry},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("storage backend `postgres` requires a database url")]
    MissingDatabaseUrl,
}

/// 已装配好的外部适配器：存储后端与认证器
#[derive(Clone)]
pub struct Infrastructure {
    pub backend: StorageBackend,
    pub rooms: Arc<dyn RoomRegistry>,
    pub messages: Arc<dyn MessageStore>,
    pub jwt: Arc<JwtAuthenticator>,
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    /// 按配置选择存储后端；PostgreSQL 后端会先执行迁移
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Self::in_memory(config)),
            StorageBackend::Postgres => {
                let database_url = config
                    .storage
                    .database_url
                    .as_deref()
                    .ok_or(InfrastructureError::MissingDatabaseUrl)?;
                let pool = create_pg_pool(database_url, config.storage.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(max_connections = config.storage.max_connections, "数据库连接池已就绪，迁移完成");
                Ok(Self::postgres(config, pool))
            }
        }
    }

    pub fn in_memory(config: &AppConfig) -> Self {
        let rooms = Arc::new(InMemoryRoomRegistry::new());
        Self {
            backend: StorageBackend::Memory,
            messages: Arc::new(InMemoryMessageStore::new(rooms.clone())),
            rooms,
            jwt: Arc::new(JwtAuthenticator::from_config(&config.auth)),
            pool: None,
        }
    }

    pub fn postgres(config: &AppConfig, pool: PgPool) -> Self {
        Self {
            backend: StorageBackend::Postgres,
            rooms: Arc::new(PgRoomRegistry::new(pool.clone())),
            messages: Arc::new(PgMessageStore::new(pool.clone())),
            jwt: Arc::new(JwtAuthenticator::from_config(&config.auth)),
            pool: Some(pool),
        }
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.jwt.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_backend_needs_no_database() {
        let mut config = AppConfig::from_env_with_defaults();
        config.storage.backend = StorageBackend::Memory;

        let infra = Infrastructure::connect(&config).await.unwrap();
        assert_eq!(infra.backend, StorageBackend::Memory);
        assert!(infra.pool.is_none());
    }

    #[tokio::test]
    async fn postgres_backend_without_url_is_rejected() {
        let mut config = AppConfig::from_env_with_defaults();
        config.storage.backend = StorageBackend::Postgres;
        config.storage.database_url = None;

        let err = Infrastructure::connect(&config).await.err().unwrap();
        assert!(matches!(err, InfrastructureError::MissingDatabaseUrl));
    }
}
