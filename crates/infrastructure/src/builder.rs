use std::sync::Arc;

use application::{
    Clock, LocalEventBroadcaster, Repositories, ServiceContainer, ServiceContainerDependencies,
    SystemClock,
};
use config::{AppConfig, StorageBackend};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    auth::JwtAuthenticator,
    memory::MemoryStore,
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 按配置装配好的适配器集合
#[derive(Clone)]
pub struct Infrastructure {
    pub repositories: Repositories,
    pub broadcaster: Arc<LocalEventBroadcaster>,
    pub authenticator: Arc<JwtAuthenticator>,
    /// 仅 PostgreSQL 后端持有连接池
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    pub async fn build(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let (repositories, pool) = match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("使用内存存储");
                (Arc::new(MemoryStore::new()).repositories(), None)
            }
            StorageBackend::Postgres => {
                let pool =
                    create_pg_pool(&config.database.url, config.database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(
                    max_connections = config.database.max_connections,
                    "PostgreSQL 存储已就绪"
                );
                (PgStorage::new(pool.clone()).repositories(), Some(pool))
            }
        };

        Ok(Self {
            repositories,
            broadcaster: Arc::new(LocalEventBroadcaster::new(
                config.broadcast.subscriber_capacity,
            )),
            authenticator: Arc::new(JwtAuthenticator::new(&config.auth)),
            pool,
        })
    }

    /// 在这些适配器之上装配应用服务
    pub fn services(&self, config: &AppConfig) -> ServiceContainer {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        ServiceContainer::new(ServiceContainerDependencies {
            repositories: self.repositories.clone(),
            broadcaster: self.broadcaster.clone(),
            authenticator: self.authenticator.clone(),
            clock,
            messaging: config.messaging.clone(),
        })
    }
}
