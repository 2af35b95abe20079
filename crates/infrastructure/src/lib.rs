//! 基础设施层实现。
//!
//! 提供内存与 PostgreSQL 两套存储、JWT 身份校验，以及按配置装配它们的入口。

pub mod auth;
pub mod builder;
pub mod memory;
pub mod migrations;
pub mod repository;

pub use auth::{Claims, JwtAuthenticator};
pub use builder::{Infrastructure, InfrastructureError};
pub use memory::MemoryStore;
pub use migrations::MIGRATOR;
pub use repository::{
    create_pg_pool, PgAccountRepository, PgBlockRepository, PgConversationRepository,
    PgFriendRequestRepository, PgFriendshipRepository, PgMessageRepository, PgStorage,
};
