//! 基础设施层实现。
//!
//! 提供 PostgreSQL 房间注册表与消息存储、JWT 认证器，以及按配置装配它们的构建器。

pub mod auth;
pub mod builder;
pub mod migrations;
pub mod repository;

pub use auth::{Claims, JwtAuthenticator};
pub use builder::{Infrastructure, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageStore, PgRoomRegistry};
