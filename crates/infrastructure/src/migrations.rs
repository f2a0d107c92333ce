use sqlx::migrate::Migrator;

/// 内嵌的数据库迁移，启动时由 `Infrastructure::connect` 执行
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
