//! SQLite 数据库工具
//!
//! 本地缓存使用单连接池：客户端侧无并发写入压力，单连接同时保证
//! `sqlite::memory:` 在测试中表现一致。schema 由各 DAO 以
//! CREATE TABLE IF NOT EXISTS 自行维护，重复启动不会失败。

use anyhow::Result;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

/// 创建 SQLite 连接池
pub async fn create_sqlite_pool(db_url: &str) -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(db_url)
        .await?;
    Ok(pool)
}
