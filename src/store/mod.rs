//! 持久层：SQLite 行级适配
//!
//! 外部关系存储的本地实现：主键点查、按时间戳的有序范围扫描、单行插入/更新。
//! 不依赖跨组件事务，每次写入均可安全重试。

mod agents;
mod corrections;
mod evidence;
mod interactions;
mod schema;
mod students;

pub use agents::AgentCache;

use std::path::Path;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// 持久层入口：按主题拆分的 impl 块见同目录各文件
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// 打开（或创建）文件数据库并建表
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// 内存数据库（测试用）；单连接保证共享同一份数据
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
