/*!
 * 注册表数据库管理器
 *
 * 提供SQLite连接池与表结构初始化。注册表是媒体记录存在性
 * 与索引状态的权威来源，向量索引只是它的派生视图。
 */

use crate::utils::error::AppResult;
use anyhow::Context;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous},
    Executor,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// 媒体记录表结构
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS media_records (
    gmid            TEXT PRIMARY KEY,
    original_name   TEXT NOT NULL,
    stored_path     TEXT NOT NULL,
    thumbnail_path  TEXT NOT NULL,
    media_type      TEXT NOT NULL,
    size_bytes      INTEGER NOT NULL,
    width           INTEGER,
    height          INTEGER,
    duration_ms     INTEGER,
    upload_time     TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    index_state     TEXT NOT NULL DEFAULT 'pending',
    index_attempts  INTEGER NOT NULL DEFAULT 0,
    last_error      TEXT,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_records_upload_time ON media_records (upload_time DESC);
CREATE INDEX IF NOT EXISTS idx_media_records_index_state ON media_records (index_state);
CREATE INDEX IF NOT EXISTS idx_media_records_stored_path ON media_records (stored_path);
"#;

/// 数据库管理器
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 打开（必要时创建）注册表数据库
    pub async fn new(db_path: &Path) -> AppResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .with_context(|| format!("打开注册表数据库失败: {}", db_path.display()))?;

        pool.execute(SCHEMA_SQL)
            .await
            .context("初始化注册表表结构失败")?;

        info!("注册表数据库初始化完成: {}", db_path.display());

        Ok(Self { pool })
    }

    /// 内存数据库（测试用）
    pub async fn new_in_memory() -> AppResult<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // 内存库必须单连接，否则每个连接各自一个空库
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("打开内存数据库失败")?;

        pool.execute(SCHEMA_SQL)
            .await
            .context("初始化注册表表结构失败")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
