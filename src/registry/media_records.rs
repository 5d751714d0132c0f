/*!
 * 媒体记录Repository
 *
 * 注册表的全部读写入口。索引状态只能通过 transition 的
 * 比较并置换（CAS）修改：UPDATE ... WHERE index_state = 当前状态，
 * 影响行数为0即表示状态已被并发worker抢先迁移，调用方放弃本次操作。
 * 任何状态迁移都不包裹I/O，保证CAS短促。
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use std::sync::Arc;
use tracing::debug;

use super::database::DatabaseManager;
use crate::media::types::{IndexState, MediaRecord, MediaType};

/// 分页列表结果
#[derive(Debug, Clone)]
pub struct MediaListPage {
    pub items: Vec<MediaRecord>,
    pub total: u64,
}

/// 媒体记录Repository
#[derive(Clone)]
pub struct MediaRecordRepository {
    db: Arc<DatabaseManager>,
}

impl MediaRecordRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// 写入记录，同gmid已存在时整行覆盖（最后写入者胜出）
    pub async fn put(&self, record: &MediaRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO media_records
                (gmid, original_name, stored_path, thumbnail_path, media_type,
                 size_bytes, width, height, duration_ms, upload_time,
                 description, index_state, index_attempts, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.gmid)
        .bind(&record.original_name)
        .bind(&record.stored_path)
        .bind(&record.thumbnail_path)
        .bind(record.media_type.as_str())
        .bind(record.size_bytes as i64)
        .bind(record.width.map(|v| v as i64))
        .bind(record.height.map(|v| v as i64))
        .bind(record.duration_ms.map(|v| v as i64))
        .bind(record.upload_time.to_rfc3339())
        .bind(&record.description)
        .bind(record.index_state.as_str())
        .bind(record.index_attempts as i64)
        .bind(&record.last_error)
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await
        .context("写入媒体记录失败")?;

        Ok(())
    }

    /// 按gmid查询
    pub async fn get(&self, gmid: &str) -> Result<Option<MediaRecord>> {
        let row = sqlx::query("SELECT * FROM media_records WHERE gmid = ?")
            .bind(gmid)
            .fetch_optional(self.db.pool())
            .await
            .context("查询媒体记录失败")?;

        row.map(map_record).transpose()
    }

    /// 按落盘路径查询（similar-by-file 接口使用）
    pub async fn get_by_stored_path(&self, stored_path: &str) -> Result<Option<MediaRecord>> {
        let row = sqlx::query("SELECT * FROM media_records WHERE stored_path = ?")
            .bind(stored_path)
            .fetch_optional(self.db.pool())
            .await
            .context("按路径查询媒体记录失败")?;

        row.map(map_record).transpose()
    }

    /// 分页列表，按上传时间倒序，页大小收敛到 [1, 100]
    pub async fn list(
        &self,
        media_type: Option<MediaType>,
        page: u32,
        page_size: u32,
    ) -> Result<MediaListPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let offset = (page - 1) as i64 * page_size as i64;

        let (items, total) = match media_type {
            Some(mt) => {
                let rows = sqlx::query(
                    "SELECT * FROM media_records WHERE media_type = ? \
                     ORDER BY upload_time DESC LIMIT ? OFFSET ?",
                )
                .bind(mt.as_str())
                .bind(page_size as i64)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await
                .context("查询媒体列表失败")?;

                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM media_records WHERE media_type = ?")
                        .bind(mt.as_str())
                        .fetch_one(self.db.pool())
                        .await
                        .context("统计媒体数量失败")?;

                (rows, total)
            }
            None => {
                let rows = sqlx::query(
                    "SELECT * FROM media_records ORDER BY upload_time DESC LIMIT ? OFFSET ?",
                )
                .bind(page_size as i64)
                .bind(offset)
                .fetch_all(self.db.pool())
                .await
                .context("查询媒体列表失败")?;

                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_records")
                    .fetch_one(self.db.pool())
                    .await
                    .context("统计媒体数量失败")?;

                (rows, total)
            }
        };

        let items = items.into_iter().map(map_record).collect::<Result<Vec<_>>>()?;

        Ok(MediaListPage {
            items,
            total: total as u64,
        })
    }

    /// 更新描述文本，返回是否命中记录
    pub async fn update_description(&self, gmid: &str, description: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE media_records SET description = ?, updated_at = ? WHERE gmid = ?",
        )
        .bind(description)
        .bind(Utc::now().to_rfc3339())
        .bind(gmid)
        .execute(self.db.pool())
        .await
        .context("更新描述失败")?;

        Ok(result.rows_affected() > 0)
    }

    /// 索引状态的比较并置换迁移
    ///
    /// 仅当当前状态等于 from 时迁移到 to，返回是否迁移成功。
    /// 迁移到 Indexed 时清空 last_error。
    pub async fn transition(
        &self,
        gmid: &str,
        from: IndexState,
        to: IndexState,
        error: Option<&str>,
    ) -> Result<bool> {
        let last_error = if to == IndexState::Indexed { None } else { error };

        let result = sqlx::query(
            "UPDATE media_records SET index_state = ?, last_error = ?, updated_at = ? \
             WHERE gmid = ? AND index_state = ?",
        )
        .bind(to.as_str())
        .bind(last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(gmid)
        .bind(from.as_str())
        .execute(self.db.pool())
        .await
        .context("状态迁移失败")?;

        let moved = result.rows_affected() > 0;
        if moved {
            debug!("状态迁移: {} {} -> {}", gmid, from.as_str(), to.as_str());
        } else {
            debug!(
                "状态迁移被拒绝（当前状态已非 {}）: {}",
                from.as_str(),
                gmid
            );
        }

        Ok(moved)
    }

    /// 重试计数加一，返回新的计数
    pub async fn increment_attempts(&self, gmid: &str) -> Result<u32> {
        sqlx::query("UPDATE media_records SET index_attempts = index_attempts + 1 WHERE gmid = ?")
            .bind(gmid)
            .execute(self.db.pool())
            .await
            .context("更新重试计数失败")?;

        let attempts: i64 =
            sqlx::query_scalar("SELECT index_attempts FROM media_records WHERE gmid = ?")
                .bind(gmid)
                .fetch_one(self.db.pool())
                .await
                .context("读取重试计数失败")?;

        Ok(attempts as u32)
    }

    /// 重置重试计数（记录从终态重新进入流水线时使用）
    pub async fn reset_attempts(&self, gmid: &str) -> Result<()> {
        sqlx::query("UPDATE media_records SET index_attempts = 0 WHERE gmid = ?")
            .bind(gmid)
            .execute(self.db.pool())
            .await
            .context("重置重试计数失败")?;
        Ok(())
    }

    /// 删除记录，返回是否存在
    pub async fn delete(&self, gmid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM media_records WHERE gmid = ?")
            .bind(gmid)
            .execute(self.db.pool())
            .await
            .context("删除媒体记录失败")?;

        Ok(result.rows_affected() > 0)
    }

    /// 列出处于指定状态的记录（启动对账使用）
    pub async fn list_in_states(&self, states: &[IndexState]) -> Result<Vec<MediaRecord>> {
        let mut records = Vec::new();
        for state in states {
            let rows = sqlx::query(
                "SELECT * FROM media_records WHERE index_state = ? ORDER BY upload_time ASC",
            )
            .bind(state.as_str())
            .fetch_all(self.db.pool())
            .await
            .context("按状态查询记录失败")?;

            for row in rows {
                records.push(map_record(row)?);
            }
        }
        Ok(records)
    }
}

/// 行到领域类型的映射
fn map_record(row: SqliteRow) -> Result<MediaRecord> {
    let media_type_raw: String = row.get("media_type");
    let media_type = MediaType::parse(&media_type_raw)
        .with_context(|| format!("未知的媒体类型: {}", media_type_raw))?;

    let state_raw: String = row.get("index_state");
    let index_state = IndexState::parse(&state_raw)
        .with_context(|| format!("未知的索引状态: {}", state_raw))?;

    let upload_time_raw: String = row.get("upload_time");
    let upload_time = DateTime::parse_from_rfc3339(&upload_time_raw)
        .with_context(|| format!("上传时间解析失败: {}", upload_time_raw))?
        .with_timezone(&Utc);

    Ok(MediaRecord {
        gmid: row.get("gmid"),
        original_name: row.get("original_name"),
        stored_path: row.get("stored_path"),
        thumbnail_path: row.get("thumbnail_path"),
        media_type,
        size_bytes: row.get::<i64, _>("size_bytes") as u64,
        width: row.get::<Option<i64>, _>("width").map(|v| v as u32),
        height: row.get::<Option<i64>, _>("height").map(|v| v as u32),
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|v| v as u64),
        upload_time,
        description: row.get("description"),
        index_state,
        index_attempts: row.get::<i64, _>("index_attempts") as u32,
        last_error: row.get("last_error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(gmid: &str, media_type: MediaType, upload_time: &str) -> MediaRecord {
        MediaRecord {
            gmid: gmid.to_string(),
            original_name: "beach.jpg".to_string(),
            stored_path: format!("/media/photos/2024-06-01/beach_{}.jpg", gmid),
            thumbnail_path: format!("/media/thumbnails/2024-06-01/{}.jpg", gmid),
            media_type,
            size_bytes: 1234,
            width: Some(800),
            height: Some(600),
            duration_ms: None,
            upload_time: upload_time.parse::<DateTime<Utc>>().unwrap(),
            description: "海边日落".to_string(),
            index_state: IndexState::Pending,
            index_attempts: 0,
            last_error: None,
        }
    }

    async fn repo() -> MediaRecordRepository {
        let db = DatabaseManager::new_in_memory().await.unwrap();
        MediaRecordRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let repo = repo().await;
        let record = sample_record(&"a".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z");
        repo.put(&record).await.unwrap();

        let loaded = repo.get(&record.gmid).await.unwrap().unwrap();
        assert_eq!(loaded.gmid, record.gmid);
        assert_eq!(loaded.description, "海边日落");
        assert_eq!(loaded.index_state, IndexState::Pending);
        assert_eq!(loaded.width, Some(800));

        assert!(repo.get(&"f".repeat(32)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_cas_semantics() {
        let repo = repo().await;
        let record = sample_record(&"b".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z");
        repo.put(&record).await.unwrap();

        // 正确的前置状态：迁移成功
        assert!(repo
            .transition(&record.gmid, IndexState::Pending, IndexState::ThumbnailReady, None)
            .await
            .unwrap());

        // 过期的前置状态：被拒绝
        assert!(!repo
            .transition(&record.gmid, IndexState::Pending, IndexState::Failed, None)
            .await
            .unwrap());

        let loaded = repo.get(&record.gmid).await.unwrap().unwrap();
        assert_eq!(loaded.index_state, IndexState::ThumbnailReady);
    }

    #[tokio::test]
    async fn test_transition_to_indexed_clears_error() {
        let repo = repo().await;
        let mut record = sample_record(&"c".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z");
        record.index_state = IndexState::EmbeddingInFlight;
        record.last_error = Some("上次失败".to_string());
        repo.put(&record).await.unwrap();

        assert!(repo
            .transition(
                &record.gmid,
                IndexState::EmbeddingInFlight,
                IndexState::Indexed,
                None
            )
            .await
            .unwrap());

        let loaded = repo.get(&record.gmid).await.unwrap().unwrap();
        assert_eq!(loaded.index_state, IndexState::Indexed);
        assert!(loaded.last_error.is_none());
    }

    #[tokio::test]
    async fn test_list_order_filter_and_clamp() {
        let repo = repo().await;
        repo.put(&sample_record(&"1".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z"))
            .await
            .unwrap();
        repo.put(&sample_record(&"2".repeat(32), MediaType::Video, "2024-06-02T08:00:00Z"))
            .await
            .unwrap();
        repo.put(&sample_record(&"3".repeat(32), MediaType::Photo, "2024-06-03T08:00:00Z"))
            .await
            .unwrap();

        // 按上传时间倒序
        let page = repo.list(None, 1, 10).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items[0].gmid, "3".repeat(32));
        assert_eq!(page.items[2].gmid, "1".repeat(32));

        // 类型过滤
        let photos = repo.list(Some(MediaType::Photo), 1, 10).await.unwrap();
        assert_eq!(photos.total, 2);

        // 页大小收敛：0 -> 1
        let clamped = repo.list(None, 1, 0).await.unwrap();
        assert_eq!(clamped.items.len(), 1);
        assert_eq!(clamped.total, 3);
    }

    #[tokio::test]
    async fn test_increment_attempts_and_delete() {
        let repo = repo().await;
        let record = sample_record(&"d".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z");
        repo.put(&record).await.unwrap();

        assert_eq!(repo.increment_attempts(&record.gmid).await.unwrap(), 1);
        assert_eq!(repo.increment_attempts(&record.gmid).await.unwrap(), 2);

        assert!(repo.delete(&record.gmid).await.unwrap());
        assert!(!repo.delete(&record.gmid).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_in_states() {
        let repo = repo().await;
        let mut a = sample_record(&"a".repeat(32), MediaType::Photo, "2024-06-01T08:00:00Z");
        a.index_state = IndexState::EmbeddingInFlight;
        let mut b = sample_record(&"b".repeat(32), MediaType::Photo, "2024-06-02T08:00:00Z");
        b.index_state = IndexState::Indexed;
        repo.put(&a).await.unwrap();
        repo.put(&b).await.unwrap();

        let stuck = repo
            .list_in_states(&[IndexState::Pending, IndexState::EmbeddingInFlight])
            .await
            .unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].gmid, a.gmid);
    }
}
