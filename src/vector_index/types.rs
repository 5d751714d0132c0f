/*!
 * 向量索引类型定义
 *
 * 每个GMID对应集合中唯一一个点，点上携带两个同维度的命名向量：
 * text_embedding（描述文本）与 image_embedding（缩略图）。
 * payload是媒体记录去掉状态机字段后的快照，附带schema版本号。
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::media::types::{MediaRecord, MediaType};
use crate::utils::error::AppResult;

/// 文本向量槽位名
pub const TEXT_VECTOR_NAME: &str = "text_embedding";

/// 图像向量槽位名
pub const IMAGE_VECTOR_NAME: &str = "image_embedding";

/// payload结构版本号
pub const PAYLOAD_SCHEMA_VERSION: &str = "1.0";

/// 查询选择的命名向量槽位
///
/// 集合声明了两个命名向量，不带槽位名的查询会被数据库拒绝，
/// 所以这里不提供默认值。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorSlot {
    Text,
    Image,
}

impl VectorSlot {
    pub fn name(&self) -> &'static str {
        match self {
            VectorSlot::Text => TEXT_VECTOR_NAME,
            VectorSlot::Image => IMAGE_VECTOR_NAME,
        }
    }
}

/// 向量点payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub gmid: String,
    pub original_name: String,
    pub stored_path: String,
    pub thumbnail_path: String,
    pub media_type: MediaType,
    pub size_bytes: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    /// RFC3339
    pub upload_time: String,
    pub description: String,
    pub schema_version: String,
}

impl PointPayload {
    /// 由媒体记录构建payload（去掉 index_state / index_attempts / last_error）
    pub fn from_record(record: &MediaRecord) -> Self {
        Self {
            gmid: record.gmid.clone(),
            original_name: record.original_name.clone(),
            stored_path: record.stored_path.clone(),
            thumbnail_path: record.thumbnail_path.clone(),
            media_type: record.media_type,
            size_bytes: record.size_bytes,
            width: record.width,
            height: record.height,
            duration_ms: record.duration_ms,
            upload_time: record.upload_time.to_rfc3339(),
            description: record.description.clone(),
            schema_version: PAYLOAD_SCHEMA_VERSION.to_string(),
        }
    }
}

/// 待写入的向量点
#[derive(Debug, Clone)]
pub struct MediaPoint {
    pub gmid: String,
    pub text_vector: Vec<f32>,
    pub image_vector: Vec<f32>,
    pub payload: PointPayload,
}

/// 搜索命中
#[derive(Debug, Clone)]
pub struct ScoredMedia {
    pub gmid: String,
    pub score: f32,
    pub payload: PointPayload,
}

/// 集合统计信息
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IndexStatsInfo {
    pub point_count: u64,
    pub dimension: usize,
}

/// 向量索引服务接口
#[async_trait]
pub trait VectorIndexService: Send + Sync {
    /// 幂等地确保集合存在且维度正确
    async fn ensure_collection(&self) -> AppResult<()>;

    /// 写入或整体替换一个点
    async fn upsert(&self, point: MediaPoint) -> AppResult<()>;

    /// 在指定命名向量上搜索，结果按分数降序，低于阈值的点由索引过滤
    async fn search(
        &self,
        slot: VectorSlot,
        query_vector: Vec<f32>,
        limit: usize,
        score_threshold: f32,
        media_type: Option<MediaType>,
    ) -> AppResult<Vec<ScoredMedia>>;

    /// 删除点，点不存在时不报错
    async fn delete(&self, gmid: &str) -> AppResult<()>;

    /// 集合统计
    async fn stats(&self) -> AppResult<IndexStatsInfo>;

    /// 读取已索引点的图像向量（相似检索与描述重嵌入复用）
    async fn fetch_image_vector(&self, gmid: &str) -> AppResult<Option<Vec<f32>>>;

    /// 批量探测哪些GMID在索引中已有点（启动对账使用）
    async fn existing_gmids(&self, gmids: &[String]) -> AppResult<HashSet<String>>;
}
