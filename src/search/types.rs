/*!
 * 搜索类型定义
 */

use serde::Serialize;
use thiserror::Error;

use crate::embedding::types::EmbeddingError;
use crate::vector_index::types::ScoredMedia;

/// 搜索失败分类
#[derive(Debug, Error)]
pub enum SearchError {
    /// 查询向量化失败
    #[error("查询embedding生成失败: {0}")]
    Embedding(#[from] EmbeddingError),

    /// 相似检索的目标还没有进入索引
    #[error("媒体尚未进入索引: {0}")]
    NotIndexed(String),

    /// 向量数据库不可用
    #[error("向量检索失败: {0}")]
    Index(String),
}

/// 命中来源模态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedModality {
    /// 仅文本向量命中
    Text,
    /// 仅图像向量命中
    Image,
    /// 双模态同时命中，取更高分
    Both,
}

/// 单条搜索结果
#[derive(Debug, Clone, Serialize)]
pub struct MediaSearchResult {
    pub gmid: String,
    pub score: f32,
    pub matched_modality: MatchedModality,
    pub file_name: String,
    pub media_type: crate::media::types::MediaType,
    pub file_size: u64,
    pub file_path: String,
    pub thumbnail_path: String,
    pub upload_time: String,
    pub description: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaSearchResult {
    pub fn from_scored(hit: ScoredMedia, modality: MatchedModality) -> Self {
        Self {
            gmid: hit.gmid,
            score: hit.score,
            matched_modality: modality,
            file_name: hit.payload.original_name,
            media_type: hit.payload.media_type,
            file_size: hit.payload.size_bytes,
            file_path: hit.payload.stored_path,
            thumbnail_path: hit.payload.thumbnail_path,
            upload_time: hit.payload.upload_time,
            description: hit.payload.description,
            width: hit.payload.width,
            height: hit.payload.height,
        }
    }
}

/// 搜索响应
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    pub query: String,
    pub results: Vec<MediaSearchResult>,
    pub total: usize,
    pub took_seconds: f64,
    /// 服务端实际生效的阈值。双路召回时为两路阈值的较小者。
    pub threshold_used: f32,
}
