/*!
 * 搜索接口
 *
 * 三种检索模式加统计。阈值不接受客户端传入：请求体里即使带了
 * threshold字段也会被忽略，保证检索质量由运维配置统一控制。
 */

use axum::extract::{Form, Multipart, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::auth::AuthUser;
use super::error::ApiError;
use super::state::SharedState;
use crate::search::types::SearchResponse;

#[derive(Debug, Deserialize)]
pub struct TextSearchRequest {
    pub query: String,
    pub limit: Option<usize>,
}

/// POST /api/v1/search/text
pub async fn text(
    State(state): State<SharedState>,
    _user: AuthUser,
    Json(request): Json<TextSearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::InvalidInput("搜索查询不能为空".to_string()));
    }

    let response = state
        .search
        .search_by_text(request.query.trim(), request.limit)
        .await?;

    Ok(Json(response))
}

/// POST /api/v1/search/by-image
pub async fn by_image(
    State(state): State<SharedState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<SearchResponse>, ApiError> {
    let mut image_bytes: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("multipart解析失败: {}", e)))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|_| ApiError::PayloadTooLarge)?;
            image_bytes = Some(bytes.to_vec());
        }
    }

    let image_bytes =
        image_bytes.ok_or_else(|| ApiError::InvalidInput("缺少image字段".to_string()))?;

    debug!("图像搜索请求: {} 字节", image_bytes.len());

    let response = state.search.search_by_image(&image_bytes, None).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct SimilarByFileRequest {
    pub file_path: String,
    pub limit: Option<usize>,
}

/// POST /api/v1/search/similar-by-file
pub async fn similar_by_file(
    State(state): State<SharedState>,
    _user: AuthUser,
    Form(request): Form<SimilarByFileRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let record = state
        .registry
        .get_by_stored_path(request.file_path.trim())
        .await?
        .ok_or_else(|| ApiError::NotFound(request.file_path.clone()))?;

    let response = state
        .search
        .search_similar(&record.gmid, request.limit)
        .await?;

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct IndexStatsResponse {
    pub point_count: u64,
    pub dimension: usize,
    pub media_count: u64,
}

/// GET /api/v1/search/stats
pub async fn stats(
    State(state): State<SharedState>,
    _user: AuthUser,
) -> Result<Json<IndexStatsResponse>, ApiError> {
    let index_stats = state
        .index
        .stats()
        .await
        .map_err(|e| ApiError::Dependency(format!("{:#}", e)))?;

    let media_count = state.registry.list(None, 1, 1).await?.total;

    Ok(Json(IndexStatsResponse {
        point_count: index_stats.point_count,
        dimension: index_stats.dimension,
        media_count,
    }))
}
