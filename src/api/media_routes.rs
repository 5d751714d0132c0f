/*!
 * 媒体接口
 *
 * 上传、列表、详情、删除与描述编辑。上传是多文件multipart，
 * 逐文件返回结果；字节落盘并建立pending记录后立即返回，
 * 缩略图与embedding由流水线异步完成。
 */

use axum::extract::{Form, Multipart, Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::auth::AuthUser;
use super::error::ApiError;
use super::state::SharedState;
use crate::media::gmid::derive_gmid;
use crate::media::thumbnail::probe_dimensions;
use crate::media::types::{IndexState, MediaRecord, MediaType};
use crate::utils::error::Validator;

/// 单个文件的上传结果
#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub file_name: String,
    pub file_type: Option<MediaType>,
    pub file_size: u64,
    pub file_path: String,
    pub gmid: Option<String>,
    pub message: String,
}

impl UploadResult {
    fn failure(file_name: &str, file_type: Option<MediaType>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            file_name: file_name.to_string(),
            file_type,
            file_size: 0,
            file_path: String::new(),
            gmid: None,
            message: message.into(),
        }
    }
}

/// POST /api/v1/media/upload
pub async fn upload(
    State(state): State<SharedState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadResult>>, ApiError> {
    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let mut descriptions: Vec<String> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("multipart解析失败: {}", e)))?
    {
        match field.name() {
            Some("files") | Some("files[]") => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unnamed".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::PayloadTooLarge)?;
                files.push((file_name, bytes.to_vec()));
            }
            Some("descriptions") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("描述字段读取失败: {}", e)))?;
                descriptions.push(text);
            }
            _ => {}
        }
    }

    if files.is_empty() {
        return Err(ApiError::InvalidInput("未携带任何文件".to_string()));
    }

    info!("开始上传 {} 个媒体文件", files.len());

    let mut results = Vec::with_capacity(files.len());
    for (i, (file_name, bytes)) in files.into_iter().enumerate() {
        let description = descriptions.get(i).map(|s| s.trim()).filter(|s| !s.is_empty());
        let result = ingest_one(&state, &file_name, bytes, description).await?;
        results.push(result);
    }

    let ok_count = results.iter().filter(|r| r.success).count();
    info!("批量上传完成: {}/{} 成功", ok_count, results.len());

    Ok(Json(results))
}

/// 单文件入库：校验、落盘、建档、入队
async fn ingest_one(
    state: &SharedState,
    file_name: &str,
    bytes: Vec<u8>,
    description: Option<&str>,
) -> Result<UploadResult, ApiError> {
    let Some(media_type) = MediaType::from_filename(file_name) else {
        return Ok(UploadResult::failure(file_name, None, "不支持的文件类型"));
    };

    if bytes.len() as u64 > state.config.max_file_size {
        return Ok(UploadResult::failure(
            file_name,
            Some(media_type),
            "文件超出大小限制",
        ));
    }

    let gmid = derive_gmid(&bytes);

    // 同内容重复上传收敛到同一个GMID：保留已有文件，元数据最后写入者胜出
    if let Some(existing) = state.registry.get(&gmid).await? {
        if let Some(desc) = description {
            state.registry.update_description(&gmid, desc).await?;
        }

        // 从终态拉回流水线重新嵌入（携带可能更新的描述）
        let reenter = state
            .registry
            .transition(&gmid, IndexState::Indexed, IndexState::ThumbnailReady, None)
            .await?
            || state
                .registry
                .transition(&gmid, IndexState::Failed, IndexState::ThumbnailReady, None)
                .await?;

        if reenter {
            state.registry.reset_attempts(&gmid).await?;
            if state.queue.enqueue(&gmid).is_err() {
                return Err(ApiError::Overloaded);
            }
        }

        info!("重复内容上传，合并到已有媒体: {}", gmid);
        return Ok(UploadResult {
            success: true,
            file_name: file_name.to_string(),
            file_type: Some(media_type),
            file_size: existing.size_bytes,
            file_path: existing.stored_path,
            gmid: Some(gmid),
            message: "内容已存在，元数据已更新".to_string(),
        });
    }

    let upload_time = Utc::now();
    let stored = state
        .content_store
        .store(&bytes, file_name, media_type, &gmid, upload_time)
        .await?;

    let (width, height) = match media_type {
        MediaType::Photo => match probe_dimensions(&bytes) {
            Some((w, h)) => (Some(w), Some(h)),
            None => (None, None),
        },
        MediaType::Video => (None, None),
    };

    let record = MediaRecord {
        gmid: gmid.clone(),
        original_name: file_name.to_string(),
        stored_path: stored.stored_path.to_string_lossy().to_string(),
        thumbnail_path: stored.thumbnail_path.to_string_lossy().to_string(),
        media_type,
        size_bytes: bytes.len() as u64,
        width,
        height,
        duration_ms: None,
        upload_time,
        description: description
            .map(|s| s.to_string())
            .unwrap_or_else(|| MediaRecord::default_description(file_name)),
        index_state: IndexState::Pending,
        index_attempts: 0,
        last_error: None,
    };

    state.registry.put(&record).await?;

    if state.queue.enqueue(&gmid).is_err() {
        // 字节已落盘、记录为pending，重启对账会补上这次入队
        warn!("入库队列已满，拒绝新的上传: {}", gmid);
        return Err(ApiError::Overloaded);
    }

    Ok(UploadResult {
        success: true,
        file_name: file_name.to_string(),
        file_type: Some(media_type),
        file_size: record.size_bytes,
        file_path: record.stored_path.clone(),
        gmid: Some(gmid),
        message: "上传成功".to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub media_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub items: Vec<MediaRecord>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// GET /api/v1/media/list
pub async fn list(
    State(state): State<SharedState>,
    _user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<MediaListResponse>, ApiError> {
    let media_type = match &query.media_type {
        Some(raw) => Some(
            MediaType::parse(raw)
                .ok_or_else(|| ApiError::InvalidInput(format!("未知的媒体类型: {}", raw)))?,
        ),
        None => None,
    };

    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).clamp(1, 100);

    let result = state.registry.list(media_type, page, page_size).await?;

    Ok(Json(MediaListResponse {
        items: result.items,
        total: result.total,
        page,
        page_size,
    }))
}

/// GET /api/v1/media/{gmid}
pub async fn detail(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(gmid): Path<String>,
) -> Result<Json<MediaRecord>, ApiError> {
    Validator::validate_gmid(&gmid).map_err(ApiError::InvalidInput)?;

    state
        .registry
        .get(&gmid)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(gmid))
}

/// DELETE /api/v1/media/{gmid}
///
/// 级联删除：向量点、缩略图、原始文件、注册表记录。
/// 向量点删除失败时整个操作中止，不会留下半删状态。
pub async fn delete(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(gmid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Validator::validate_gmid(&gmid).map_err(ApiError::InvalidInput)?;

    let Some(record) = state.registry.get(&gmid).await? else {
        return Err(ApiError::NotFound(gmid));
    };

    state
        .index
        .delete(&gmid)
        .await
        .map_err(|e| ApiError::Dependency(format!("{:#}", e)))?;

    state
        .content_store
        .delete(&record.stored_path, &record.thumbnail_path)
        .await?;

    state.registry.delete(&gmid).await?;

    info!("媒体已级联删除: {}", gmid);
    Ok(Json(json!({ "success": true, "message": "文件删除成功" })))
}

#[derive(Debug, Deserialize)]
pub struct DescriptionForm {
    pub description: String,
}

/// PUT /api/v1/media/{gmid}/description
///
/// 描述更新后把记录送回流水线重新嵌入文本向量；
/// 图像向量在索引中原样保留，由worker直接复用。
pub async fn update_description(
    State(state): State<SharedState>,
    _user: AuthUser,
    Path(gmid): Path<String>,
    Form(form): Form<DescriptionForm>,
) -> Result<Json<Value>, ApiError> {
    Validator::validate_gmid(&gmid).map_err(ApiError::InvalidInput)?;

    let found = state
        .registry
        .update_description(&gmid, form.description.trim())
        .await?;
    if !found {
        return Err(ApiError::NotFound(gmid));
    }

    // 从终态拉回 thumbnail_ready 触发重嵌入
    let reenter = state
        .registry
        .transition(&gmid, IndexState::Indexed, IndexState::ThumbnailReady, None)
        .await?
        || state
            .registry
            .transition(&gmid, IndexState::Failed, IndexState::ThumbnailReady, None)
            .await?;

    if reenter {
        state.registry.reset_attempts(&gmid).await?;
        if state.queue.enqueue(&gmid).is_err() {
            return Err(ApiError::Overloaded);
        }
    }

    info!("描述已更新，等待重新索引: {}", gmid);
    Ok(Json(json!({ "success": true, "message": "描述更新成功" })))
}
