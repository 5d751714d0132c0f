/*!
 * HTTP错误映射
 *
 * 内部错误在接口边界收敛为固定的错误分类，响应体携带
 * 机器可读的code与人可读的message。500的细节不外泄，
 * 只进日志。
 */

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::embedding::types::EmbeddingError;
use crate::search::types::SearchError;

/// 接口层错误分类
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("无效的认证凭据")]
    Unauthorized,

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("状态冲突: {0}")]
    Conflict(String),

    #[error("文件超出大小限制")]
    PayloadTooLarge,

    #[error("不支持的文件类型: {0}")]
    UnsupportedMediaType(String),

    #[error("请求过于频繁，请稍后重试")]
    RateLimited,

    #[error("依赖服务不可用: {0}")]
    Dependency(String),

    #[error("服务过载，请稍后重试")]
    Overloaded,

    #[error("服务内部错误")]
    Internal(anyhow::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Dependency(_) => StatusCode::BAD_GATEWAY,
            ApiError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::RateLimited => "RATE_LIMITED",
            ApiError::Dependency(_) => "DEPENDENCY_UNAVAILABLE",
            ApiError::Overloaded => "OVERLOADED",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // 500的原始错误只进日志
        let message = match &self {
            ApiError::Internal(source) => {
                error!("接口内部错误: {:#}", source);
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "code": self.code(),
            "message": message,
        }));

        let mut response = (status, body).into_response();

        // 限流与过载响应附带重试提示
        if matches!(self, ApiError::RateLimited | ApiError::Overloaded) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("5"));
        }

        response
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::Embedding(EmbeddingError::RateLimited) => ApiError::RateLimited,
            SearchError::Embedding(EmbeddingError::Rejected(msg)) => ApiError::InvalidInput(msg),
            SearchError::Embedding(inner) => ApiError::Dependency(inner.to_string()),
            SearchError::NotIndexed(gmid) => {
                ApiError::NotFound(format!("媒体尚未进入索引: {}", gmid))
            }
            SearchError::Index(inner) => ApiError::Dependency(inner),
        }
    }
}
