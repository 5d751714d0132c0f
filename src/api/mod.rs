/*!
 * HTTP接口层
 *
 * 所有业务路由挂在 /api/v1 下并要求 Bearer 令牌；
 * /ping 与 /auth/token 不需要认证，/health 做依赖就绪检查。
 */

pub mod auth;
pub mod error;
pub mod media_routes;
pub mod search_routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

pub use error::ApiError;
pub use state::{AppContext, SharedState};

/// 组装完整路由
pub fn build_router(state: SharedState) -> Router {
    // 留出multipart报文头与编码开销
    let body_limit = state.config.max_file_size as usize + 1024 * 1024;

    Router::new()
        .route("/api/v1/auth/token", post(auth::issue_token))
        .route("/api/v1/media/upload", post(media_routes::upload))
        .route("/api/v1/media/list", get(media_routes::list))
        .route(
            "/api/v1/media/{gmid}",
            get(media_routes::detail).delete(media_routes::delete),
        )
        .route(
            "/api/v1/media/{gmid}/description",
            put(media_routes::update_description),
        )
        .route("/api/v1/search/text", post(search_routes::text))
        .route("/api/v1/search/by-image", post(search_routes::by_image))
        .route(
            "/api/v1/search/similar-by-file",
            post(search_routes::similar_by_file),
        )
        .route("/api/v1/search/stats", get(search_routes::stats))
        .route("/ping", get(ping))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// GET /ping — 存活检查
async fn ping() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /health — 就绪检查：向量数据库与embedding服务都可达才算就绪
async fn health(State(state): State<SharedState>) -> (StatusCode, Json<Value>) {
    let vector_db_ok = state.index.stats().await.is_ok();
    let embedding_ok = state.embedding_client.probe_reachable().await;

    let status = if vector_db_ok && embedding_ok {
        StatusCode::OK
    } else {
        StatusCode::BAD_GATEWAY
    };

    let body = json!({
        "status": if status == StatusCode::OK { "ready" } else { "degraded" },
        "vectorDb": if vector_db_ok { "ok" } else { "unreachable" },
        "embeddingProvider": if embedding_ok { "ok" } else { "unreachable" },
    });

    (status, Json(body))
}
