/*!
 * 应用上下文
 *
 * 配置加载一次后连同各服务句柄装进一个上下文结构，
 * 通过axum的State逐层传递，不使用全局单例。
 */

use std::sync::Arc;

use crate::config::AppConfig;
use crate::embedding::DashScopeClient;
use crate::media::content_store::ContentStore;
use crate::pipeline::IngestQueue;
use crate::registry::MediaRecordRepository;
use crate::search::SearchEngine;
use crate::vector_index::types::VectorIndexService;

/// 各HTTP处理器共享的应用上下文
pub struct AppContext {
    pub config: AppConfig,
    pub registry: MediaRecordRepository,
    pub content_store: ContentStore,
    pub index: Arc<dyn VectorIndexService>,
    pub search: SearchEngine,
    pub queue: IngestQueue,
    /// 就绪检查用的具体客户端句柄（探测服务可达性）
    pub embedding_client: Arc<DashScopeClient>,
}

pub type SharedState = Arc<AppContext>;
