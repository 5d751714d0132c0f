/*!
 * Famory 服务入口
 *
 * 启动顺序：配置 → 日志 → 内容存储/注册表 → 向量数据库 →
 * 启动对账 → worker池 → HTTP服务。退出码：
 *   0 正常关闭
 *   1 配置错误
 *   2 内容根目录不可用
 *   3 REQUIRE_INDEX_ON_START=true 且向量数据库不可达
 */

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use famory::api::{self, AppContext};
use famory::config::load_config;
use famory::embedding::DashScopeClient;
use famory::media::content_store::ContentStore;
use famory::pipeline::{reconcile_on_startup, spawn_workers, IngestQueue, PipelineContext};
use famory::registry::{DatabaseManager, MediaRecordRepository};
use famory::search::SearchEngine;
use famory::utils::logging::init_logging;
use famory::vector_index::{QdrantMediaIndex, VectorIndexService};

/// 退出码
mod exit_code {
    pub const OK: i32 = 0;
    pub const CONFIG_ERROR: i32 = 1;
    pub const CONTENT_ROOT_ERROR: i32 = 2;
    pub const VECTOR_DB_UNREACHABLE: i32 = 3;
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    if let Err(e) = init_logging() {
        eprintln!("{}", e);
        return exit_code::CONFIG_ERROR;
    }

    // 1. 配置
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("配置加载失败: {:#}", e);
            return exit_code::CONFIG_ERROR;
        }
    };
    info!(
        "配置加载完成: content_root={}, workers={}",
        config.content_root.display(),
        config.pipeline.worker_count
    );

    // 2. 内容存储与注册表
    let content_store = match ContentStore::new(&config.content_root) {
        Ok(store) => store,
        Err(e) => {
            error!("内容根目录不可用: {:#}", e);
            return exit_code::CONTENT_ROOT_ERROR;
        }
    };

    let db = match DatabaseManager::new(&content_store.registry_db_path()).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("注册表初始化失败: {:#}", e);
            return exit_code::CONTENT_ROOT_ERROR;
        }
    };
    let registry = MediaRecordRepository::new(db.clone());

    // 3. embedding客户端
    let embedding_client = match DashScopeClient::new(config.embedding.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("embedding客户端初始化失败: {:#}", e);
            return exit_code::CONFIG_ERROR;
        }
    };

    // 4. 向量索引
    let index = match QdrantMediaIndex::new(config.vector_db.clone(), config.embedding.dimension) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("Qdrant客户端初始化失败: {:#}", e);
            return exit_code::CONFIG_ERROR;
        }
    };

    let index_ready = match index.test_connection().await {
        Ok(()) => match index.ensure_collection().await {
            Ok(()) => true,
            Err(e) => {
                error!("集合初始化失败: {:#}", e);
                if config.require_index_on_start {
                    return exit_code::VECTOR_DB_UNREACHABLE;
                }
                false
            }
        },
        Err(e) => {
            if config.require_index_on_start {
                error!("向量数据库不可达: {:#}", e);
                return exit_code::VECTOR_DB_UNREACHABLE;
            }
            warn!("向量数据库暂不可达，搜索与索引将降级直至恢复: {:#}", e);
            false
        }
    };

    let index: Arc<dyn VectorIndexService> = index;

    // 5. 流水线
    let (queue, queue_rx) = IngestQueue::new(config.pipeline.queue_capacity);
    let pipeline_ctx = Arc::new(PipelineContext {
        registry: registry.clone(),
        content_store: content_store.clone(),
        embedding: embedding_client.clone(),
        index: index.clone(),
        queue: queue.clone(),
        config: config.pipeline,
    });

    // 崩溃恢复：非终态记录重新入队，索引缺点的降级重建
    if index_ready {
        if let Err(e) = reconcile_on_startup(&pipeline_ctx).await {
            warn!("启动对账失败: {:#}", e);
        }
    } else {
        warn!("向量数据库不可达，跳过启动对账");
    }

    let cancel = CancellationToken::new();
    let workers = spawn_workers(pipeline_ctx, queue_rx, cancel.clone());

    // 6. HTTP服务
    let search = SearchEngine::new(embedding_client.clone(), index.clone(), config.search);
    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(AppContext {
        config,
        registry,
        content_store,
        index,
        search,
        queue,
        embedding_client,
    });

    let router = api::build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("监听地址绑定失败 {}: {}", bind_addr, e);
            return exit_code::CONFIG_ERROR;
        }
    };
    info!("HTTP服务已启动: {}", bind_addr);

    // SIGINT触发优雅关闭：停止接收连接，取消并回收worker
    let shutdown_token = cancel.clone();
    let serve_result = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("收到关闭信号，开始优雅关闭");
            shutdown_token.cancel();
        })
        .await;

    cancel.cancel();
    for handle in workers {
        let _ = handle.await;
    }
    db.close().await;

    match serve_result {
        Ok(()) => {
            info!("服务已正常退出");
            exit_code::OK
        }
        Err(e) => {
            error!("HTTP服务异常退出: {}", e);
            exit_code::CONFIG_ERROR
        }
    }
}
