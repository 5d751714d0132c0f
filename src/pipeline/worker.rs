/*!
 * 入库worker
 *
 * 固定数量的worker消费入库队列，把每条记录沿状态机推进到 indexed：
 *
 * 1. pending：生成缩略图，成功迁移到 thumbnail_ready，失败进 failed
 * 2. thumbnail_ready：CAS抢占到 embedding_in_flight 后并发获取
 *    文本与图像向量（索引中已有图像向量则复用，不再调用图像embedding）
 * 3. upsert双向量点，迁移到 indexed
 *
 * 瞬时失败退回 thumbnail_ready 并按指数退避延迟重试，超过上限进
 * failed；不可重试错误（4xx、维度不匹配）立即进 failed。
 * 所有状态迁移都是CAS：一条 embedding_in_flight 的记录不会被
 * 第二个worker重入。worker在阶段之间检查取消令牌，取消时记录
 * 停留在 embedding_in_flight，由下次启动对账接管。
 */

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{IngestQueue, IngestTask};
use crate::config::PipelineConfig;
use crate::embedding::types::{EmbeddingError, EmbeddingService};
use crate::media::content_store::ContentStore;
use crate::media::thumbnail;
use crate::media::types::{IndexState, MediaRecord};
use crate::registry::MediaRecordRepository;
use crate::vector_index::types::{MediaPoint, PointPayload, VectorIndexService};

/// 重试退避基准
const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// 重试退避上限
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// 流水线共享上下文
pub struct PipelineContext {
    pub registry: MediaRecordRepository,
    pub content_store: ContentStore,
    pub embedding: Arc<dyn EmbeddingService>,
    pub index: Arc<dyn VectorIndexService>,
    pub queue: IngestQueue,
    pub config: PipelineConfig,
}

/// 启动worker池
pub fn spawn_workers(
    ctx: Arc<PipelineContext>,
    rx: mpsc::Receiver<IngestTask>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    let mut handles = Vec::with_capacity(ctx.config.worker_count);

    info!("启动 {} 个入库worker", ctx.config.worker_count);

    for worker_id in 0..ctx.config.worker_count {
        let ctx = ctx.clone();
        let rx = rx.clone();
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            debug!("worker-{} 启动", worker_id);

            loop {
                let task = tokio::select! {
                    _ = cancel.cancelled() => break,
                    task = async { rx.lock().await.recv().await } => task,
                };

                let Some(task) = task else { break };

                if let Err(e) = process_task(&ctx, &cancel, &task.gmid).await {
                    error!("worker-{} 处理任务失败 {}: {:#}", worker_id, task.gmid, e);
                }
            }

            debug!("worker-{} 停止", worker_id);
        }));
    }

    handles
}

/// 处理单条入库任务
pub(crate) async fn process_task(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
    gmid: &str,
) -> Result<()> {
    let Some(record) = ctx.registry.get(gmid).await? else {
        debug!("任务对应的记录已不存在，跳过: {}", gmid);
        return Ok(());
    };

    let record = match record.index_state {
        IndexState::Pending => {
            match generate_thumbnail(ctx, &record).await? {
                Some(record) => record,
                // 缩略图失败已进failed终态
                None => return Ok(()),
            }
        }
        IndexState::ThumbnailReady => record,
        // embedding_in_flight 归另一个worker所有；终态无需处理
        other => {
            debug!("记录状态 {} 无需处理: {}", other.as_str(), gmid);
            return Ok(());
        }
    };

    if cancel.is_cancelled() {
        return Ok(());
    }

    embed_and_index(ctx, cancel, record).await
}

/// pending → thumbnail_ready（或 failed）
async fn generate_thumbnail(
    ctx: &PipelineContext,
    record: &MediaRecord,
) -> Result<Option<MediaRecord>> {
    let result = thumbnail::create_thumbnail(
        Path::new(&record.stored_path),
        record.media_type,
        Path::new(&record.thumbnail_path),
    )
    .await;

    match result {
        Ok(()) => {
            let moved = ctx
                .registry
                .transition(
                    &record.gmid,
                    IndexState::Pending,
                    IndexState::ThumbnailReady,
                    None,
                )
                .await?;
            if !moved {
                return Ok(None);
            }
            // 重新读取，拿到最新描述
            Ok(ctx.registry.get(&record.gmid).await?)
        }
        Err(e) => {
            let message = format!("缩略图生成失败: {:#}", e);
            warn!("{} ({})", message, record.gmid);
            // 原始文件保留，记录进入failed等待人工干预
            ctx.registry
                .transition(
                    &record.gmid,
                    IndexState::Pending,
                    IndexState::Failed,
                    Some(&message),
                )
                .await?;
            Ok(None)
        }
    }
}

/// thumbnail_ready → embedding_in_flight → indexed
async fn embed_and_index(
    ctx: &PipelineContext,
    cancel: &CancellationToken,
    record: MediaRecord,
) -> Result<()> {
    let claimed = ctx
        .registry
        .transition(
            &record.gmid,
            IndexState::ThumbnailReady,
            IndexState::EmbeddingInFlight,
            None,
        )
        .await?;
    if !claimed {
        debug!("记录已被其他worker抢占: {}", record.gmid);
        return Ok(());
    }

    if cancel.is_cancelled() {
        // 停留在 embedding_in_flight，由启动对账接管
        return Ok(());
    }

    // 索引中已有图像向量则复用：描述编辑重嵌入只需重新计算文本向量
    let existing_image = match ctx.index.fetch_image_vector(&record.gmid).await {
        Ok(v) => v,
        Err(e) => {
            return fail_transient(ctx, &record, &format!("读取已有向量失败: {:#}", e)).await;
        }
    };

    let vectors = match existing_image {
        Some(image_vector) => {
            debug!("复用已索引的图像向量: {}", record.gmid);
            match ctx.embedding.embed_text(&record.description).await {
                Ok(text_vector) => Ok((text_vector, image_vector)),
                Err(e) => Err(e),
            }
        }
        None => {
            let thumbnail_bytes = match ctx.content_store.read(&record.thumbnail_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return fail_transient(ctx, &record, &format!("读取缩略图失败: {:#}", e))
                        .await;
                }
            };

            // 文本与图像并发向量化，各自受独立速率限制
            let (text_result, image_result) = tokio::join!(
                ctx.embedding.embed_text(&record.description),
                ctx.embedding.embed_image(&thumbnail_bytes),
            );

            match (text_result, image_result) {
                (Ok(text), Ok(image)) => Ok((text, image)),
                (Err(e), _) | (_, Err(e)) => Err(e),
            }
        }
    };

    let (text_vector, image_vector) = match vectors {
        Ok(v) => v,
        Err(e) => return handle_embedding_error(ctx, &record, e).await,
    };

    if cancel.is_cancelled() {
        return Ok(());
    }

    let point = MediaPoint {
        gmid: record.gmid.clone(),
        text_vector,
        image_vector,
        payload: PointPayload::from_record(&record),
    };

    if let Err(e) = ctx.index.upsert(point).await {
        return fail_transient(ctx, &record, &format!("向量写入失败: {:#}", e)).await;
    }

    ctx.registry
        .transition(
            &record.gmid,
            IndexState::EmbeddingInFlight,
            IndexState::Indexed,
            None,
        )
        .await
        .context("迁移到indexed状态失败")?;

    info!("媒体已完成索引: {}", record.gmid);
    Ok(())
}

/// embedding错误分流：可重试走退避，不可重试直接终态
async fn handle_embedding_error(
    ctx: &PipelineContext,
    record: &MediaRecord,
    error: EmbeddingError,
) -> Result<()> {
    let message = error.to_string();
    if error.is_retryable() {
        fail_transient(ctx, record, &message).await
    } else {
        warn!("不可重试的embedding失败 {}: {}", record.gmid, message);
        ctx.registry
            .transition(
                &record.gmid,
                IndexState::EmbeddingInFlight,
                IndexState::Failed,
                Some(&message),
            )
            .await?;
        Ok(())
    }
}

/// 瞬时失败：计数、退回 thumbnail_ready、延迟重试；超限进 failed
async fn fail_transient(ctx: &PipelineContext, record: &MediaRecord, message: &str) -> Result<()> {
    let attempts = ctx.registry.increment_attempts(&record.gmid).await?;

    if attempts >= ctx.config.max_embedding_attempts {
        warn!(
            "重试次数耗尽（{}次），媒体进入失败状态 {}: {}",
            attempts, record.gmid, message
        );
        ctx.registry
            .transition(
                &record.gmid,
                IndexState::EmbeddingInFlight,
                IndexState::Failed,
                Some(message),
            )
            .await?;
        return Ok(());
    }

    let moved = ctx
        .registry
        .transition(
            &record.gmid,
            IndexState::EmbeddingInFlight,
            IndexState::ThumbnailReady,
            Some(message),
        )
        .await?;

    if moved {
        let delay = retry_backoff(attempts);
        warn!(
            "瞬时失败（第{}次），{}秒后重试 {}: {}",
            attempts,
            delay.as_secs(),
            record.gmid,
            message
        );
        ctx.queue.enqueue_delayed(&record.gmid, delay);
    }

    Ok(())
}

/// 指数退避：2s, 4s, 8s... 上限60s
fn retry_backoff(attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(5);
    (RETRY_BACKOFF_BASE * (1u32 << shift)).min(RETRY_BACKOFF_MAX)
}

#[cfg(test)]
mod backoff_tests {
    use super::*;

    #[test]
    fn test_retry_backoff_progression() {
        assert_eq!(retry_backoff(1), Duration::from_secs(2));
        assert_eq!(retry_backoff(2), Duration::from_secs(4));
        assert_eq!(retry_backoff(3), Duration::from_secs(8));
        assert_eq!(retry_backoff(100), RETRY_BACKOFF_MAX);
    }
}
