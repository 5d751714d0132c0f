/*!
 * 启动对账
 *
 * 队列不做持久化，崩溃后靠扫描注册表恢复：
 * - embedding_in_flight 是崩溃/取消留下的悬挂状态，退回 thumbnail_ready
 * - 所有非终态记录重新入队
 * - indexed 但索引中查不到点的记录（例如维度重建把集合清空了）
 *   降级回 thumbnail_ready 重新走一遍流水线
 */

use anyhow::Result;
use tracing::{info, warn};

use super::worker::PipelineContext;
use crate::media::types::IndexState;

/// 批量探测索引点存在性时的分片大小
const PROBE_CHUNK_SIZE: usize = 256;

/// 执行启动对账，返回重新入队的记录数
pub async fn reconcile_on_startup(ctx: &PipelineContext) -> Result<usize> {
    let mut enqueued = 0;

    // 悬挂的 embedding_in_flight 退回 thumbnail_ready
    let stuck = ctx
        .registry
        .list_in_states(&[IndexState::EmbeddingInFlight])
        .await?;
    for record in &stuck {
        let moved = ctx
            .registry
            .transition(
                &record.gmid,
                IndexState::EmbeddingInFlight,
                IndexState::ThumbnailReady,
                Some("启动时回收悬挂任务"),
            )
            .await?;
        if moved {
            warn!("回收悬挂的embedding任务: {}", record.gmid);
        }
    }

    // 非终态记录全部重新入队
    let pending = ctx
        .registry
        .list_in_states(&[IndexState::Pending, IndexState::ThumbnailReady])
        .await?;
    for record in &pending {
        if ctx.queue.enqueue(&record.gmid).is_ok() {
            enqueued += 1;
        } else {
            warn!("对账入队失败（队列已满）: {}", record.gmid);
        }
    }

    // indexed 记录与索引内容对账，缺点的降级重建
    let indexed = ctx.registry.list_in_states(&[IndexState::Indexed]).await?;
    for chunk in indexed.chunks(PROBE_CHUNK_SIZE) {
        let gmids: Vec<String> = chunk.iter().map(|r| r.gmid.clone()).collect();
        let present = ctx.index.existing_gmids(&gmids).await?;

        for record in chunk {
            if present.contains(&record.gmid) {
                continue;
            }

            warn!("索引中缺少已标记indexed的点，降级重建: {}", record.gmid);
            let moved = ctx
                .registry
                .transition(
                    &record.gmid,
                    IndexState::Indexed,
                    IndexState::ThumbnailReady,
                    Some("索引点缺失，启动对账降级"),
                )
                .await?;
            if moved && ctx.queue.enqueue(&record.gmid).is_ok() {
                enqueued += 1;
            }
        }
    }

    info!("启动对账完成，重新入队 {} 条记录", enqueued);
    Ok(enqueued)
}
