/*!
 * 入库流水线单元测试
 *
 * embedding服务与向量索引用内存mock替代，注册表用内存SQLite，
 * 内容存储落在临时目录，整条状态机真实走通。
 */

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use image::{ImageBuffer, Rgb};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::queue::IngestQueue;
use super::reconcile::reconcile_on_startup;
use super::worker::{process_task, PipelineContext};
use crate::config::PipelineConfig;
use crate::embedding::types::{EmbeddingError, EmbeddingResult, EmbeddingService};
use crate::media::content_store::ContentStore;
use crate::media::types::{IndexState, MediaRecord, MediaType};
use crate::registry::{DatabaseManager, MediaRecordRepository};
use crate::utils::error::AppResult;
use crate::vector_index::types::{
    IndexStatsInfo, MediaPoint, PointPayload, ScoredMedia, VectorIndexService, VectorSlot,
};

const DIM: usize = 8;

/// 可编程的embedding mock：预置的错误队列耗尽后返回单位向量
struct MockEmbedding {
    text_errors: Mutex<VecDeque<EmbeddingError>>,
    text_calls: AtomicUsize,
    image_calls: AtomicUsize,
}

impl MockEmbedding {
    fn ok() -> Self {
        Self::with_text_errors(vec![])
    }

    fn with_text_errors(errors: Vec<EmbeddingError>) -> Self {
        Self {
            text_errors: Mutex::new(errors.into()),
            text_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
        }
    }

    fn unit_vector() -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[0] = 1.0;
        v
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedding {
    async fn embed_text(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.text_errors.lock().await.pop_front() {
            return Err(err);
        }
        Ok(Self::unit_vector())
    }

    async fn embed_image(&self, _jpeg: &[u8]) -> EmbeddingResult<Vec<f32>> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::unit_vector())
    }

    fn dimension(&self) -> usize {
        DIM
    }
}

/// 内存向量索引mock
#[derive(Default)]
struct MockIndex {
    points: Mutex<HashMap<String, MediaPoint>>,
}

#[async_trait]
impl VectorIndexService for MockIndex {
    async fn ensure_collection(&self) -> AppResult<()> {
        Ok(())
    }

    async fn upsert(&self, point: MediaPoint) -> AppResult<()> {
        self.points.lock().await.insert(point.gmid.clone(), point);
        Ok(())
    }

    async fn search(
        &self,
        _slot: VectorSlot,
        _query_vector: Vec<f32>,
        _limit: usize,
        _score_threshold: f32,
        _media_type: Option<MediaType>,
    ) -> AppResult<Vec<ScoredMedia>> {
        Ok(vec![])
    }

    async fn delete(&self, gmid: &str) -> AppResult<()> {
        self.points.lock().await.remove(gmid);
        Ok(())
    }

    async fn stats(&self) -> AppResult<IndexStatsInfo> {
        Ok(IndexStatsInfo {
            point_count: self.points.lock().await.len() as u64,
            dimension: DIM,
        })
    }

    async fn fetch_image_vector(&self, gmid: &str) -> AppResult<Option<Vec<f32>>> {
        Ok(self
            .points
            .lock()
            .await
            .get(gmid)
            .map(|p| p.image_vector.clone()))
    }

    async fn existing_gmids(&self, gmids: &[String]) -> AppResult<HashSet<String>> {
        let points = self.points.lock().await;
        Ok(gmids
            .iter()
            .filter(|g| points.contains_key(*g))
            .cloned()
            .collect())
    }
}

struct TestHarness {
    ctx: Arc<PipelineContext>,
    embedding: Arc<MockEmbedding>,
    index: Arc<MockIndex>,
    rx: tokio::sync::mpsc::Receiver<super::queue::IngestTask>,
    _tempdir: tempfile::TempDir,
}

async fn harness(embedding: MockEmbedding, max_attempts: u32) -> TestHarness {
    let tempdir = tempfile::tempdir().unwrap();
    let content_store = ContentStore::new(tempdir.path()).unwrap();
    let db = DatabaseManager::new_in_memory().await.unwrap();
    let registry = MediaRecordRepository::new(Arc::new(db));
    let (queue, rx) = IngestQueue::new(64);

    let embedding = Arc::new(embedding);
    let index = Arc::new(MockIndex::default());

    let ctx = Arc::new(PipelineContext {
        registry,
        content_store,
        embedding: embedding.clone(),
        index: index.clone(),
        queue,
        config: PipelineConfig {
            worker_count: 1,
            max_embedding_attempts: max_attempts,
            queue_capacity: 64,
        },
    });

    TestHarness {
        ctx,
        embedding,
        index,
        rx,
        _tempdir: tempdir,
    }
}

fn sample_png() -> Vec<u8> {
    let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(64, 48, Rgb([200, 120, 40]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// 落盘并写入注册表，返回pending状态的记录
async fn seed_record(harness: &TestHarness, gmid: &str, state: IndexState) -> MediaRecord {
    let stored = harness
        .ctx
        .content_store
        .store(&sample_png(), "beach.png", MediaType::Photo, gmid, Utc::now())
        .await
        .unwrap();

    let record = MediaRecord {
        gmid: gmid.to_string(),
        original_name: "beach.png".to_string(),
        stored_path: stored.stored_path.to_string_lossy().to_string(),
        thumbnail_path: stored.thumbnail_path.to_string_lossy().to_string(),
        media_type: MediaType::Photo,
        size_bytes: 64,
        width: Some(64),
        height: Some(48),
        duration_ms: None,
        upload_time: Utc::now(),
        description: "海边日落".to_string(),
        index_state: state,
        index_attempts: 0,
        last_error: None,
    };
    harness.ctx.registry.put(&record).await.unwrap();
    record
}

#[tokio::test]
async fn test_happy_path_reaches_indexed() {
    let harness = harness(MockEmbedding::ok(), 5).await;
    let cancel = CancellationToken::new();
    let gmid = "a".repeat(32);

    seed_record(&harness, &gmid, IndexState::Pending).await;
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();

    let record = harness.ctx.registry.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::Indexed);
    assert!(record.last_error.is_none());

    // 两个命名向量都写入且维度一致
    let points = harness.index.points.lock().await;
    let point = points.get(&gmid).unwrap();
    assert_eq!(point.text_vector.len(), DIM);
    assert_eq!(point.image_vector.len(), DIM);
    assert_eq!(point.payload.description, "海边日落");
}

#[tokio::test]
async fn test_transient_failure_retries_then_fails() {
    let harness = harness(
        MockEmbedding::with_text_errors(vec![
            EmbeddingError::Transient("503".into()),
            EmbeddingError::Transient("503".into()),
        ]),
        2,
    )
    .await;
    let cancel = CancellationToken::new();
    let gmid = "b".repeat(32);

    seed_record(&harness, &gmid, IndexState::Pending).await;

    // 第一次：瞬时失败，退回thumbnail_ready并计数
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();
    let record = harness.ctx.registry.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::ThumbnailReady);
    assert_eq!(record.index_attempts, 1);
    assert!(record.last_error.is_some());

    // 第二次：达到重试上限，进入failed终态
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();
    let record = harness.ctx.registry.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::Failed);
    assert_eq!(record.index_attempts, 2);
}

#[tokio::test]
async fn test_rejected_failure_is_terminal_immediately() {
    let harness = harness(
        MockEmbedding::with_text_errors(vec![EmbeddingError::Rejected("非法输入".into())]),
        5,
    )
    .await;
    let cancel = CancellationToken::new();
    let gmid = "c".repeat(32);

    seed_record(&harness, &gmid, IndexState::Pending).await;
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();

    let record = harness.ctx.registry.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::Failed);
    // 不可重试错误不走重试计数
    assert_eq!(record.index_attempts, 0);
}

#[tokio::test]
async fn test_reembed_reuses_existing_image_vector() {
    let harness = harness(MockEmbedding::ok(), 5).await;
    let cancel = CancellationToken::new();
    let gmid = "d".repeat(32);

    let record = seed_record(&harness, &gmid, IndexState::ThumbnailReady).await;

    // 预置已索引的点，图像向量带特殊标记
    let mut image_vector = vec![0.0; DIM];
    image_vector[DIM - 1] = 0.5;
    harness
        .index
        .upsert(MediaPoint {
            gmid: gmid.clone(),
            text_vector: MockEmbedding::unit_vector(),
            image_vector: image_vector.clone(),
            payload: PointPayload::from_record(&record),
        })
        .await
        .unwrap();

    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();

    // 图像embedding没有被调用，向量原样保留
    assert_eq!(harness.embedding.image_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.embedding.text_calls.load(Ordering::SeqCst), 1);

    let points = harness.index.points.lock().await;
    assert_eq!(points.get(&gmid).unwrap().image_vector, image_vector);

    let record = harness.ctx.registry.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::Indexed);
}

#[tokio::test]
async fn test_idempotent_on_already_indexed() {
    let harness = harness(MockEmbedding::ok(), 5).await;
    let cancel = CancellationToken::new();
    let gmid = "e".repeat(32);

    seed_record(&harness, &gmid, IndexState::Pending).await;
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();
    let calls_after_first = harness.embedding.text_calls.load(Ordering::SeqCst);

    // 已indexed的记录再次处理是空操作，不会重复调用embedding
    process_task(&harness.ctx, &cancel, &gmid).await.unwrap();
    assert_eq!(
        harness.embedding.text_calls.load(Ordering::SeqCst),
        calls_after_first
    );
    assert_eq!(harness.index.points.lock().await.len(), 1);
}

#[tokio::test]
async fn test_reconcile_recovers_stuck_and_missing_records() {
    let mut harness = harness(MockEmbedding::ok(), 5).await;
    let cancel = CancellationToken::new();

    // 悬挂的 embedding_in_flight
    let stuck = "1".repeat(32);
    seed_record(&harness, &stuck, IndexState::EmbeddingInFlight).await;

    // indexed 且索引中确实有点（先真实跑一遍流水线）
    let healthy = "2".repeat(32);
    seed_record(&harness, &healthy, IndexState::Pending).await;
    process_task(&harness.ctx, &cancel, &healthy).await.unwrap();

    // indexed 但索引中没有点
    let orphan = "3".repeat(32);
    seed_record(&harness, &orphan, IndexState::Indexed).await;

    let enqueued = reconcile_on_startup(&harness.ctx).await.unwrap();
    assert_eq!(enqueued, 2);

    let stuck_record = harness.ctx.registry.get(&stuck).await.unwrap().unwrap();
    assert_eq!(stuck_record.index_state, IndexState::ThumbnailReady);

    let orphan_record = harness.ctx.registry.get(&orphan).await.unwrap().unwrap();
    assert_eq!(orphan_record.index_state, IndexState::ThumbnailReady);

    let healthy_record = harness.ctx.registry.get(&healthy).await.unwrap().unwrap();
    assert_eq!(healthy_record.index_state, IndexState::Indexed);

    // 队列里恰好是被回收的两条
    let mut queued = HashSet::new();
    while let Ok(task) = harness.rx.try_recv() {
        queued.insert(task.gmid);
    }
    assert!(queued.contains(&stuck));
    assert!(queued.contains(&orphan));
    assert!(!queued.contains(&healthy));
}
