/*!
 * 核心不变式集成测试
 *
 * 不依赖外部服务：内容存储在临时目录、注册表用内存SQLite。
 */

use std::sync::Arc;

use chrono::Utc;
use famory::media::{derive_gmid, ContentStore, IndexState, MediaRecord, MediaType};
use famory::registry::{DatabaseManager, MediaRecordRepository};

async fn repo() -> MediaRecordRepository {
    let db = DatabaseManager::new_in_memory().await.unwrap();
    MediaRecordRepository::new(Arc::new(db))
}

fn record_for(gmid: &str, store: &ContentStore, stored_path: &str) -> MediaRecord {
    MediaRecord {
        gmid: gmid.to_string(),
        original_name: "beach.jpg".to_string(),
        stored_path: stored_path.to_string(),
        thumbnail_path: store
            .thumbnail_path(gmid, Utc::now())
            .to_string_lossy()
            .to_string(),
        media_type: MediaType::Photo,
        size_bytes: 10,
        width: None,
        height: None,
        duration_ms: None,
        upload_time: Utc::now(),
        description: "海边日落".to_string(),
        index_state: IndexState::Pending,
        index_attempts: 0,
        last_error: None,
    }
}

/// 同一份字节内容重复上传收敛到同一个GMID，注册表中只有一条记录
#[tokio::test]
async fn gmid_determinism_collapses_duplicates() {
    let content = b"identical photo bytes";
    let first = derive_gmid(content);
    let second = derive_gmid(content);
    assert_eq!(first, second);

    let repo = repo().await;
    let tempdir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(tempdir.path()).unwrap();

    let stored = store
        .store(content, "a.jpg", MediaType::Photo, &first, Utc::now())
        .await
        .unwrap();
    let path = stored.stored_path.to_string_lossy().to_string();

    // 两次put同一GMID：最后写入者胜出，记录数不变
    let mut record = record_for(&first, &store, &path);
    repo.put(&record).await.unwrap();
    record.description = "第二次上传的描述".to_string();
    repo.put(&record).await.unwrap();

    let page = repo.list(None, 1, 100).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].description, "第二次上传的描述");
}

/// 删除级联：原始文件、缩略图、注册表记录全部消失
#[tokio::test]
async fn delete_cascade_removes_everything() {
    let repo = repo().await;
    let tempdir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(tempdir.path()).unwrap();

    let content = b"photo to delete";
    let gmid = derive_gmid(content);
    let stored = store
        .store(content, "x.jpg", MediaType::Photo, &gmid, Utc::now())
        .await
        .unwrap();

    // 伪造一张缩略图，验证它也会被删
    if let Some(parent) = stored.thumbnail_path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&stored.thumbnail_path, b"jpeg").unwrap();

    let record = record_for(
        &gmid,
        &store,
        &stored.stored_path.to_string_lossy(),
    );
    repo.put(&record).await.unwrap();

    store
        .delete(
            &stored.stored_path.to_string_lossy(),
            &stored.thumbnail_path.to_string_lossy(),
        )
        .await
        .unwrap();
    assert!(repo.delete(&gmid).await.unwrap());

    assert!(!stored.stored_path.exists());
    assert!(!stored.thumbnail_path.exists());
    assert!(repo.get(&gmid).await.unwrap().is_none());
}

/// 状态机只能沿合法边迁移，CAS拒绝过期前置状态
#[tokio::test]
async fn state_machine_cas_discipline() {
    let repo = repo().await;
    let tempdir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(tempdir.path()).unwrap();
    let gmid = "9".repeat(32);

    repo.put(&record_for(&gmid, &store, "/tmp/x.jpg")).await.unwrap();

    // 正向推进
    assert!(repo
        .transition(&gmid, IndexState::Pending, IndexState::ThumbnailReady, None)
        .await
        .unwrap());
    assert!(repo
        .transition(
            &gmid,
            IndexState::ThumbnailReady,
            IndexState::EmbeddingInFlight,
            None
        )
        .await
        .unwrap());

    // 第二个worker的抢占尝试被CAS拒绝
    assert!(!repo
        .transition(
            &gmid,
            IndexState::ThumbnailReady,
            IndexState::EmbeddingInFlight,
            None
        )
        .await
        .unwrap());

    assert!(repo
        .transition(&gmid, IndexState::EmbeddingInFlight, IndexState::Indexed, None)
        .await
        .unwrap());

    let record = repo.get(&gmid).await.unwrap().unwrap();
    assert_eq!(record.index_state, IndexState::Indexed);
}
