/*!
 * 内容存储
 *
 * 按上传日期分区的文件系统布局：
 *
 * ```text
 * <root>/photos/YYYY-MM-DD/<stem>_<unix_ms>.<ext>
 * <root>/videos/YYYY-MM-DD/<stem>_<unix_ms>.<ext>
 * <root>/thumbnails/YYYY-MM-DD/<gmid>.jpg
 * ```
 *
 * 写入采用 tmp + fsync + rename 保证原子性；毫秒时间戳后缀
 * 使同日冲突几乎不可能发生，极端撞名时追加4位十六进制计数。
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::types::MediaType;

/// 已落盘文件的信息
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// 原始文件的绝对路径
    pub stored_path: PathBuf,
    /// 预定的缩略图绝对路径（此时尚未生成）
    pub thumbnail_path: PathBuf,
}

/// 内容存储服务
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// 打开内容根目录，确保子目录结构存在
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        for sub in ["photos", "videos", "thumbnails", "registry"] {
            let dir = root.join(sub);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("创建目录失败: {}", dir.display()))?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 注册表数据库文件路径
    pub fn registry_db_path(&self) -> PathBuf {
        self.root.join("registry").join("registry.db")
    }

    /// 保存上传内容，返回落盘路径与预定缩略图路径
    pub async fn store(
        &self,
        content: &[u8],
        original_name: &str,
        media_type: MediaType,
        gmid: &str,
        upload_time: DateTime<Utc>,
    ) -> Result<StoredFile> {
        let date_dir = upload_time.format("%Y-%m-%d").to_string();
        let target_dir = self.root.join(media_type.dir_name()).join(&date_dir);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("创建日期目录失败: {}", target_dir.display()))?;

        let (stem, ext) = split_name(original_name);
        let ts_ms = upload_time.timestamp_millis();

        // 毫秒时间戳后缀，撞名时追加计数
        let mut stored_path = target_dir.join(format!("{}_{}{}", stem, ts_ms, ext));
        let mut counter: u16 = 0;
        while tokio::fs::try_exists(&stored_path).await.unwrap_or(false) {
            counter = counter.wrapping_add(1);
            stored_path = target_dir.join(format!("{}_{}_{:04x}{}", stem, ts_ms, counter, ext));
        }

        write_atomic(&stored_path, content).await?;

        tracing::info!(
            "媒体文件已保存: {} ({} 字节)",
            stored_path.display(),
            content.len()
        );

        Ok(StoredFile {
            stored_path,
            thumbnail_path: self.thumbnail_path(gmid, upload_time),
        })
    }

    /// 缩略图路径，恒为JPEG
    pub fn thumbnail_path(&self, gmid: &str, upload_time: DateTime<Utc>) -> PathBuf {
        self.root
            .join("thumbnails")
            .join(upload_time.format("%Y-%m-%d").to_string())
            .join(format!("{}.jpg", gmid))
    }

    /// 读取已存储的文件内容
    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Vec<u8>> {
        let path = path.as_ref();
        tokio::fs::read(path)
            .await
            .with_context(|| format!("读取文件失败: {}", path.display()))
    }

    /// 删除原始文件与缩略图，文件不存在时静默忽略
    pub async fn delete(&self, stored_path: &str, thumbnail_path: &str) -> Result<()> {
        for path in [stored_path, thumbnail_path] {
            match tokio::fs::remove_file(path).await {
                Ok(_) => tracing::info!("已删除文件: {}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("删除文件失败: {}", path));
                }
            }
        }
        Ok(())
    }
}

/// 原子写入：先写入 <path>.tmp 并fsync，再rename到最终位置
async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("创建临时文件失败: {}", tmp_path.display()))?;
    file.write_all(content).await.context("写入临时文件失败")?;
    file.sync_all().await.context("fsync失败")?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("重命名到 {} 失败", path.display()))?;

    Ok(())
}

/// 拆分文件名为（主干, 含点扩展名）
fn split_name(name: &str) -> (String, String) {
    // 去掉可能携带的路径分隔符，只保留文件名本身
    let name = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    match name.rfind('.') {
        Some(pos) if pos > 0 => (name[..pos].to_string(), name[pos..].to_lowercase()),
        _ => (name.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("beach.JPG"),
            ("beach".to_string(), ".jpg".to_string())
        );
        assert_eq!(split_name("noext"), ("noext".to_string(), String::new()));
        assert_eq!(
            split_name("dir/evil.png"),
            ("evil".to_string(), ".png".to_string())
        );
    }

    #[tokio::test]
    async fn test_store_layout_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let upload_time = "2024-06-01T08:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let stored = store
            .store(b"jpeg-bytes", "beach.jpg", MediaType::Photo, "a".repeat(32).as_str(), upload_time)
            .await
            .unwrap();

        // 日期分区布局
        let rel = stored.stored_path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<_> = rel.components().map(|c| c.as_os_str().to_string_lossy().to_string()).collect();
        assert_eq!(parts[0], "photos");
        assert_eq!(parts[1], "2024-06-01");
        assert!(parts[2].starts_with("beach_") && parts[2].ends_with(".jpg"));

        let content = store.read(&stored.stored_path).await.unwrap();
        assert_eq!(content, b"jpeg-bytes");

        // 缩略图路径按gmid命名且为jpg
        let thumb = stored.thumbnail_path.to_string_lossy().to_string();
        assert!(thumb.contains("thumbnails"));
        assert!(thumb.ends_with(&format!("{}.jpg", "a".repeat(32))));
    }

    #[tokio::test]
    async fn test_store_collision_gets_counter_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let upload_time = "2024-06-01T08:30:00Z".parse::<DateTime<Utc>>().unwrap();

        let first = store
            .store(b"one", "x.jpg", MediaType::Photo, "1".repeat(32).as_str(), upload_time)
            .await
            .unwrap();
        let second = store
            .store(b"two", "x.jpg", MediaType::Photo, "2".repeat(32).as_str(), upload_time)
            .await
            .unwrap();

        assert_ne!(first.stored_path, second.stored_path);
        assert!(second
            .stored_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("_0001"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let upload_time = Utc::now();

        let stored = store
            .store(b"bytes", "a.png", MediaType::Photo, "3".repeat(32).as_str(), upload_time)
            .await
            .unwrap();

        let stored_str = stored.stored_path.to_string_lossy().to_string();
        let thumb_str = stored.thumbnail_path.to_string_lossy().to_string();

        store.delete(&stored_str, &thumb_str).await.unwrap();
        assert!(!stored.stored_path.exists());
        // 再删一次不应报错
        store.delete(&stored_str, &thumb_str).await.unwrap();
    }
}
