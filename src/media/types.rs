/*!
 * 媒体域类型定义
 *
 * 媒体记录是注册表的核心数据结构，也是向量点payload的来源。
 * 索引状态机的所有状态在这里定义，状态迁移本身由注册表的
 * CAS操作执行。
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 照片支持的扩展名
pub const PHOTO_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".heic", ".webp"];

/// 视频支持的扩展名
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".hevc", ".avi"];

/// 媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl MediaType {
    /// 根据文件扩展名确定媒体类型，不在白名单内返回None
    pub fn from_filename(filename: &str) -> Option<Self> {
        let lower = filename.to_lowercase();
        let ext = match lower.rfind('.') {
            Some(pos) => &lower[pos..],
            None => return None,
        };

        if PHOTO_EXTENSIONS.contains(&ext) {
            Some(MediaType::Photo)
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Some(MediaType::Video)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Photo => "photo",
            MediaType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaType::Photo),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }

    /// 存储子目录名
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaType::Photo => "photos",
            MediaType::Video => "videos",
        }
    }
}

/// 索引状态
///
/// 状态机：pending → thumbnail_ready → embedding_in_flight → indexed，
/// 瞬时失败从 embedding_in_flight 退回 thumbnail_ready 重试，
/// 达到重试上限或不可重试错误进入 failed。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Pending,
    ThumbnailReady,
    EmbeddingInFlight,
    Indexed,
    Failed,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Pending => "pending",
            IndexState::ThumbnailReady => "thumbnail_ready",
            IndexState::EmbeddingInFlight => "embedding_in_flight",
            IndexState::Indexed => "indexed",
            IndexState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IndexState::Pending),
            "thumbnail_ready" => Some(IndexState::ThumbnailReady),
            "embedding_in_flight" => Some(IndexState::EmbeddingInFlight),
            "indexed" => Some(IndexState::Indexed),
            "failed" => Some(IndexState::Failed),
            _ => None,
        }
    }

    /// 是否终态（indexed / failed）
    pub fn is_terminal(&self) -> bool {
        matches!(self, IndexState::Indexed | IndexState::Failed)
    }
}

/// 媒体记录
///
/// 注册表中的一行，gmid为主键。文件系统与向量索引都以注册表
/// 为存在性与状态的权威来源，向量索引只是派生视图。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    /// 32位十六进制全局媒体ID，由文件内容哈希派生
    pub gmid: String,

    /// 用户上传时的原始文件名
    pub original_name: String,

    /// 原始文件的绝对路径
    pub stored_path: String,

    /// 缩略图的绝对路径（恒为JPEG）
    pub thumbnail_path: String,

    /// 媒体类型
    pub media_type: MediaType,

    /// 文件大小（字节）
    pub size_bytes: u64,

    /// 图片宽度（仅可解码的照片）
    pub width: Option<u32>,

    /// 图片高度（仅可解码的照片）
    pub height: Option<u32>,

    /// 视频时长（毫秒）
    pub duration_ms: Option<u64>,

    /// 上传时间
    pub upload_time: DateTime<Utc>,

    /// 用户可编辑的描述文本，默认为原始文件名去掉扩展名
    pub description: String,

    /// 索引状态
    pub index_state: IndexState,

    /// 已尝试的embedding次数
    pub index_attempts: u32,

    /// 最近一次失败原因
    pub last_error: Option<String>,
}

impl MediaRecord {
    /// 原始文件名去掉扩展名，作为默认描述
    pub fn default_description(original_name: &str) -> String {
        match original_name.rfind('.') {
            Some(pos) if pos > 0 => original_name[..pos].to_string(),
            _ => original_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_filename() {
        assert_eq!(MediaType::from_filename("IMG_0001.JPG"), Some(MediaType::Photo));
        assert_eq!(MediaType::from_filename("照片.heic"), Some(MediaType::Photo));
        assert_eq!(MediaType::from_filename("clip.mov"), Some(MediaType::Video));
        assert_eq!(MediaType::from_filename("notes.txt"), None);
        assert_eq!(MediaType::from_filename("noext"), None);
    }

    #[test]
    fn test_index_state_roundtrip() {
        for state in [
            IndexState::Pending,
            IndexState::ThumbnailReady,
            IndexState::EmbeddingInFlight,
            IndexState::Indexed,
            IndexState::Failed,
        ] {
            assert_eq!(IndexState::parse(state.as_str()), Some(state));
        }
        assert_eq!(IndexState::parse("unknown"), None);
    }

    #[test]
    fn test_default_description_strips_extension() {
        assert_eq!(MediaRecord::default_description("beach.jpg"), "beach");
        assert_eq!(MediaRecord::default_description(".hidden"), ".hidden");
        assert_eq!(MediaRecord::default_description("noext"), "noext");
    }
}
