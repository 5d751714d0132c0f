/*!
 * embedding 客户端类型定义
 *
 * 失败分类决定流水线的重试行为：Transient/Timeout/RateLimited
 * 会退回 thumbnail_ready 延迟重试，Rejected 与 DimensionMismatch
 * 直接进入 failed 终态。
 */

use async_trait::async_trait;
use thiserror::Error;

/// embedding 调用的失败分类
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// 传输错误或5xx，重试耗尽后仍失败
    #[error("embedding服务暂时不可用: {0}")]
    Transient(String),

    /// 4xx（429除外），不可重试
    #[error("embedding请求被拒绝: {0}")]
    Rejected(String),

    /// 单次调用超过截止时间
    #[error("embedding调用超时")]
    Timeout,

    /// 本地速率限制器在截止时间内未取得许可
    #[error("embedding调用超出速率限制")]
    RateLimited,

    /// 响应向量长度与声明维度不一致
    #[error("向量维度不匹配: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    /// 流水线层面是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Transient(_) | EmbeddingError::Timeout | EmbeddingError::RateLimited
        )
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// 多模态 embedding 服务接口
///
/// 两个方法都返回已做单位归一化的固定维度向量，
/// 余弦相似度因此退化为点积。实现必须可并发使用。
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// 文本向量化。空文本返回零向量，不产生外部调用。
    async fn embed_text(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// 图像向量化，输入为JPEG字节
    async fn embed_image(&self, jpeg_bytes: &[u8]) -> EmbeddingResult<Vec<f32>>;

    /// 声明的向量维度
    fn dimension(&self) -> usize;
}

/// 单位归一化。零向量保持原样（空描述的占位向量）。
pub fn normalize(vector: &mut [f32]) {
    let norm_sq: f32 = vector.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let norm = norm_sq.sqrt();
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}
