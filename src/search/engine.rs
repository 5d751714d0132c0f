/*!
 * 搜索引擎
 *
 * 三种检索模式，语义确定：
 *
 * - 文搜内容：查询文本向量化后同时在 text_embedding 与
 *   image_embedding 两路召回，按GMID合并取最高分。两路阈值
 *   独立配置（文搜文判别力强，门槛远高于文搜图）。
 * - 图搜内容：上传图片生成内存JPEG预览，向量化后在
 *   image_embedding 一路召回。
 * - 相似检索：直接读取已索引点的图像向量再查询，不重新
 *   向量化；剥掉自身命中。
 *
 * 阈值是运维旋钮：全部来自配置，客户端传入的阈值一律忽略。
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::types::{MatchedModality, MediaSearchResult, SearchError, SearchResponse};
use crate::config::SearchConfig;
use crate::embedding::types::EmbeddingService;
use crate::media::thumbnail;
use crate::vector_index::types::{VectorIndexService, VectorSlot};

/// 结果数上下限
const LIMIT_RANGE: (usize, usize) = (1, 100);

/// 搜索引擎
pub struct SearchEngine {
    embedding: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndexService>,
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(
        embedding: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndexService>,
        config: SearchConfig,
    ) -> Self {
        Self {
            embedding,
            index,
            config,
        }
    }

    fn clamp_limit(&self, limit: Option<usize>) -> usize {
        limit
            .unwrap_or(self.config.default_limit)
            .clamp(LIMIT_RANGE.0, LIMIT_RANGE.1)
    }

    /// 模式A：文本查询，双路召回合并
    pub async fn search_by_text(
        &self,
        query: &str,
        limit: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let limit = self.clamp_limit(limit);

        let query_vector = self.embedding.embed_text(query).await?;

        // 两路召回并行执行；结果是各自search时刻的索引快照
        let (text_hits, image_hits) = tokio::join!(
            self.index.search(
                VectorSlot::Text,
                query_vector.clone(),
                limit,
                self.config.text_to_text_threshold,
                None,
            ),
            self.index.search(
                VectorSlot::Image,
                query_vector,
                limit,
                self.config.text_to_image_threshold,
                None,
            ),
        );
        let text_hits = text_hits.map_err(|e| SearchError::Index(format!("{:#}", e)))?;
        let image_hits = image_hits.map_err(|e| SearchError::Index(format!("{:#}", e)))?;

        debug!(
            "双路召回: 文本模态{}个, 图像模态{}个",
            text_hits.len(),
            image_hits.len()
        );

        // 按GMID合并。同一媒体两路都命中时取更高分：两个模态共享
        // 向量空间但校准不同，取最强信号且不重复计分。
        let mut merged: HashMap<String, MediaSearchResult> = HashMap::new();

        for hit in text_hits {
            merged.insert(
                hit.gmid.clone(),
                MediaSearchResult::from_scored(hit, MatchedModality::Text),
            );
        }

        for hit in image_hits {
            match merged.get_mut(&hit.gmid) {
                Some(existing) => {
                    if hit.score > existing.score {
                        existing.score = hit.score;
                    }
                    existing.matched_modality = MatchedModality::Both;
                }
                None => {
                    merged.insert(
                        hit.gmid.clone(),
                        MediaSearchResult::from_scored(hit, MatchedModality::Image),
                    );
                }
            }
        }

        let mut results: Vec<MediaSearchResult> = merged.into_values().collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);

        let threshold_used = self
            .config
            .text_to_text_threshold
            .min(self.config.text_to_image_threshold);

        info!(
            "文本搜索完成: 查询='{}', 合并后{}个结果",
            query,
            results.len()
        );

        Ok(self.response(query.to_string(), results, start, threshold_used))
    }

    /// 模式B：图搜内容
    pub async fn search_by_image(
        &self,
        image_bytes: &[u8],
        limit: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let limit = self.clamp_limit(limit);

        // 与入库共用一套预览管线：统一到JPEG再向量化
        let preview = thumbnail::encode_preview(image_bytes)
            .map_err(|e| SearchError::Embedding(
                crate::embedding::types::EmbeddingError::Rejected(format!("查询图片不可解码: {}", e)),
            ))?;

        let query_vector = self.embedding.embed_image(&preview).await?;

        let hits = self
            .index
            .search(
                VectorSlot::Image,
                query_vector,
                limit,
                self.config.image_search_threshold,
                None,
            )
            .await
            .map_err(|e| SearchError::Index(format!("{:#}", e)))?;

        let results: Vec<MediaSearchResult> = hits
            .into_iter()
            .map(|h| MediaSearchResult::from_scored(h, MatchedModality::Image))
            .collect();

        info!("图像搜索完成: {}个结果", results.len());

        Ok(self.response(
            "<image>".to_string(),
            results,
            start,
            self.config.image_search_threshold,
        ))
    }

    /// 模式C：相似检索，复用已索引的图像向量
    pub async fn search_similar(
        &self,
        gmid: &str,
        limit: Option<usize>,
    ) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let limit = self.clamp_limit(limit);

        let query_vector = self
            .index
            .fetch_image_vector(gmid)
            .await
            .map_err(|e| SearchError::Index(format!("{:#}", e)))?
            .ok_or_else(|| SearchError::NotIndexed(gmid.to_string()))?;

        // 多取一个名额，容纳即将剥掉的自身命中（分数≈1.0）
        let hits = self
            .index
            .search(
                VectorSlot::Image,
                query_vector,
                limit + 1,
                self.config.image_search_threshold,
                None,
            )
            .await
            .map_err(|e| SearchError::Index(format!("{:#}", e)))?;

        let mut results: Vec<MediaSearchResult> = hits
            .into_iter()
            .filter(|h| h.gmid != gmid)
            .map(|h| MediaSearchResult::from_scored(h, MatchedModality::Image))
            .collect();
        results.truncate(limit);

        info!("相似检索完成: {} -> {}个结果", gmid, results.len());

        Ok(self.response(
            format!("similar:{}", gmid),
            results,
            start,
            self.config.image_search_threshold,
        ))
    }

    fn response(
        &self,
        query: String,
        results: Vec<MediaSearchResult>,
        start: Instant,
        threshold_used: f32,
    ) -> SearchResponse {
        SearchResponse {
            success: true,
            total: results.len(),
            query,
            results,
            took_seconds: start.elapsed().as_secs_f64(),
            threshold_used,
        }
    }
}
