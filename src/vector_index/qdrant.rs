/*!
 * Qdrant数据库集成模块
 *
 * 提供媒体向量的存储与检索。集合 media_embeddings 中每个点
 * 携带 text_embedding 与 image_embedding 两个命名向量，
 * 余弦距离，payload为媒体元数据。
 *
 * 维度不匹配属于破坏性场景：默认拒绝启动，只有配置显式允许时
 * 才删除并重建集合。
 */

use anyhow::{bail, ensure, Context, Result};
use qdrant_client::qdrant::{
    vectors_config::Config as VectorsConfigVariant, vectors_output::VectorsOptions, Condition,
    CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, GetPointsBuilder, PointId,
    PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder, VectorParamsMap, VectorsConfig,
};
use qdrant_client::Qdrant;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::types::{
    IndexStatsInfo, MediaPoint, PointPayload, ScoredMedia, VectorIndexService, VectorSlot,
    IMAGE_VECTOR_NAME, TEXT_VECTOR_NAME,
};
use crate::config::VectorDbConfig;
use crate::media::types::MediaType;
use crate::utils::error::AppResult;

/// Qdrant媒体索引实现
pub struct QdrantMediaIndex {
    client: Qdrant,
    config: VectorDbConfig,
    dimension: usize,
    fix_dimension_on_mismatch: bool,
}

impl QdrantMediaIndex {
    /// 创建客户端。此处只做端点校验，连接测试由调用方在启动流程中
    /// 显式执行（可达性决定退出码）。
    pub fn new(config: VectorDbConfig, dimension: usize) -> Result<Self> {
        tracing::info!("正在连接Qdrant数据库: {}", config.url);

        Self::validate_endpoint(&config.url)?;

        let mut builder = Qdrant::from_url(&config.url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        builder = builder.timeout(Duration::from_secs(30));

        let client = builder.build().context("创建Qdrant客户端失败")?;

        let fix_dimension_on_mismatch = config.fix_dimension_on_mismatch;
        Ok(Self {
            client,
            config,
            dimension,
            fix_dimension_on_mismatch,
        })
    }

    /// 通过获取集合列表测试连接
    pub async fn test_connection(&self) -> Result<()> {
        self.client
            .list_collections()
            .await
            .context("无法连接到Qdrant数据库")?;
        Ok(())
    }

    /// 校验配置的端点，确保指向gRPC端口
    fn validate_endpoint(raw_url: &str) -> Result<()> {
        let url = Url::parse(raw_url).with_context(|| format!("无法解析Qdrant地址: {}", raw_url))?;

        if url.port_or_known_default() == Some(6333) {
            bail!(
                "检测到将gRPC客户端连接到REST端口 6333。请将端口改为 6334，例如 http://localhost:6334"
            );
        }

        Ok(())
    }

    /// GMID（32位十六进制）映射为Qdrant点ID（UUID形式）
    fn point_id(gmid: &str) -> Result<PointId> {
        let uuid = Uuid::parse_str(gmid)
            .with_context(|| format!("GMID无法映射为点ID: {}", gmid))?;
        Ok(PointId::from(uuid.to_string()))
    }

    /// 创建新集合：两个命名向量槽位，同维度，余弦距离
    async fn create_collection(&self) -> Result<()> {
        let mut map = HashMap::new();
        for name in [TEXT_VECTOR_NAME, IMAGE_VECTOR_NAME] {
            map.insert(
                name.to_string(),
                VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine)
                    .on_disk(true)
                    .build(),
            );
        }

        let vectors_config = VectorsConfig {
            config: Some(VectorsConfigVariant::ParamsMap(VectorParamsMap { map })),
        };

        let request = CreateCollectionBuilder::new(&self.config.collection_name)
            .vectors_config(vectors_config)
            .timeout(60)
            .build();

        self.client
            .create_collection(request)
            .await
            .context("创建Qdrant集合失败")?;

        tracing::info!(
            "成功创建Qdrant集合: {} (维度 {})",
            self.config.collection_name,
            self.dimension
        );
        Ok(())
    }

    /// 读取现有集合的向量维度
    async fn existing_dimension(&self) -> Result<Option<u64>> {
        let info = self
            .client
            .collection_info(&self.config.collection_name)
            .await
            .context("获取集合信息失败")?;

        let params = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);

        match params {
            Some(VectorsConfigVariant::ParamsMap(map)) => {
                Ok(map.map.get(TEXT_VECTOR_NAME).map(|p| p.size))
            }
            // 单向量配置说明集合不是本服务创建的，按结构不匹配处理
            Some(VectorsConfigVariant::Params(_)) => Ok(Some(0)),
            None => Ok(None),
        }
    }

    /// payload构建
    fn build_payload(payload: &PointPayload) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("gmid".to_string(), Value::from(payload.gmid.clone()));
        map.insert(
            "original_name".to_string(),
            Value::from(payload.original_name.clone()),
        );
        map.insert(
            "stored_path".to_string(),
            Value::from(payload.stored_path.clone()),
        );
        map.insert(
            "thumbnail_path".to_string(),
            Value::from(payload.thumbnail_path.clone()),
        );
        map.insert(
            "media_type".to_string(),
            Value::from(payload.media_type.as_str().to_string()),
        );
        map.insert(
            "size_bytes".to_string(),
            Value::from(payload.size_bytes as i64),
        );
        if let Some(width) = payload.width {
            map.insert("width".to_string(), Value::from(width as i64));
        }
        if let Some(height) = payload.height {
            map.insert("height".to_string(), Value::from(height as i64));
        }
        if let Some(duration_ms) = payload.duration_ms {
            map.insert("duration_ms".to_string(), Value::from(duration_ms as i64));
        }
        map.insert(
            "upload_time".to_string(),
            Value::from(payload.upload_time.clone()),
        );
        map.insert(
            "description".to_string(),
            Value::from(payload.description.clone()),
        );
        map.insert(
            "schema_version".to_string(),
            Value::from(payload.schema_version.clone()),
        );
        map
    }

    /// 从payload还原元数据
    fn extract_payload(payload: &HashMap<String, Value>) -> Result<PointPayload> {
        let media_type_raw = extract_string(payload, "media_type")?;
        let media_type = MediaType::parse(&media_type_raw)
            .ok_or_else(|| anyhow::anyhow!("payload中的媒体类型无效: {}", media_type_raw))?;

        Ok(PointPayload {
            gmid: extract_string(payload, "gmid")?,
            original_name: extract_string(payload, "original_name")?,
            stored_path: extract_string(payload, "stored_path")?,
            thumbnail_path: extract_string(payload, "thumbnail_path")?,
            media_type,
            size_bytes: extract_integer(payload, "size_bytes")? as u64,
            width: extract_optional_integer(payload, "width").map(|v| v as u32),
            height: extract_optional_integer(payload, "height").map(|v| v as u32),
            duration_ms: extract_optional_integer(payload, "duration_ms").map(|v| v as u64),
            upload_time: extract_string(payload, "upload_time")?,
            description: extract_string(payload, "description")?,
            schema_version: extract_string(payload, "schema_version")
                .unwrap_or_else(|_| "1.0".to_string()),
        })
    }
}

#[async_trait::async_trait]
impl VectorIndexService for QdrantMediaIndex {
    async fn ensure_collection(&self) -> AppResult<()> {
        let collection_name = &self.config.collection_name;

        let collections = self
            .client
            .list_collections()
            .await
            .context("获取集合列表失败")?;
        let exists = collections
            .collections
            .iter()
            .any(|c| c.name == *collection_name);

        if !exists {
            tracing::info!("创建新集合: {}", collection_name);
            return self.create_collection().await;
        }

        match self.existing_dimension().await? {
            Some(size) if size == self.dimension as u64 => {
                tracing::info!("集合 '{}' 已存在，维度验证通过", collection_name);
                Ok(())
            }
            Some(size) => {
                if !self.fix_dimension_on_mismatch {
                    bail!(
                        "集合 '{}' 维度不匹配: 期望 {}, 实际 {}。\
                         如需删除并重建集合（不可逆），请设置 FIX_DIMENSION_ON_MISMATCH=true",
                        collection_name,
                        self.dimension,
                        size
                    );
                }

                tracing::warn!(
                    "集合 '{}' 维度不匹配（期望 {}, 实际 {}），即将删除并重建。该操作不可逆，所有已索引向量将丢失！",
                    collection_name,
                    self.dimension,
                    size
                );

                self.client
                    .delete_collection(collection_name)
                    .await
                    .context("删除旧集合失败")?;
                self.create_collection().await?;
                Ok(())
            }
            None => {
                tracing::warn!("集合 '{}' 配置不可读，重新创建", collection_name);
                let _ = self.client.delete_collection(collection_name).await;
                self.create_collection().await?;
                Ok(())
            }
        }
    }

    async fn upsert(&self, point: MediaPoint) -> AppResult<()> {
        ensure!(
            point.text_vector.len() == self.dimension
                && point.image_vector.len() == self.dimension,
            "向量维度不匹配: 期望 {}, 实际 text={} image={}",
            self.dimension,
            point.text_vector.len(),
            point.image_vector.len()
        );

        let mut vectors = HashMap::new();
        vectors.insert(TEXT_VECTOR_NAME.to_string(), point.text_vector);
        vectors.insert(IMAGE_VECTOR_NAME.to_string(), point.image_vector);

        let payload = Self::build_payload(&point.payload);
        let point_struct = PointStruct::new(Self::point_id(&point.gmid)?, vectors, payload);

        let request = UpsertPointsBuilder::new(&self.config.collection_name, vec![point_struct])
            .wait(true)
            .build();

        self.client
            .upsert_points(request)
            .await
            .context("执行向量upsert操作失败")?;

        tracing::debug!("向量点已写入: {}", point.gmid);
        Ok(())
    }

    async fn search(
        &self,
        slot: VectorSlot,
        query_vector: Vec<f32>,
        limit: usize,
        score_threshold: f32,
        media_type: Option<MediaType>,
    ) -> AppResult<Vec<ScoredMedia>> {
        ensure!(
            query_vector.len() == self.dimension,
            "查询向量维度不匹配: 期望 {}, 实际 {}",
            self.dimension,
            query_vector.len()
        );

        let mut builder =
            SearchPointsBuilder::new(&self.config.collection_name, query_vector, limit as u64)
                .vector_name(slot.name())
                .score_threshold(score_threshold)
                .with_payload(true);

        if let Some(mt) = media_type {
            builder = builder.filter(Filter::must([Condition::matches(
                "media_type",
                mt.as_str().to_string(),
            )]));
        }

        let response = self
            .client
            .search_points(builder.build())
            .await
            .context("Qdrant向量搜索失败")?;

        let mut results = Vec::with_capacity(response.result.len());
        for hit in response.result {
            let payload = Self::extract_payload(&hit.payload)
                .context("搜索结果payload解析失败")?;
            results.push(ScoredMedia {
                gmid: payload.gmid.clone(),
                score: hit.score,
                payload,
            });
        }

        // Qdrant已按分数排序，这里兜底保证降序
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        tracing::debug!(
            "向量搜索完成: 槽位={}, 返回{}个结果 (阈值 {})",
            slot.name(),
            results.len(),
            score_threshold
        );

        Ok(results)
    }

    async fn delete(&self, gmid: &str) -> AppResult<()> {
        let request = DeletePointsBuilder::new(&self.config.collection_name)
            .points(PointsIdsList {
                ids: vec![Self::point_id(gmid)?],
            })
            .wait(true)
            .build();

        self.client
            .delete_points(request)
            .await
            .context("删除向量点失败")?;

        tracing::info!("已删除向量点: {}", gmid);
        Ok(())
    }

    async fn stats(&self) -> AppResult<IndexStatsInfo> {
        let info = self
            .client
            .collection_info(&self.config.collection_name)
            .await
            .context("获取集合信息失败")?;

        let point_count = info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0);

        Ok(IndexStatsInfo {
            point_count,
            dimension: self.dimension,
        })
    }

    async fn fetch_image_vector(&self, gmid: &str) -> AppResult<Option<Vec<f32>>> {
        let request = GetPointsBuilder::new(
            &self.config.collection_name,
            vec![Self::point_id(gmid)?],
        )
        .with_vectors(true)
        .with_payload(false)
        .build();

        let response = self
            .client
            .get_points(request)
            .await
            .context("读取向量点失败")?;

        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };

        let vector = point
            .vectors
            .and_then(|v| v.vectors_options)
            .and_then(|options| match options {
                VectorsOptions::Vectors(named) => named
                    .vectors
                    .get(IMAGE_VECTOR_NAME)
                    .map(|v| v.data.clone()),
                // 单向量点不应出现在本集合中
                VectorsOptions::Vector(_) => None,
            });

        Ok(vector)
    }

    async fn existing_gmids(&self, gmids: &[String]) -> AppResult<HashSet<String>> {
        if gmids.is_empty() {
            return Ok(HashSet::new());
        }

        let ids = gmids
            .iter()
            .map(|g| Self::point_id(g))
            .collect::<Result<Vec<_>>>()?;

        let request = GetPointsBuilder::new(&self.config.collection_name, ids)
            .with_vectors(false)
            .with_payload(true)
            .build();

        let response = self
            .client
            .get_points(request)
            .await
            .context("批量读取向量点失败")?;

        let mut found = HashSet::new();
        for point in response.result {
            if let Ok(gmid) = extract_string(&point.payload, "gmid") {
                found.insert(gmid);
            }
        }

        Ok(found)
    }
}

/// 从payload中提取字符串字段
fn extract_string(payload: &HashMap<String, Value>, field: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("缺少或无效的字段: {}", field))
}

/// 从payload中提取整数字段
fn extract_integer(payload: &HashMap<String, Value>, field: &str) -> Result<i64> {
    payload
        .get(field)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| anyhow::anyhow!("缺少或无效的整数字段: {}", field))
}

fn extract_optional_integer(payload: &HashMap<String, Value>, field: &str) -> Option<i64> {
    payload.get(field).and_then(|v| v.as_integer())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint_rejects_rest_port() {
        assert!(QdrantMediaIndex::validate_endpoint("http://localhost:6333").is_err());
        assert!(QdrantMediaIndex::validate_endpoint("http://localhost:6334").is_ok());
        assert!(QdrantMediaIndex::validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_point_id_from_gmid() {
        let gmid = "0123456789abcdef0123456789abcdef";
        let id = QdrantMediaIndex::point_id(gmid).unwrap();
        // UUID展开形式仍对应同一个GMID
        match id.point_id_options {
            Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => {
                assert_eq!(u.replace('-', ""), gmid);
            }
            other => panic!("意外的点ID形式: {:?}", other),
        }

        assert!(QdrantMediaIndex::point_id("not-hex").is_err());
    }

    #[test]
    fn test_payload_roundtrip() {
        let payload = PointPayload {
            gmid: "a".repeat(32),
            original_name: "beach.jpg".to_string(),
            stored_path: "/media/photos/2024-06-01/beach_1.jpg".to_string(),
            thumbnail_path: "/media/thumbnails/2024-06-01/a.jpg".to_string(),
            media_type: MediaType::Photo,
            size_bytes: 2048,
            width: Some(800),
            height: Some(600),
            duration_ms: None,
            upload_time: "2024-06-01T08:00:00+00:00".to_string(),
            description: "海边日落".to_string(),
            schema_version: "1.0".to_string(),
        };

        let map = QdrantMediaIndex::build_payload(&payload);
        let restored = QdrantMediaIndex::extract_payload(&map).unwrap();

        assert_eq!(restored.gmid, payload.gmid);
        assert_eq!(restored.media_type, MediaType::Photo);
        assert_eq!(restored.width, Some(800));
        assert_eq!(restored.duration_ms, None);
        assert_eq!(restored.description, "海边日落");
    }
}
