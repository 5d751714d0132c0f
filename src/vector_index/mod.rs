// 向量索引模块：Qdrant 双命名向量适配层

pub mod qdrant;
pub mod types;

pub use qdrant::QdrantMediaIndex;
pub use types::{
    IndexStatsInfo, MediaPoint, PointPayload, ScoredMedia, VectorIndexService, VectorSlot,
    IMAGE_VECTOR_NAME, TEXT_VECTOR_NAME,
};
