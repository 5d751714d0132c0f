// 多模态 embedding 客户端模块

pub mod client;
pub mod rate_limiter;
pub mod types;

pub use client::DashScopeClient;
pub use rate_limiter::TokenBucket;
pub use types::{normalize, EmbeddingError, EmbeddingService};
