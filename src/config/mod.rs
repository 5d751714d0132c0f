// 配置系统模块

pub mod loader;
pub mod types;

pub use loader::load_config;
pub use types::{
    AppConfig, AuthConfig, EmbeddingConfig, PipelineConfig, SearchConfig, VectorDbConfig,
};
