/*!
 * 服务配置类型定义
 *
 * 单一配置对象，启动时加载一次后以不可变引用传递。
 * 用户通过环境变量覆盖默认值；技术细节参数（批处理、队列容量等）
 * 保持内部默认，不暴露给部署界面。
 */

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 服务完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppConfig {
    /// HTTP 监听地址
    pub bind_addr: String,

    /// 媒体内容根目录（原始文件、缩略图、注册表都在其下）
    pub content_root: PathBuf,

    /// 单文件上传大小上限（字节）
    pub max_file_size: u64,

    /// 启动时向量数据库不可达是否视为致命错误
    pub require_index_on_start: bool,

    pub vector_db: VectorDbConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub pipeline: PipelineConfig,
    pub auth: AuthConfig,
}

/// 向量数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct VectorDbConfig {
    /// Qdrant gRPC 地址
    pub url: String,

    /// API密钥（可选）
    pub api_key: Option<String>,

    /// 向量集合名称
    pub collection_name: String,

    /// 维度不匹配时是否删除并重建集合（破坏性操作，需显式开启）
    pub fix_dimension_on_mismatch: bool,
}

/// 多模态 embedding 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct EmbeddingConfig {
    /// 服务端点（DashScope 兼容）
    pub provider_url: String,

    /// API密钥
    pub api_key: String,

    /// 模型名称
    pub model_name: String,

    /// 声明的向量维度，每次响应都会按此校验
    pub dimension: usize,

    /// 文本调用速率（次/秒）
    pub text_rate_per_sec: f64,

    /// 图像调用速率（次/秒）
    pub image_rate_per_sec: f64,

    /// 单次调用超时（秒）
    pub call_timeout_secs: u64,

    /// 单次调用内的传输层重试次数上限
    pub max_retries: u32,
}

/// 搜索阈值配置
///
/// 阈值是运维旋钮而非用户参数：接口层忽略客户端传入的阈值，
/// 始终使用这里配置的值。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SearchConfig {
    /// 文本搜描述的阈值（文搜文判别力强，门槛高）
    pub text_to_text_threshold: f32,

    /// 文本搜图像的阈值
    pub text_to_image_threshold: f32,

    /// 图搜图的阈值
    pub image_search_threshold: f32,

    /// 默认返回结果数
    pub default_limit: usize,
}

/// 入库流水线配置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct PipelineConfig {
    /// 并发worker数量
    pub worker_count: usize,

    /// 单条记录embedding重试次数上限
    pub max_embedding_attempts: u32,

    /// 待处理队列容量，超出后新上传返回503
    pub queue_capacity: usize,
}

/// 认证配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AuthConfig {
    /// JWT 签名密钥，生产环境必须修改
    pub jwt_secret: String,

    /// 单账户用户名
    pub default_user: String,

    /// 单账户密码
    pub default_password: String,

    /// 令牌有效期（分钟）
    pub token_expire_minutes: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            content_root: PathBuf::from("/media"),
            max_file_size: 500 * 1024 * 1024,
            require_index_on_start: false,
            vector_db: VectorDbConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            pipeline: PipelineConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:6334".to_string(),
            api_key: None,
            collection_name: "media_embeddings".to_string(),
            fix_dimension_on_mismatch: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://dashscope.aliyuncs.com/api/v1".to_string(),
            api_key: String::new(),
            model_name: "multimodal-embedding-v1".to_string(),
            dimension: 1024,
            text_rate_per_sec: 10.0,
            image_rate_per_sec: 5.0,
            call_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            text_to_text_threshold: 0.8,
            text_to_image_threshold: 0.2,
            image_search_threshold: 0.5,
            default_limit: 20,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_embedding_attempts: 5,
            queue_capacity: 1024,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            default_user: "family".to_string(),
            default_password: "123456".to_string(),
            token_expire_minutes: 60 * 24 * 7,
        }
    }
}

impl EmbeddingConfig {
    /// 单次调用超时
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
