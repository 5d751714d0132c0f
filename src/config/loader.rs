/*!
 * 配置加载
 *
 * 从环境变量构建 AppConfig 并做启动前校验。
 * 变量名与原部署文档保持一致，未设置的项使用默认值。
 */

use anyhow::{ensure, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

use super::types::AppConfig;

/// 读取并解析单个环境变量，未设置时返回None，解析失败时报错
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow::anyhow!("环境变量 {} 解析失败: {}", key, e))?;
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// 从环境变量加载完整配置
pub fn load_config() -> Result<AppConfig> {
    let mut config = AppConfig::default();

    if let Some(addr) = env_string("BIND_ADDR") {
        config.bind_addr = addr;
    }
    if let Some(root) = env_string("CONTENT_ROOT") {
        config.content_root = PathBuf::from(root);
    }
    if let Some(v) = env_parse::<u64>("MAX_FILE_SIZE")? {
        config.max_file_size = v;
    }
    if let Some(v) = env_parse::<bool>("REQUIRE_INDEX_ON_START")? {
        config.require_index_on_start = v;
    }

    // 向量数据库
    if let Some(url) = env_string("VECTOR_DB_URL") {
        config.vector_db.url = url;
    }
    config.vector_db.api_key = env_string("VECTOR_DB_API_KEY");
    if let Some(v) = env_parse::<bool>("FIX_DIMENSION_ON_MISMATCH")? {
        config.vector_db.fix_dimension_on_mismatch = v;
    }

    // embedding 服务
    if let Some(url) = env_string("EMBEDDING_PROVIDER_URL") {
        config.embedding.provider_url = url;
    }
    if let Some(key) = env_string("EMBEDDING_PROVIDER_KEY") {
        config.embedding.api_key = key;
    }
    if let Some(model) = env_string("EMBEDDING_MODEL") {
        config.embedding.model_name = model;
    }
    if let Some(v) = env_parse::<usize>("EMBEDDING_DIM")? {
        config.embedding.dimension = v;
    }
    if let Some(v) = env_parse::<f64>("TEXT_RATE_PER_SEC")? {
        config.embedding.text_rate_per_sec = v;
    }
    if let Some(v) = env_parse::<f64>("IMAGE_RATE_PER_SEC")? {
        config.embedding.image_rate_per_sec = v;
    }
    if let Some(v) = env_parse::<u64>("EMBEDDING_CALL_TIMEOUT_SECS")? {
        config.embedding.call_timeout_secs = v;
    }

    // 搜索阈值
    if let Some(v) = env_parse::<f32>("TEXT_TO_TEXT_THRESHOLD")? {
        config.search.text_to_text_threshold = v;
    }
    if let Some(v) = env_parse::<f32>("TEXT_TO_IMAGE_THRESHOLD")? {
        config.search.text_to_image_threshold = v;
    }
    if let Some(v) = env_parse::<f32>("IMAGE_SEARCH_THRESHOLD")? {
        config.search.image_search_threshold = v;
    }

    // 流水线
    if let Some(v) = env_parse::<usize>("WORKER_COUNT")? {
        config.pipeline.worker_count = v;
    }
    if let Some(v) = env_parse::<u32>("MAX_EMBEDDING_ATTEMPTS")? {
        config.pipeline.max_embedding_attempts = v;
    }

    // 认证
    if let Some(secret) = env_string("JWT_SECRET") {
        config.auth.jwt_secret = secret;
    }
    if let Some(user) = env_string("DEFAULT_USER") {
        config.auth.default_user = user;
    }
    if let Some(password) = env_string("DEFAULT_PASSWORD") {
        config.auth.default_password = password;
    }

    validate(&config).context("配置校验失败")?;

    Ok(config)
}

/// 配置合法性校验
fn validate(config: &AppConfig) -> Result<()> {
    ensure!(
        config.pipeline.worker_count > 0,
        "WORKER_COUNT 必须大于0"
    );
    ensure!(
        config.embedding.dimension > 0,
        "EMBEDDING_DIM 必须大于0"
    );
    ensure!(
        config.embedding.text_rate_per_sec > 0.0 && config.embedding.image_rate_per_sec > 0.0,
        "embedding 速率必须大于0"
    );

    for (name, value) in [
        ("TEXT_TO_TEXT_THRESHOLD", config.search.text_to_text_threshold),
        ("TEXT_TO_IMAGE_THRESHOLD", config.search.text_to_image_threshold),
        ("IMAGE_SEARCH_THRESHOLD", config.search.image_search_threshold),
    ] {
        ensure!(
            (-1.0..=1.0).contains(&value),
            "{} 必须在 [-1, 1] 区间内，当前为 {}",
            name,
            value
        );
    }

    ensure!(config.max_file_size > 0, "MAX_FILE_SIZE 必须大于0");

    Ok(())
}
