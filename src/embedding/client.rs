/*!
 * 多模态 embedding 客户端
 *
 * 对接 DashScope 兼容的多模态向量化服务。文本输入直接传字符串，
 * 图像以 base64 data URL 传入，两个模态各有独立的令牌桶限流。
 * 传输错误、5xx 与 429 按指数退避加抖动重试，重试次数有界；
 * 其余 4xx 视为请求本身有问题，立即失败不重试。
 *
 * 每次响应都按声明维度校验长度并做单位归一化，保证余弦相似度
 * 阈值的语义稳定。
 */

use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::rate_limiter::TokenBucket;
use super::types::{normalize, EmbeddingError, EmbeddingResult, EmbeddingService};
use crate::config::EmbeddingConfig;

/// 重试退避基准
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// 重试退避上限
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// DashScope 兼容客户端
pub struct DashScopeClient {
    http: reqwest::Client,
    config: EmbeddingConfig,
    text_limiter: TokenBucket,
    image_limiter: TokenBucket,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    output: Option<ProviderOutput>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderOutput {
    embeddings: Vec<ProviderEmbedding>,
}

#[derive(Debug, Deserialize)]
struct ProviderEmbedding {
    embedding: Vec<f32>,
}

impl DashScopeClient {
    pub fn new(config: EmbeddingConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.call_timeout())
            .build()?;

        Ok(Self {
            text_limiter: TokenBucket::new(config.text_rate_per_sec),
            image_limiter: TokenBucket::new(config.image_rate_per_sec),
            http,
            config,
        })
    }

    /// embedding 端点
    fn endpoint(&self) -> String {
        format!(
            "{}/services/embeddings/multimodal-embedding/multimodal-embedding",
            self.config.provider_url.trim_end_matches('/')
        )
    }

    /// 服务可达性探测（就绪检查用），任何HTTP响应都算可达
    pub async fn probe_reachable(&self) -> bool {
        match self
            .http
            .get(&self.config.provider_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!("embedding服务探测失败: {}", e);
                false
            }
        }
    }

    /// 带限流与重试的单模态调用
    async fn call_provider(
        &self,
        input: serde_json::Value,
        limiter: &TokenBucket,
    ) -> EmbeddingResult<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.config.model_name,
            "input": { "contents": [input] },
        });

        let mut last_error = EmbeddingError::Transient("未发起任何调用".to_string());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                warn!(
                    "embedding调用重试 {}/{}，{}毫秒后重试",
                    attempt,
                    self.config.max_retries,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            // 每次实际发出的请求都要消耗一个令牌
            limiter.acquire(self.config.call_timeout()).await?;

            let response = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return self.parse_success(resp).await;
                    }

                    let detail = read_error_detail(resp).await;
                    match classify_status(status) {
                        FailureClass::Retryable => {
                            debug!("embedding调用失败（可重试）: {} - {}", status, detail);
                            last_error = EmbeddingError::Transient(format!("{}: {}", status, detail));
                        }
                        FailureClass::Fatal => {
                            error!("embedding请求被拒绝: {} - {}", status, detail);
                            return Err(EmbeddingError::Rejected(format!("{}: {}", status, detail)));
                        }
                    }
                }
                Err(e) if e.is_timeout() => {
                    debug!("embedding调用超时（尝试 {}）", attempt + 1);
                    last_error = EmbeddingError::Timeout;
                }
                Err(e) => {
                    debug!("embedding调用传输错误（尝试 {}）: {}", attempt + 1, e);
                    last_error = EmbeddingError::Transient(e.to_string());
                }
            }
        }

        error!(
            "embedding调用重试耗尽（{}次）: {}",
            self.config.max_retries + 1,
            last_error
        );
        Err(last_error)
    }

    /// 解析成功响应并做维度校验与归一化
    async fn parse_success(&self, resp: reqwest::Response) -> EmbeddingResult<Vec<f32>> {
        let parsed: ProviderResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("响应解析失败: {}", e)))?;

        let mut vector = parsed
            .output
            .and_then(|o| o.embeddings.into_iter().next())
            .map(|e| e.embedding)
            .ok_or_else(|| {
                EmbeddingError::Rejected(format!(
                    "响应缺少embedding数据: {}",
                    parsed.message.unwrap_or_default()
                ))
            })?;

        if vector.len() != self.config.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl EmbeddingService for DashScopeClient {
    async fn embed_text(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        // 空文本返回零向量，不消耗配额
        if text.trim().is_empty() {
            debug!("文本内容为空，返回零向量");
            return Ok(vec![0.0; self.config.dimension]);
        }

        self.call_provider(serde_json::json!({ "text": text.trim() }), &self.text_limiter)
            .await
    }

    async fn embed_image(&self, jpeg_bytes: &[u8]) -> EmbeddingResult<Vec<f32>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(jpeg_bytes);
        let data_url = format!("data:image/jpeg;base64,{}", encoded);

        self.call_provider(serde_json::json!({ "image": data_url }), &self.image_limiter)
            .await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

enum FailureClass {
    Retryable,
    Fatal,
}

/// HTTP状态分类：429与5xx可重试，其余4xx为致命错误
fn classify_status(status: StatusCode) -> FailureClass {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        FailureClass::Retryable
    } else {
        FailureClass::Fatal
    }
}

/// 指数退避加随机抖动，上限30秒
fn backoff_delay(attempt: u32) -> Duration {
    let exp = RETRY_BASE_DELAY.saturating_mul(1u32 << (attempt - 1).min(4));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
    (exp + jitter).min(RETRY_MAX_DELAY)
}

/// 从错误响应体提取 code/message
async fn read_error_detail(resp: reqwest::Response) -> String {
    match resp.json::<ProviderResponse>().await {
        Ok(body) => format!(
            "{} - {}",
            body.code.unwrap_or_else(|| "Unknown".to_string()),
            body.message.unwrap_or_else(|| "未知错误".to_string())
        ),
        Err(_) => "响应体不可解析".to_string(),
    }
}
