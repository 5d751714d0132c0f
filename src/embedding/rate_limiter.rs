/*!
 * 速率限制器
 *
 * 每个模态一个令牌桶（文本、图像调用配额独立）。
 * acquire 在截止时间内阻塞等待令牌，而不是直接丢弃请求；
 * 截止时间内等不到令牌才返回 RateLimited。
 */

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use super::types::EmbeddingError;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// 令牌桶
pub struct TokenBucket {
    /// 每秒补充的令牌数
    rate: f64,
    /// 桶容量（突发上限），默认等于速率
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64) -> Self {
        let burst = rate_per_sec.max(1.0);
        Self {
            rate: rate_per_sec,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 在截止时间内获取一个令牌
    pub async fn acquire(&self, deadline: Duration) -> Result<(), EmbeddingError> {
        let deadline = Instant::now() + deadline;

        loop {
            let wait = {
                let mut state = self.state.lock().await;

                // 按流逝时间补充令牌
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            if Instant::now() + wait > deadline {
                debug!("速率限制器在截止时间内无法取得令牌");
                return Err(EmbeddingError::RateLimited);
            }

            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_then_block() {
        tokio::time::pause();
        let bucket = TokenBucket::new(2.0);

        // 突发额度内立即通过
        bucket.acquire(Duration::from_secs(1)).await.unwrap();
        bucket.acquire(Duration::from_secs(1)).await.unwrap();

        // 第三个需要等待补充，截止时间充足时成功
        bucket.acquire(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_exceeded_returns_rate_limited() {
        tokio::time::pause();
        let bucket = TokenBucket::new(1.0);

        bucket.acquire(Duration::from_secs(1)).await.unwrap();

        // 需等约1秒，截止时间只有1毫秒
        let err = bucket.acquire(Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RateLimited));
    }

    #[tokio::test]
    async fn test_refill_restores_tokens() {
        tokio::time::pause();
        let bucket = TokenBucket::new(5.0);

        for _ in 0..5 {
            bucket.acquire(Duration::from_secs(1)).await.unwrap();
        }

        // 推进2秒后桶被补满（不超过突发上限）
        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..5 {
            bucket.acquire(Duration::from_millis(10)).await.unwrap();
        }
    }
}
