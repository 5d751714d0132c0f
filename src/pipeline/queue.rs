/*!
 * 入库任务队列
 *
 * 有界mpsc队列。上传处理器入队后立即返回，不等待索引完成；
 * 队列打满说明流水线积压严重，新上传直接拒绝（上层返回503）。
 * 队列本身不做持久化，崩溃后由启动对账扫描注册表重建。
 */

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// 一条入库任务，只携带GMID，其余信息以注册表为准
#[derive(Debug, Clone)]
pub struct IngestTask {
    pub gmid: String,
}

/// 队列已满
#[derive(Debug, thiserror::Error)]
#[error("入库队列已满")]
pub struct QueueFull;

/// 入库队列发送端
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<IngestTask>,
}

impl IngestQueue {
    /// 创建队列，返回发送端与worker消费的接收端
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<IngestTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// 非阻塞入队，队列满时返回错误
    pub fn enqueue(&self, gmid: &str) -> Result<(), QueueFull> {
        self.tx
            .try_send(IngestTask {
                gmid: gmid.to_string(),
            })
            .map_err(|_| QueueFull)
    }

    /// 延迟入队（重试退避使用）。延迟结束时队列仍满则任务丢弃，
    /// 由下次启动对账补偿；记录此时停留在 thumbnail_ready，不会丢数据。
    pub fn enqueue_delayed(&self, gmid: &str, delay: Duration) {
        let tx = self.tx.clone();
        let gmid = gmid.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("延迟重试入队: {}", gmid);
            if let Err(e) = tx.try_send(IngestTask { gmid: gmid.clone() }) {
                warn!("延迟入队被放弃（{}），留待启动对账: {}", e, gmid);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_and_receive() {
        let (queue, mut rx) = IngestQueue::new(4);
        queue.enqueue(&"a".repeat(32)).unwrap();

        let task = rx.recv().await.unwrap();
        assert_eq!(task.gmid, "a".repeat(32));
    }

    #[tokio::test]
    async fn test_enqueue_overflow() {
        let (queue, _rx) = IngestQueue::new(1);
        queue.enqueue("1").unwrap();
        assert!(queue.enqueue("2").is_err());
    }

    #[tokio::test]
    async fn test_enqueue_delayed_arrives() {
        tokio::time::pause();
        let (queue, mut rx) = IngestQueue::new(4);
        queue.enqueue_delayed("x", Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(6)).await;
        let task = rx.recv().await.unwrap();
        assert_eq!(task.gmid, "x");
    }

    #[tokio::test]
    async fn test_enqueue_delayed_dropped_when_full() {
        tokio::time::pause();
        let (queue, mut rx) = IngestQueue::new(1);
        queue.enqueue("occupied").unwrap();
        queue.enqueue_delayed("late", Duration::from_secs(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        // 延迟任务到点时队列仍满，被丢弃而不是阻塞等待
        assert_eq!(rx.try_recv().unwrap().gmid, "occupied");
        assert!(rx.try_recv().is_err());
    }
}
