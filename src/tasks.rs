//! 后台任务
//!
//! 交互日志、证据落库、画像更新这类旁路写入一律 fire-and-forget：
//! 失败只记日志，永不传播到面向学生的路径。带在途计数与通知，
//! 测试里可等待全部任务收尾后再断言副作用。

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Default)]
pub struct BackgroundRunner {
    in_flight: Arc<AtomicUsize>,
    notify: Arc<Notify>,
}

impl BackgroundRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 派发一个旁路任务；错误只记日志
    pub fn spawn<F, E>(&self, label: &'static str, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                tracing::error!(label, "Background task failed: {}", e);
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            notify.notify_waiters();
        });
    }

    /// 等待所有在途任务结束（测试用）
    pub async fn idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
