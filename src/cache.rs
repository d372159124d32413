//! 静态教学材料的上游缓存管理
//!
//! 按模型分组维护缓存句柄：TTL 内且未过续期阈值直接复用；过了
//! 续期阈值后台续期（原地重置 TTL，不阻塞当前请求）；续期失败或
//! TTL 过期则下次使用时重建。未命中绝不阻塞——当前请求不带句柄
//! 继续，同时异步预热。内容变更（哈希不一致）触发显式失效。
//! 时间全部走注入的 Clock，便于测试推进。

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::clock::SharedClock;
use crate::error::LlmError;

/// 上游缓存后端
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// 创建缓存，返回句柄
    async fn create(&self, model_group: &str, content: &str) -> Result<String, LlmError>;
    /// 原地续期
    async fn renew(&self, handle: &str) -> Result<(), LlmError>;
    /// 删除句柄
    async fn delete(&self, handle: &str) -> Result<(), LlmError>;
}

#[derive(Debug, Clone)]
struct Entry {
    handle: String,
    content_hash: u64,
    created_at: i64,
}

pub struct InstructionCacheManager {
    backend: Arc<dyn CacheBackend>,
    clock: SharedClock,
    ttl_ms: i64,
    renew_after_ms: i64,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    /// 预热中的分组，避免并发重复创建
    warming: Arc<Mutex<HashSet<String>>>,
}

impl InstructionCacheManager {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        clock: SharedClock,
        ttl_secs: u64,
        renew_after_secs: u64,
    ) -> Self {
        Self {
            backend,
            clock,
            ttl_ms: ttl_secs as i64 * 1000,
            renew_after_ms: renew_after_secs as i64 * 1000,
            entries: Arc::new(RwLock::new(HashMap::new())),
            warming: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 取某模型分组的缓存句柄；未命中返回 None 并触发异步预热，
    /// 调用方不带句柄继续本轮
    pub async fn handle_for(&self, model_group: &str, content: &str) -> Option<String> {
        let hash = content_hash(content);
        let now = self.clock.now_ms();

        let entry = self.entries.read().await.get(model_group).cloned();
        if let Some(entry) = entry {
            if entry.content_hash != hash {
                tracing::info!(model_group, "Instruction content changed, invalidating cache");
                self.invalidate(model_group).await;
            } else if now - entry.created_at >= self.ttl_ms {
                self.entries.write().await.remove(model_group);
            } else {
                if now - entry.created_at >= self.renew_after_ms {
                    self.spawn_renew(model_group.to_string(), entry.handle.clone());
                }
                return Some(entry.handle);
            }
        }

        self.spawn_warmup(model_group.to_string(), content.to_string(), hash);
        None
    }

    /// 显式失效：删掉本地条目并后台删除上游句柄
    pub async fn invalidate(&self, model_group: &str) {
        let removed = self.entries.write().await.remove(model_group);
        if let Some(entry) = removed {
            let backend = self.backend.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.delete(&entry.handle).await {
                    tracing::warn!("Cache handle delete failed: {}", e);
                }
            });
        }
    }

    fn spawn_warmup(&self, model_group: String, content: String, hash: u64) {
        let backend = self.backend.clone();
        let clock = self.clock.clone();
        let entries = self.entries.clone();
        let warming = self.warming.clone();
        tokio::spawn(async move {
            {
                let mut guard = warming.lock().await;
                if !guard.insert(model_group.clone()) {
                    return;
                }
            }
            match backend.create(&model_group, &content).await {
                Ok(handle) => {
                    tracing::debug!(model_group, "Instruction cache warmed");
                    entries.write().await.insert(
                        model_group.clone(),
                        Entry {
                            handle,
                            content_hash: hash,
                            created_at: clock.now_ms(),
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(model_group, "Cache warmup failed: {}", e);
                }
            }
            warming.lock().await.remove(&model_group);
        });
    }

    fn spawn_renew(&self, model_group: String, handle: String) {
        let backend = self.backend.clone();
        let clock = self.clock.clone();
        let entries = self.entries.clone();
        tokio::spawn(async move {
            match backend.renew(&handle).await {
                Ok(()) => {
                    let mut guard = entries.write().await;
                    if let Some(entry) = guard.get_mut(&model_group) {
                        if entry.handle == handle {
                            entry.created_at = clock.now_ms();
                        }
                    }
                }
                Err(e) => {
                    // 续期失败：丢弃条目，下次使用时重建
                    tracing::warn!(model_group, "Cache renewal failed, will recreate: {}", e);
                    let mut guard = entries.write().await;
                    if guard.get(&model_group).map(|e| e.handle.as_str()) == Some(handle.as_str())
                    {
                        guard.remove(&model_group);
                    }
                }
            }
        });
    }
}

fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// 记账式 Mock 后端
#[derive(Debug, Default)]
pub struct MockCacheBackend {
    counter: std::sync::Mutex<usize>,
    pub created: std::sync::Mutex<Vec<String>>,
    pub renewed: std::sync::Mutex<Vec<String>>,
    pub deleted: std::sync::Mutex<Vec<String>>,
    fail_renew: std::sync::atomic::AtomicBool,
}

impl MockCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_renewals(&self) {
        self.fail_renew
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheBackend for MockCacheBackend {
    async fn create(&self, model_group: &str, _content: &str) -> Result<String, LlmError> {
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        let handle = format!("cache-{}-{}", model_group, *counter);
        self.created.lock().unwrap().push(handle.clone());
        Ok(handle)
    }

    async fn renew(&self, handle: &str) -> Result<(), LlmError> {
        if self.fail_renew.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(LlmError::Provider("renew refused".to_string()));
        }
        self.renewed.lock().unwrap().push(handle.to_string());
        Ok(())
    }

    async fn delete(&self, handle: &str) -> Result<(), LlmError> {
        self.deleted.lock().unwrap().push(handle.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const HOUR_MS: i64 = 3_600_000;

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn manager(
        backend: Arc<MockCacheBackend>,
        clock: Arc<ManualClock>,
    ) -> InstructionCacheManager {
        InstructionCacheManager::new(backend, clock, 7200, 5400)
    }

    #[tokio::test]
    async fn test_miss_never_blocks_then_warms() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock);

        assert!(mgr.handle_for("tutor", "instructions").await.is_none());
        settle().await;

        let handle = mgr.handle_for("tutor", "instructions").await;
        assert_eq!(handle.as_deref(), Some("cache-tutor-1"));
        assert_eq!(backend.created.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_entry_reused_without_renewal() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock.clone());

        mgr.handle_for("tutor", "c").await;
        settle().await;

        clock.advance(HOUR_MS);
        assert!(mgr.handle_for("tutor", "c").await.is_some());
        settle().await;
        assert!(backend.renewed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_entry_renewed_in_background() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock.clone());

        mgr.handle_for("tutor", "c").await;
        settle().await;

        // 过续期阈值但未过 TTL：当场返回旧句柄，后台续期
        clock.advance(5401 * 1000);
        let handle = mgr.handle_for("tutor", "c").await;
        assert_eq!(handle.as_deref(), Some("cache-tutor-1"));
        settle().await;
        assert_eq!(backend.renewed.lock().unwrap().len(), 1);

        // 续期重置了 TTL：再过一小时仍然新鲜
        clock.advance(HOUR_MS);
        assert!(mgr.handle_for("tutor", "c").await.is_some());
        settle().await;
        assert_eq!(backend.renewed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_renewal_recreates() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock.clone());

        mgr.handle_for("tutor", "c").await;
        settle().await;

        backend.fail_renewals();
        clock.advance(5401 * 1000);
        assert!(mgr.handle_for("tutor", "c").await.is_some());
        settle().await;

        // 条目已被丢弃，下一次未命中并重建
        assert!(mgr.handle_for("tutor", "c").await.is_none());
        settle().await;
        assert_eq!(backend.created.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_entry_recreated() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock.clone());

        mgr.handle_for("tutor", "c").await;
        settle().await;

        clock.advance(7201 * 1000);
        assert!(mgr.handle_for("tutor", "c").await.is_none());
        settle().await;
        assert_eq!(backend.created.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_content_change_invalidates() {
        let backend = Arc::new(MockCacheBackend::new());
        let clock = Arc::new(ManualClock::new(0));
        let mgr = manager(backend.clone(), clock);

        mgr.handle_for("tutor", "old content").await;
        settle().await;

        assert!(mgr.handle_for("tutor", "new content").await.is_none());
        settle().await;
        assert_eq!(*backend.deleted.lock().unwrap(), vec!["cache-tutor-1"]);
        assert_eq!(backend.created.lock().unwrap().len(), 2);
    }
}
