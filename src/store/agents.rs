//! Agent 定义的存取与 TTL 内存缓存
//!
//! Agent 加载后不可变；AgentCache 按 TTL 整体刷新，时间判断走注入时钟。
//! 并发刷新允许覆盖写（内容幂等，后写生效即可）。

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;
use tokio::sync::RwLock;

use super::Store;
use crate::clock::SharedClock;
use crate::model::{Agent, AgentCapabilities, AgentRole};

impl Store {
    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO agents
             (name, role, model, instructions, subject, audio_input, diagram_output)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.name)
        .bind(agent.role.as_str())
        .bind(&agent.model)
        .bind(&agent.instructions)
        .bind(&agent.subject)
        .bind(agent.capabilities.audio_input as i32)
        .bind(agent.capabilities.diagram_output as i32)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn load_agents(&self) -> Result<Vec<Agent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT name, role, model, instructions, subject, audio_input, diagram_output
             FROM agents",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Agent {
                name: row.get("name"),
                role: AgentRole::parse(row.get::<String, _>("role").as_str()),
                model: row.get("model"),
                instructions: row.get("instructions"),
                subject: row.get("subject"),
                capabilities: AgentCapabilities {
                    audio_input: row.get::<i32, _>("audio_input") != 0,
                    diagram_output: row.get::<i32, _>("diagram_output") != 0,
                },
            })
            .collect())
    }
}

struct CacheState {
    agents: HashMap<String, Agent>,
    loaded_at_ms: i64,
}

/// Agent 读缓存：TTL 过期后从存储整体刷新
pub struct AgentCache {
    store: Store,
    clock: SharedClock,
    ttl_ms: i64,
    state: RwLock<Option<CacheState>>,
}

impl AgentCache {
    pub fn new(store: Store, clock: SharedClock, ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            ttl_ms: ttl_secs as i64 * 1000,
            state: RwLock::new(None),
        }
    }

    /// 按名称取 Agent；首次访问或 TTL 过期时触发刷新
    pub async fn get(&self, name: &str) -> Result<Option<Agent>, sqlx::Error> {
        self.ensure_fresh().await?;
        Ok(self
            .state
            .read()
            .await
            .as_ref()
            .and_then(|s| s.agents.get(name).cloned()))
    }

    /// 全量列表（路由兜底时按角色/科目检索）
    pub async fn all(&self) -> Result<Vec<Agent>, sqlx::Error> {
        self.ensure_fresh().await?;
        Ok(self
            .state
            .read()
            .await
            .as_ref()
            .map(|s| s.agents.values().cloned().collect())
            .unwrap_or_default())
    }

    /// 静态教学内容变更后强制下次重载
    pub async fn invalidate(&self) {
        *self.state.write().await = None;
    }

    async fn ensure_fresh(&self) -> Result<(), sqlx::Error> {
        let now = self.clock.now_ms();
        {
            let state = self.state.read().await;
            if let Some(s) = state.as_ref() {
                if now - s.loaded_at_ms < self.ttl_ms {
                    return Ok(());
                }
            }
        }

        let agents = self.store.load_agents().await?;
        let map = agents.into_iter().map(|a| (a.name.clone(), a)).collect();
        *self.state.write().await = Some(CacheState {
            agents: map,
            loaded_at_ms: now,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn agent(name: &str, role: AgentRole) -> Agent {
        Agent {
            name: name.to_string(),
            role,
            model: "sage-tutor-1".to_string(),
            instructions: format!("You are {}", name),
            subject: None,
            capabilities: AgentCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn test_cache_refreshes_after_ttl() {
        let store = Store::in_memory().await.unwrap();
        store.upsert_agent(&agent("coordinator", AgentRole::Coordinator)).await.unwrap();

        let clock = Arc::new(ManualClock::new(0));
        let cache = AgentCache::new(store.clone(), clock.clone(), 300);

        assert!(cache.get("coordinator").await.unwrap().is_some());
        assert!(cache.get("math_tutor").await.unwrap().is_none());

        // TTL 内看不到新写入
        store.upsert_agent(&agent("math_tutor", AgentRole::Subject)).await.unwrap();
        assert!(cache.get("math_tutor").await.unwrap().is_none());

        // 过期后刷新
        clock.advance(301_000);
        assert!(cache.get("math_tutor").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = Store::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let cache = AgentCache::new(store.clone(), clock, 300);
        assert!(cache.all().await.unwrap().is_empty());

        store.upsert_agent(&agent("helper", AgentRole::Support)).await.unwrap();
        assert!(cache.get("helper").await.unwrap().is_none());

        cache.invalidate().await;
        assert!(cache.get("helper").await.unwrap().is_some());
    }
}
