//! 交互日志：追加写入与按时间戳的有序读取

use sqlx::Row;

use super::Store;
use crate::model::Interaction;

impl Store {
    /// 追加一条交互记录
    pub async fn append_interaction(&self, interaction: &Interaction) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO interactions
             (id, session_id, user_message, agent_response, responder, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&interaction.id)
        .bind(&interaction.session_id)
        .bind(&interaction.user_message)
        .bind(&interaction.agent_response)
        .bind(&interaction.responder)
        .bind(interaction.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// 会话最近 N 条交互，按时间正序返回（供上下文组装按序拼接）
    pub async fn recent_interactions(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Interaction>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, session_id, user_message, agent_response, responder, created_at
             FROM interactions
             WHERE session_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        let mut interactions: Vec<Interaction> = rows.into_iter().map(row_to_interaction).collect();
        interactions.reverse();
        Ok(interactions)
    }

    /// 会话最近一条交互（当前活跃应答者由此推导，不单独存状态）
    pub async fn latest_interaction(
        &self,
        session_id: &str,
    ) -> Result<Option<Interaction>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, session_id, user_message, agent_response, responder, created_at
             FROM interactions
             WHERE session_id = ?
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_interaction))
    }
}

fn row_to_interaction(row: sqlx::sqlite::SqliteRow) -> Interaction {
    Interaction {
        id: row.get("id"),
        session_id: row.get("session_id"),
        user_message: row.get("user_message"),
        agent_response: row.get("agent_response"),
        responder: row.get("responder"),
        created_at: row.get("created_at"),
    }
}
