//! 待修正记录：严格 FIFO 取出，pending → delivered 单向迁移
//!
//! 迁移在数据访问层强制：带状态守卫的 UPDATE，受影响行数为 0 即视为
//! 已被并发请求交付过，杜绝同一会话的重复交付。记录交付后保留（审计痕迹）。

use sqlx::Row;

use super::Store;
use crate::model::{CorrectionStatus, PendingCorrection};

impl Store {
    /// 质检拒绝后入队一条修正记录
    pub async fn insert_correction(&self, correction: &PendingCorrection) -> Result<(), sqlx::Error> {
        let issues = serde_json::to_string(&correction.issues).unwrap_or_else(|_| "[]".to_string());
        let fixes =
            serde_json::to_string(&correction.required_fixes).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            "INSERT INTO pending_corrections
             (id, session_id, responder, original_response, issues, required_fixes, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&correction.id)
        .bind(&correction.session_id)
        .bind(&correction.responder)
        .bind(&correction.original_response)
        .bind(&issues)
        .bind(&fixes)
        .bind(correction.status.as_str())
        .bind(correction.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// 会话最早一条待交付修正（每轮恰好消费一条）
    pub async fn oldest_pending_correction(
        &self,
        session_id: &str,
    ) -> Result<Option<PendingCorrection>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, session_id, responder, original_response, issues, required_fixes, status, created_at
             FROM pending_corrections
             WHERE session_id = ? AND status = 'pending'
             ORDER BY created_at ASC
             LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(row_to_correction))
    }

    /// 标记交付；仅当仍处于 pending 时生效，返回是否真正迁移
    pub async fn mark_correction_delivered(&self, correction_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE pending_corrections SET status = 'delivered'
             WHERE id = ? AND status = 'pending'",
        )
        .bind(correction_id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn row_to_correction(row: sqlx::sqlite::SqliteRow) -> PendingCorrection {
    let issues: Vec<String> =
        serde_json::from_str(row.get::<String, _>("issues").as_str()).unwrap_or_default();
    let required_fixes: Vec<String> =
        serde_json::from_str(row.get::<String, _>("required_fixes").as_str()).unwrap_or_default();
    let status = match row.get::<String, _>("status").as_str() {
        "delivered" => CorrectionStatus::Delivered,
        _ => CorrectionStatus::Pending,
    };

    PendingCorrection {
        id: row.get("id"),
        session_id: row.get("session_id"),
        responder: row.get("responder"),
        original_response: row.get("original_response"),
        issues,
        required_fixes,
        status,
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correction(session: &str, created_at: i64, issue: &str) -> PendingCorrection {
        let mut c = PendingCorrection::new(
            session,
            "math_tutor",
            "2 + 2 = 5",
            vec![issue.to_string()],
            vec!["fix the arithmetic".to_string()],
        );
        c.created_at = created_at;
        c
    }

    #[tokio::test]
    async fn test_fifo_retrieval_and_delivery() {
        let store = Store::in_memory().await.unwrap();

        let older = correction("sess1", 1000, "wrong sum");
        let newer = correction("sess1", 2000, "wrong sign");
        store.insert_correction(&newer).await.unwrap();
        store.insert_correction(&older).await.unwrap();

        // 最早的先出
        let first = store.oldest_pending_correction("sess1").await.unwrap().unwrap();
        assert_eq!(first.id, older.id);
        assert_eq!(first.issues, vec!["wrong sum".to_string()]);

        assert!(store.mark_correction_delivered(&first.id).await.unwrap());

        // 交付后取到次早的一条
        let second = store.oldest_pending_correction("sess1").await.unwrap().unwrap();
        assert_eq!(second.id, newer.id);

        assert!(store.mark_correction_delivered(&second.id).await.unwrap());
        assert!(store.oldest_pending_correction("sess1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_delivery_rejected() {
        let store = Store::in_memory().await.unwrap();
        let c = correction("sess1", 1000, "wrong sum");
        store.insert_correction(&c).await.unwrap();

        assert!(store.mark_correction_delivered(&c.id).await.unwrap());
        // 唯一允许的迁移已发生，第二次无效
        assert!(!store.mark_correction_delivered(&c.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = Store::in_memory().await.unwrap();
        store.insert_correction(&correction("sess1", 1000, "a")).await.unwrap();

        assert!(store.oldest_pending_correction("sess2").await.unwrap().is_none());
    }
}
