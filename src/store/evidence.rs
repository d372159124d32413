//! 学习证据：追加写入与按 (student, lesson) 聚合读取

use sqlx::Row;

use super::Store;
use crate::model::{EvidenceKind, EvidenceRecord};

impl Store {
    /// 写入一条证据（写入后不可变）
    pub async fn insert_evidence(&self, record: &EvidenceRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO evidence_records
             (id, student_id, lesson_id, session_id, kind, quality_score, confidence, topic, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.student_id)
        .bind(&record.lesson_id)
        .bind(&record.session_id)
        .bind(record.kind.as_str())
        .bind(record.quality_score)
        .bind(record.confidence)
        .bind(&record.topic)
        .bind(record.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// 某学生某课程的全部证据（聚合无顺序要求，这里按写入时间返回）
    pub async fn evidence_for(
        &self,
        student_id: &str,
        lesson_id: &str,
    ) -> Result<Vec<EvidenceRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, student_id, lesson_id, session_id, kind, quality_score, confidence, topic, created_at
             FROM evidence_records
             WHERE student_id = ? AND lesson_id = ?
             ORDER BY created_at ASC",
        )
        .bind(student_id)
        .bind(lesson_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let kind = EvidenceKind::parse(row.get::<String, _>("kind").as_str())?;
                Some(EvidenceRecord {
                    id: row.get("id"),
                    student_id: row.get("student_id"),
                    lesson_id: row.get("lesson_id"),
                    session_id: row.get("session_id"),
                    kind,
                    quality_score: row.get("quality_score"),
                    confidence: row.get("confidence"),
                    topic: row.get("topic"),
                    created_at: row.get("created_at"),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_aggregate_read() {
        let store = Store::in_memory().await.unwrap();

        let ev1 = EvidenceRecord::new("s1", "l1", "sess1", EvidenceKind::CorrectAnswer);
        let ev2 = EvidenceRecord::new("s1", "l1", "sess1", EvidenceKind::Struggle)
            .with_topic("fractions");
        let other = EvidenceRecord::new("s2", "l1", "sess2", EvidenceKind::CorrectAnswer);

        store.insert_evidence(&ev1).await.unwrap();
        store.insert_evidence(&ev2).await.unwrap();
        store.insert_evidence(&other).await.unwrap();

        let records = store.evidence_for("s1", "l1").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.kind == EvidenceKind::Struggle));

        assert!(store.evidence_for("s1", "l2").await.unwrap().is_empty());
    }
}
