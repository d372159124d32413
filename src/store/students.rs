//! 学生画像、课程与历史进度的点查

use sqlx::Row;

use super::Store;
use crate::model::{Lesson, StudentProfile};

impl Store {
    pub async fn upsert_profile(&self, profile: &StudentProfile) -> Result<(), sqlx::Error> {
        let strengths =
            serde_json::to_string(&profile.strengths).unwrap_or_else(|_| "[]".to_string());
        let struggles =
            serde_json::to_string(&profile.struggles).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            "INSERT OR REPLACE INTO student_profiles
             (student_id, name, grade, learning_style, strengths, struggles)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&profile.student_id)
        .bind(&profile.name)
        .bind(&profile.grade)
        .bind(&profile.learning_style)
        .bind(&strengths)
        .bind(&struggles)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_profile(&self, student_id: &str) -> Result<Option<StudentProfile>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT student_id, name, grade, learning_style, strengths, struggles
             FROM student_profiles WHERE student_id = ?",
        )
        .bind(student_id)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| StudentProfile {
            student_id: row.get("student_id"),
            name: row.get("name"),
            grade: row.get("grade"),
            learning_style: row.get("learning_style"),
            strengths: serde_json::from_str(row.get::<String, _>("strengths").as_str())
                .unwrap_or_default(),
            struggles: serde_json::from_str(row.get::<String, _>("struggles").as_str())
                .unwrap_or_default(),
        }))
    }

    pub async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO lessons (id, subject, grade, title, topic)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&lesson.id)
        .bind(&lesson.subject)
        .bind(&lesson.grade)
        .bind(&lesson.title)
        .bind(&lesson.topic)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_lesson(&self, lesson_id: &str) -> Result<Option<Lesson>, sqlx::Error> {
        let row = sqlx::query("SELECT id, subject, grade, title, topic FROM lessons WHERE id = ?")
            .bind(lesson_id)
            .fetch_optional(self.pool())
            .await?;

        Ok(row.map(|row| Lesson {
            id: row.get("id"),
            subject: row.get("subject"),
            grade: row.get("grade"),
            title: row.get("title"),
            topic: row.get("topic"),
        }))
    }

    /// 历史进度值 [0,100]（掌握度计算的第三级回退）
    pub async fn get_progress(
        &self,
        student_id: &str,
        lesson_id: &str,
    ) -> Result<Option<f64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT progress FROM lesson_progress WHERE student_id = ? AND lesson_id = ?",
        )
        .bind(student_id)
        .bind(lesson_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(|r| r.get("progress")))
    }

    pub async fn set_progress(
        &self,
        student_id: &str,
        lesson_id: &str,
        progress: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO lesson_progress (student_id, lesson_id, progress)
             VALUES (?, ?, ?)",
        )
        .bind(student_id)
        .bind(lesson_id)
        .bind(progress)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_profile_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let profile = StudentProfile {
            student_id: "s1".to_string(),
            name: "Ada".to_string(),
            grade: "5".to_string(),
            learning_style: Some("visual".to_string()),
            strengths: vec!["geometry".to_string()],
            struggles: vec!["word problems".to_string()],
        };
        store.upsert_profile(&profile).await.unwrap();

        let loaded = store.get_profile("s1").await.unwrap().unwrap();
        assert_eq!(loaded.learning_style.as_deref(), Some("visual"));
        assert_eq!(loaded.strengths, vec!["geometry".to_string()]);
        assert!(store.get_profile("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lesson_and_progress() {
        let store = Store::in_memory().await.unwrap();
        let lesson = Lesson {
            id: "l1".to_string(),
            subject: "math".to_string(),
            grade: "5".to_string(),
            title: "Fractions".to_string(),
            topic: "adding fractions".to_string(),
        };
        store.upsert_lesson(&lesson).await.unwrap();
        assert_eq!(store.get_lesson("l1").await.unwrap().unwrap().subject, "math");

        assert!(store.get_progress("s1", "l1").await.unwrap().is_none());
        store.set_progress("s1", "l1", 72.0).await.unwrap();
        assert_eq!(store.get_progress("s1", "l1").await.unwrap(), Some(72.0));
    }
}
