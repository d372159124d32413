//! 表结构引导：启动时 CREATE TABLE IF NOT EXISTS

use super::Store;

impl Store {
    pub(super) async fn bootstrap(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agents (
                name TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                model TEXT NOT NULL,
                instructions TEXT NOT NULL,
                subject TEXT,
                audio_input INTEGER NOT NULL DEFAULT 0,
                diagram_output INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_message TEXT NOT NULL,
                agent_response TEXT NOT NULL,
                responder TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(self.pool())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_interactions_session
             ON interactions(session_id, created_at)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS evidence_records (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                lesson_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                quality_score REAL NOT NULL DEFAULT 0,
                confidence REAL NOT NULL DEFAULT 1,
                topic TEXT,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(self.pool())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_evidence_student_lesson
             ON evidence_records(student_id, lesson_id)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_corrections (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                responder TEXT NOT NULL,
                original_response TEXT NOT NULL,
                issues TEXT NOT NULL,
                required_fixes TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
        )
        .execute(self.pool())
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_corrections_session_status
             ON pending_corrections(session_id, status, created_at)",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS student_profiles (
                student_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                grade TEXT NOT NULL,
                learning_style TEXT,
                strengths TEXT NOT NULL DEFAULT '[]',
                struggles TEXT NOT NULL DEFAULT '[]'
            )",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lessons (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                grade TEXT NOT NULL,
                title TEXT NOT NULL,
                topic TEXT NOT NULL
            )",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lesson_progress (
                student_id TEXT NOT NULL,
                lesson_id TEXT NOT NULL,
                progress REAL NOT NULL,
                PRIMARY KEY (student_id, lesson_id)
            )",
        )
        .execute(self.pool())
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS mastery_rules (
                subject TEXT NOT NULL,
                grade TEXT NOT NULL,
                min_correct_answers INTEGER NOT NULL,
                min_explanation_quality REAL NOT NULL,
                min_application_attempts INTEGER NOT NULL,
                min_overall_quality REAL NOT NULL,
                max_struggle_ratio REAL NOT NULL,
                min_time_spent_secs INTEGER NOT NULL,
                PRIMARY KEY (subject, grade)
            )",
        )
        .execute(self.pool())
        .await?;

        Ok(())
    }
}
