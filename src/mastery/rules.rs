//! 掌握度规则与判定
//!
//! 规则按 (subject, grade) 配置，缺省时用默认值。判定是纯规则运算：
//! 六项标准全部通过才算掌握（逻辑 AND，无部分加权），置信度恒为 1.0，
//! 与模型自报的完成标志相互独立。

use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::model::{EvidenceKind, EvidenceRecord};
use crate::store::Store;

/// 掌握度判定规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteryRules {
    pub min_correct_answers: u32,
    pub min_explanation_quality: f64,
    pub min_application_attempts: u32,
    pub min_overall_quality: f64,
    pub max_struggle_ratio: f64,
    pub min_time_spent_secs: u64,
}

impl Default for MasteryRules {
    fn default() -> Self {
        Self {
            min_correct_answers: 3,
            min_explanation_quality: 70.0,
            min_application_attempts: 2,
            min_overall_quality: 70.0,
            max_struggle_ratio: 0.3,
            min_time_spent_secs: 600,
        }
    }
}

impl Store {
    /// 读取 (subject, grade) 的规则行；缺省返回 None（调用方回退默认值）
    pub async fn get_mastery_rules(
        &self,
        subject: &str,
        grade: &str,
    ) -> Result<Option<MasteryRules>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT min_correct_answers, min_explanation_quality, min_application_attempts,
                    min_overall_quality, max_struggle_ratio, min_time_spent_secs
             FROM mastery_rules WHERE subject = ? AND grade = ?",
        )
        .bind(subject)
        .bind(grade)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|row| MasteryRules {
            min_correct_answers: row.get::<i64, _>("min_correct_answers") as u32,
            min_explanation_quality: row.get("min_explanation_quality"),
            min_application_attempts: row.get::<i64, _>("min_application_attempts") as u32,
            min_overall_quality: row.get("min_overall_quality"),
            max_struggle_ratio: row.get("max_struggle_ratio"),
            min_time_spent_secs: row.get::<i64, _>("min_time_spent_secs") as u64,
        }))
    }

    pub async fn upsert_mastery_rules(
        &self,
        subject: &str,
        grade: &str,
        rules: &MasteryRules,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO mastery_rules
             (subject, grade, min_correct_answers, min_explanation_quality,
              min_application_attempts, min_overall_quality, max_struggle_ratio, min_time_spent_secs)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(subject)
        .bind(grade)
        .bind(rules.min_correct_answers as i64)
        .bind(rules.min_explanation_quality)
        .bind(rules.min_application_attempts as i64)
        .bind(rules.min_overall_quality)
        .bind(rules.max_struggle_ratio)
        .bind(rules.min_time_spent_secs as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

/// 证据聚合视图
#[derive(Debug, Clone, Default)]
pub struct EvidenceSummary {
    pub correct: u32,
    pub incorrect: u32,
    pub explanation_quality_avg: f64,
    pub application_attempts: u32,
    pub overall_quality_avg: f64,
    pub struggle_count: u32,
    pub total: u32,
}

impl EvidenceSummary {
    pub fn from_records(records: &[EvidenceRecord]) -> Self {
        let mut summary = Self::default();
        let mut explanation_sum = 0.0;
        let mut explanation_count = 0u32;
        let mut quality_sum = 0.0;
        let mut quality_count = 0u32;

        for record in records {
            summary.total += 1;
            match record.kind {
                EvidenceKind::CorrectAnswer => summary.correct += 1,
                EvidenceKind::IncorrectAnswer => summary.incorrect += 1,
                EvidenceKind::Explanation => {
                    explanation_sum += record.quality_score;
                    explanation_count += 1;
                }
                EvidenceKind::Application => summary.application_attempts += 1,
                EvidenceKind::Struggle => summary.struggle_count += 1,
            }
            if record.quality_score > 0.0 {
                quality_sum += record.quality_score;
                quality_count += 1;
            }
        }

        if explanation_count > 0 {
            summary.explanation_quality_avg = explanation_sum / explanation_count as f64;
        }
        if quality_count > 0 {
            summary.overall_quality_avg = quality_sum / quality_count as f64;
        }
        summary
    }

    /// 挣扎占比：分母为全部证据（含 correct_answer 等），按既有口径保留
    pub fn struggle_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.struggle_count as f64 / self.total as f64
    }
}

/// 六项标准的逐项结果
#[derive(Debug, Clone, Serialize)]
pub struct MasteryCriteria {
    pub enough_correct: bool,
    pub explanation_quality_met: bool,
    pub enough_applications: bool,
    pub overall_quality_met: bool,
    pub struggle_ratio_ok: bool,
    pub enough_time: bool,
}

impl MasteryCriteria {
    pub fn all_passed(&self) -> bool {
        self.enough_correct
            && self.explanation_quality_met
            && self.enough_applications
            && self.overall_quality_met
            && self.struggle_ratio_ok
            && self.enough_time
    }
}

/// 判定结论（course complete → assessment 的权威触发器）
#[derive(Debug, Clone, Serialize)]
pub struct MasteryVerdict {
    pub has_mastered: bool,
    pub criteria: MasteryCriteria,
    pub struggle_ratio: f64,
    pub elapsed_secs: u64,
    /// 规则判定无模型参与，恒为 1.0
    pub confidence: f64,
}

/// 纯函数判定：六项标准逐项评估后取 AND
pub fn evaluate(rules: &MasteryRules, summary: &EvidenceSummary, elapsed_secs: u64) -> MasteryVerdict {
    let struggle_ratio = summary.struggle_ratio();
    let criteria = MasteryCriteria {
        enough_correct: summary.correct >= rules.min_correct_answers,
        explanation_quality_met: summary.explanation_quality_avg >= rules.min_explanation_quality,
        enough_applications: summary.application_attempts >= rules.min_application_attempts,
        overall_quality_met: summary.overall_quality_avg >= rules.min_overall_quality,
        struggle_ratio_ok: struggle_ratio <= rules.max_struggle_ratio,
        enough_time: elapsed_secs >= rules.min_time_spent_secs,
    };

    MasteryVerdict {
        has_mastered: criteria.all_passed(),
        criteria,
        struggle_ratio,
        elapsed_secs,
        confidence: 1.0,
    }
}
