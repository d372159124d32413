//! 掌握度计算
//!
//! compute_mastery 的取值优先级：答题正确率 → 质量分均值 → 历史进度 → 50
//! （无任何证据时显式中性，不预设掌握或挣扎）。结果可短 TTL 缓存，仅为
//! 读性能服务；新证据写入必须使对应 (student, lesson) 的缓存失效。

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::rules::{evaluate, EvidenceSummary, MasteryVerdict};
use crate::clock::SharedClock;
use crate::model::{EvidenceKind, EvidenceRecord};
use crate::store::Store;

/// 无证据时的显式中性分
const NEUTRAL_SCORE: u8 = 50;

/// 掌握度计算器：持久层聚合 + 短 TTL 读缓存
pub struct MasteryCalculator {
    store: Store,
    clock: SharedClock,
    cache_ttl_ms: i64,
    cache: RwLock<HashMap<(String, String), (u8, i64)>>,
}

impl MasteryCalculator {
    pub fn new(store: Store, clock: SharedClock, cache_ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            cache_ttl_ms: cache_ttl_secs as i64 * 1000,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// 掌握度分值 [0,100]
    pub async fn compute_mastery(
        &self,
        student_id: &str,
        lesson_id: &str,
    ) -> Result<u8, sqlx::Error> {
        let key = (student_id.to_string(), lesson_id.to_string());
        let now = self.clock.now_ms();

        if let Some(&(score, cached_at)) = self.cache.read().await.get(&key) {
            if now - cached_at < self.cache_ttl_ms {
                return Ok(score);
            }
        }

        let records = self.store.evidence_for(student_id, lesson_id).await?;
        let score = match score_from_evidence(&records) {
            Some(score) => score,
            None => match self.store.get_progress(student_id, lesson_id).await? {
                Some(progress) => progress.round().clamp(0.0, 100.0) as u8,
                None => NEUTRAL_SCORE,
            },
        };

        self.cache.write().await.insert(key, (score, now));
        Ok(score)
    }

    /// 新证据落库后的缓存失效
    pub async fn invalidate(&self, student_id: &str, lesson_id: &str) {
        self.cache
            .write()
            .await
            .remove(&(student_id.to_string(), lesson_id.to_string()));
    }

    /// 规则判定：证据聚合 + 会话时长 + (subject, grade) 规则，六项标准取 AND
    pub async fn determine_mastery(
        &self,
        student_id: &str,
        lesson_id: &str,
        subject: &str,
        grade: &str,
        session_started_at_ms: i64,
    ) -> Result<MasteryVerdict, sqlx::Error> {
        let rules = self
            .store
            .get_mastery_rules(subject, grade)
            .await?
            .unwrap_or_default();

        let records = self.store.evidence_for(student_id, lesson_id).await?;
        let summary = EvidenceSummary::from_records(&records);
        let elapsed_secs = ((self.clock.now_ms() - session_started_at_ms).max(0) / 1000) as u64;

        Ok(evaluate(&rules, &summary, elapsed_secs))
    }
}

/// 证据内的两级取值：答题比率优先，其次非零质量分均值
fn score_from_evidence(records: &[EvidenceRecord]) -> Option<u8> {
    let correct = records
        .iter()
        .filter(|r| r.kind == EvidenceKind::CorrectAnswer)
        .count() as f64;
    let incorrect = records
        .iter()
        .filter(|r| r.kind == EvidenceKind::IncorrectAnswer)
        .count() as f64;

    if correct + incorrect > 0.0 {
        return Some((correct / (correct + incorrect) * 100.0).round() as u8);
    }

    let quality: Vec<f64> = records
        .iter()
        .filter(|r| r.quality_score > 0.0)
        .map(|r| r.quality_score)
        .collect();
    if !quality.is_empty() {
        let mean = quality.iter().sum::<f64>() / quality.len() as f64;
        return Some(mean.round().clamp(0.0, 100.0) as u8);
    }

    None
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::model::EvidenceRecord;

    async fn setup() -> (Store, Arc<ManualClock>, MasteryCalculator) {
        let store = Store::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(0));
        let calc = MasteryCalculator::new(store.clone(), clock.clone(), 60);
        (store, clock, calc)
    }

    #[tokio::test]
    async fn test_answer_ratio_wins() {
        let (store, _, calc) = setup().await;
        for _ in 0..3 {
            store
                .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::CorrectAnswer))
                .await
                .unwrap();
        }
        store
            .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::IncorrectAnswer))
            .await
            .unwrap();
        // 质量分证据存在也不参与：比率优先
        store
            .insert_evidence(
                &EvidenceRecord::new("s1", "l1", "x", EvidenceKind::Explanation).with_quality(10.0),
            )
            .await
            .unwrap();

        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_quality_mean_fallback() {
        let (store, _, calc) = setup().await;
        store
            .insert_evidence(
                &EvidenceRecord::new("s1", "l1", "x", EvidenceKind::Explanation).with_quality(60.0),
            )
            .await
            .unwrap();
        store
            .insert_evidence(
                &EvidenceRecord::new("s1", "l1", "x", EvidenceKind::Application).with_quality(80.0),
            )
            .await
            .unwrap();

        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_stored_progress_fallback_then_neutral() {
        let (store, _, calc) = setup().await;
        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 50);

        store.set_progress("s1", "l2", 62.4).await.unwrap();
        assert_eq!(calc.compute_mastery("s1", "l2").await.unwrap(), 62);
    }

    #[tokio::test]
    async fn test_cache_ttl_and_invalidation() {
        let (store, clock, calc) = setup().await;
        store
            .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::CorrectAnswer))
            .await
            .unwrap();
        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 100);

        // TTL 内命中缓存，新证据不可见
        store
            .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::IncorrectAnswer))
            .await
            .unwrap();
        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 100);

        // 失效后重新聚合
        calc.invalidate("s1", "l1").await;
        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 50);

        // TTL 到期也会重新聚合
        store
            .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::IncorrectAnswer))
            .await
            .unwrap();
        clock.advance(61_000);
        assert_eq!(calc.compute_mastery("s1", "l1").await.unwrap(), 33);
    }

    #[tokio::test]
    async fn test_determine_mastery_uses_elapsed_time() {
        let (store, clock, calc) = setup().await;
        // 凑齐六项标准
        for _ in 0..3 {
            store
                .insert_evidence(&EvidenceRecord::new("s1", "l1", "x", EvidenceKind::CorrectAnswer))
                .await
                .unwrap();
        }
        store
            .insert_evidence(
                &EvidenceRecord::new("s1", "l1", "x", EvidenceKind::Explanation).with_quality(90.0),
            )
            .await
            .unwrap();
        for _ in 0..2 {
            store
                .insert_evidence(
                    &EvidenceRecord::new("s1", "l1", "x", EvidenceKind::Application)
                        .with_quality(80.0),
                )
                .await
                .unwrap();
        }

        clock.advance(599_000);
        let early = calc
            .determine_mastery("s1", "l1", "math", "5", 0)
            .await
            .unwrap();
        assert!(!early.has_mastered);
        assert!(!early.criteria.enough_time);

        clock.advance(2_000);
        let later = calc
            .determine_mastery("s1", "l1", "math", "5", 0)
            .await
            .unwrap();
        assert!(later.has_mastered);
        assert_eq!(later.confidence, 1.0);
    }
}
