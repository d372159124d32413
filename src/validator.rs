//! 延迟校验 / 自我修正
//!
//! 应答交付后在关键路径之外调用校验模型复核正确性，10 秒超时。
//! 超时或任何错误一律放行（fail-open）：返回 approved=true、低置信度
//! 与合成注记，绝不阻塞学习体验。显式拒绝时为该会话落一条
//! PendingCorrection，由下一轮的上下文组装注入自我修正指令块。

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::llm::parse;
use crate::llm::{LlmClient, LlmRequest};
use crate::model::PendingCorrection;
use crate::store::Store;

/// 校验模型的结构化输出
#[derive(Debug, Deserialize, JsonSchema)]
struct RawVerdict {
    approved: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    required_fixes: Vec<String>,
}

/// 复核结论
#[derive(Debug, Clone)]
pub struct Verdict {
    pub approved: bool,
    pub confidence: f64,
    pub issues: Vec<String>,
    pub required_fixes: Vec<String>,
    /// 放行路径上的合成注记（超时 / 上游错误 / 解析失败）
    pub annotation: Option<String>,
}

impl Verdict {
    fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            confidence: 0.3,
            issues: Vec::new(),
            required_fixes: Vec::new(),
            annotation: Some(reason.into()),
        }
    }
}

pub struct Validator {
    llm: Arc<dyn LlmClient>,
    store: Store,
    model: String,
    timeout: Duration,
}

impl Validator {
    pub fn new(llm: Arc<dyn LlmClient>, store: Store, model: String, timeout_secs: u64) -> Self {
        Self {
            llm,
            store,
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 复核一条已交付的应答；拒绝时落 PendingCorrection
    pub async fn review(
        &self,
        session_id: &str,
        responder: &str,
        user_message: &str,
        response_text: &str,
    ) -> Verdict {
        let verdict = match tokio::time::timeout(self.timeout, self.invoke(user_message, response_text))
            .await
        {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(session_id, "Validator timed out, auto-approving");
                Verdict::fail_open("validator timeout")
            }
        };

        if !verdict.approved {
            tracing::info!(
                session_id,
                responder,
                issues = verdict.issues.len(),
                "Response rejected, queuing correction"
            );
            let correction = PendingCorrection::new(
                session_id,
                responder,
                response_text,
                verdict.issues.clone(),
                verdict.required_fixes.clone(),
            );
            if let Err(e) = self.store.insert_correction(&correction).await {
                tracing::error!("Failed to persist correction: {}", e);
            }
        }

        verdict
    }

    async fn invoke(&self, user_message: &str, response_text: &str) -> Verdict {
        let schema = serde_json::to_value(schemars::schema_for!(RawVerdict))
            .unwrap_or(serde_json::Value::Null);
        let request = LlmRequest::new(
            &self.model,
            "You review a tutor's answer for factual and pedagogical correctness. \
             Reply with JSON: approved (bool), confidence (0..1), issues (list), \
             required_fixes (list).",
            format!("Student asked: {}\n\nTutor answered: {}", user_message, response_text),
        )
        .with_schema(schema);

        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Validator call failed, auto-approving: {}", e);
                return Verdict::fail_open(format!("validator error: {}", e));
            }
        };

        match parse::parse_relaxed::<RawVerdict>(&raw) {
            Ok(parsed) => Verdict {
                approved: parsed.value.approved,
                confidence: parsed.value.confidence.unwrap_or(1.0),
                issues: parsed.value.issues,
                required_fixes: parsed.value.required_fixes,
                annotation: None,
            },
            Err(_) => match parse::extract_bool_field(&raw, "approved") {
                Some(approved) => Verdict {
                    approved,
                    confidence: 0.5,
                    issues: Vec::new(),
                    required_fixes: Vec::new(),
                    annotation: Some("verdict recovered by field extraction".to_string()),
                },
                None => {
                    tracing::warn!("Unparseable verdict, auto-approving");
                    Verdict::fail_open("unparseable verdict")
                }
            },
        }
    }
}
