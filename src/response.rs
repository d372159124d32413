//! 应答生成门面
//!
//! 封装 LlmClient 调用并把原始输出归一化为 TutorResponse：
//! 分层解析（严格 → 去围栏 → 修复 → 正则抽取），全部失败时把原文
//! 当作纯文本应答。display_text 中的 ```diagram 围栏块由正则提取并剥离。
//! 模型可在 evidence 数组中附带本轮观察到的理解证据注记。

use std::sync::Arc;

use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::LlmError;
use crate::llm::parse::{self, ParseStrategy};
use crate::llm::{FragmentStream, LlmClient, LlmRequest};
use crate::model::{Agent, MediaPart, TutorResponse};

/// 模型自报的证据注记（由协调逻辑转为 EvidenceRecord 落库）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EvidenceAnnotation {
    /// correct_answer / incorrect_answer / explanation / application / struggle
    pub kind: String,
    #[serde(default)]
    pub quality: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// 结构化输出的原始形态
#[derive(Debug, Deserialize, JsonSchema)]
struct RawTutorReply {
    #[serde(default)]
    speech_text: Option<String>,
    #[serde(default)]
    display_text: Option<String>,
    #[serde(default)]
    lesson_complete: Option<bool>,
    #[serde(default)]
    evidence: Vec<EvidenceAnnotation>,
}

/// 归一化结果
#[derive(Debug)]
pub struct GeneratedReply {
    pub response: TutorResponse,
    pub evidence: Vec<EvidenceAnnotation>,
    pub strategy: ParseStrategy,
}

pub struct ResponseFacade {
    llm: Arc<dyn LlmClient>,
    diagram_re: Regex,
}

impl ResponseFacade {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        // 静态模式，构造失败即程序缺陷
        #[allow(clippy::unwrap_used)]
        let diagram_re = Regex::new(r"(?s)```diagram\s*\n?(.*?)```").unwrap();
        Self { llm, diagram_re }
    }

    fn build_request(
        &self,
        agent: &Agent,
        prompt: &str,
        user: &str,
        media: Vec<MediaPart>,
        cache_handle: Option<String>,
    ) -> LlmRequest {
        // 缓存命中时静态指令由上游缓存携带，避免重复传输
        let system = if cache_handle.is_some() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", agent.instructions, prompt)
        };
        let schema = serde_json::to_value(schemars::schema_for!(RawTutorReply))
            .unwrap_or(serde_json::Value::Null);
        LlmRequest::new(&agent.model, system, user)
            .with_schema(schema)
            .with_media(media)
            .with_cache_handle(cache_handle)
    }

    /// 非流式生成并归一化
    pub async fn generate(
        &self,
        agent: &Agent,
        prompt: &str,
        user: &str,
        media: Vec<MediaPart>,
        cache_handle: Option<String>,
    ) -> Result<GeneratedReply, LlmError> {
        let request = self.build_request(agent, prompt, user, media, cache_handle);
        let raw = self.llm.complete(&request).await?;
        Ok(self.normalize(&raw, &agent.name))
    }

    /// 流式生成：返回原始片段流供渐进合成消费；
    /// 调用方拼接完整载荷后用 normalize 归一化
    pub async fn generate_stream(
        &self,
        agent: &Agent,
        prompt: &str,
        user: &str,
        media: Vec<MediaPart>,
        cache_handle: Option<String>,
    ) -> Result<FragmentStream, LlmError> {
        let request = self.build_request(agent, prompt, user, media, cache_handle);
        self.llm.complete_stream(&request).await
    }

    /// 把原始模型输出归一化为 TutorResponse
    pub fn normalize(&self, raw: &str, responder: &str) -> GeneratedReply {
        match parse::parse_relaxed::<RawTutorReply>(raw) {
            Ok(parsed) => {
                if parsed.strategy != ParseStrategy::Strict {
                    tracing::debug!("Structured reply recovered via {:?}", parsed.strategy);
                }
                self.from_raw(parsed.value, responder, parsed.strategy)
            }
            Err(e) => {
                tracing::warn!("Structured parse failed, falling back to field extraction: {}", e);
                self.from_fields(raw, responder)
            }
        }
    }

    fn from_raw(
        &self,
        raw: RawTutorReply,
        responder: &str,
        strategy: ParseStrategy,
    ) -> GeneratedReply {
        let speech = raw.speech_text.unwrap_or_default();
        let display = raw.display_text.unwrap_or_else(|| speech.clone());
        let (display, diagram) = self.split_diagram(&display);
        GeneratedReply {
            response: TutorResponse {
                speech_text: speech,
                display_text: display,
                diagram,
                lesson_complete: raw.lesson_complete.unwrap_or(false),
                responder: responder.to_string(),
            },
            evidence: raw.evidence,
            strategy,
        }
    }

    /// 结构化解析完全失败时逐字段抽取；连字段都没有就当纯文本
    fn from_fields(&self, raw: &str, responder: &str) -> GeneratedReply {
        let speech = parse::extract_string_field(raw, "speech_text");
        let display = parse::extract_string_field(raw, "display_text");
        let lesson_complete =
            parse::extract_bool_field(raw, "lesson_complete").unwrap_or(false);

        let (speech, display) = match (speech, display) {
            (Some(s), Some(d)) => (s, d),
            (Some(s), None) => (s.clone(), s),
            (None, Some(d)) => (d.clone(), d),
            (None, None) => (raw.trim().to_string(), raw.trim().to_string()),
        };

        let (display, diagram) = self.split_diagram(&display);
        GeneratedReply {
            response: TutorResponse {
                speech_text: speech,
                display_text: display,
                diagram,
                lesson_complete,
                responder: responder.to_string(),
            },
            evidence: Vec::new(),
            strategy: ParseStrategy::Repaired,
        }
    }

    /// 剥离展示文本中的 ```diagram 围栏块，返回 (剩余文本, 图示标记)
    fn split_diagram(&self, display: &str) -> (String, Option<String>) {
        match self.diagram_re.captures(display) {
            Some(caps) => {
                let diagram = caps
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|d| !d.is_empty());
                let stripped = self.diagram_re.replace_all(display, "").trim().to_string();
                (stripped, diagram)
            }
            None => (display.to_string(), None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::llm::MockLlmClient;

    fn facade_with(mock: MockLlmClient) -> ResponseFacade {
        ResponseFacade::new(Arc::new(mock))
    }

    fn agent() -> Agent {
        Agent {
            name: "math_tutor".to_string(),
            role: crate::model::AgentRole::Subject,
            model: "sage-tutor-1".to_string(),
            instructions: "You are a math tutor.".to_string(),
            subject: Some("math".to_string()),
            capabilities: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_strict_json_reply() {
        let mock = MockLlmClient::new();
        mock.push_text(
            r#"{"speech_text": "Half plus a quarter is three quarters.",
                "display_text": "1/2 + 1/4 = 3/4",
                "lesson_complete": false,
                "evidence": [{"kind": "correct_answer", "quality": 90.0}]}"#,
        );
        let reply = facade_with(mock)
            .generate(&agent(), "ctx", "1/2+1/4?", Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(reply.strategy, ParseStrategy::Strict);
        assert_eq!(reply.response.display_text, "1/2 + 1/4 = 3/4");
        assert_eq!(reply.response.responder, "math_tutor");
        assert!(!reply.response.lesson_complete);
        assert_eq!(reply.evidence.len(), 1);
        assert_eq!(reply.evidence[0].kind, "correct_answer");
    }

    #[tokio::test]
    async fn test_fenced_reply_recovered() {
        let mock = MockLlmClient::new();
        mock.push_text(
            "```json\n{\"speech_text\": \"Good try!\", \"lesson_complete\": true}\n```",
        );
        let reply = facade_with(mock)
            .generate(&agent(), "ctx", "done?", Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(reply.strategy, ParseStrategy::Fenced);
        assert_eq!(reply.response.speech_text, "Good try!");
        // display 缺省回退为朗读文本
        assert_eq!(reply.response.display_text, "Good try!");
        assert!(reply.response.lesson_complete);
    }

    #[tokio::test]
    async fn test_plain_text_fallback() {
        let mock = MockLlmClient::new();
        mock.push_text("Let's take it step by step.");
        let reply = facade_with(mock)
            .generate(&agent(), "ctx", "help", Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(reply.response.speech_text, "Let's take it step by step.");
        assert!(!reply.response.lesson_complete);
        assert!(reply.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_diagram_extraction() {
        let mock = MockLlmClient::new();
        mock.push_text(
            "{\"speech_text\": \"See the picture.\", \"display_text\": \"Look:\\n```diagram\\nA -> B\\n```\"}",
        );
        let reply = facade_with(mock)
            .generate(&agent(), "ctx", "draw it", Vec::new(), None)
            .await
            .unwrap();

        assert_eq!(reply.response.diagram.as_deref(), Some("A -> B"));
        assert_eq!(reply.response.display_text, "Look:");
    }

    #[tokio::test]
    async fn test_cache_handle_omits_static_instructions() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_text("{\"speech_text\": \"ok\"}");
        mock.push_text("{\"speech_text\": \"ok\"}");
        let facade = ResponseFacade::new(mock.clone());

        facade
            .generate(&agent(), "ctx", "q", Vec::new(), Some("cache-1".to_string()))
            .await
            .unwrap();
        facade
            .generate(&agent(), "ctx", "q", Vec::new(), None)
            .await
            .unwrap();

        let systems = mock.seen_systems.lock().unwrap();
        assert!(!systems[0].contains("You are a math tutor."));
        assert!(systems[1].contains("You are a math tutor."));
    }
}
