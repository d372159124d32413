//! 路由与会话连续性
//!
//! 选择本轮应答者的三级决策：
//! 1. 快路径：会话最近一次应答者是学科/支持 Agent（非协调者）时直接沿用，
//!    保持话题连续，不做任何进一步决策；
//! 2. 无文本输入（纯音频/媒体轮）按课程科目查固定映射表，未知科目走兜底；
//! 3. 其余交给协调者模型，解析结构化决策；解析失败先做正则提取，再失败
//!    便退为静态致歉的通用应答。路由从不向调用方抛错。

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;

use crate::config::RoutingSection;
use crate::llm::{parse, LlmClient, LlmRequest};
use crate::model::{AgentRole, Lesson};
use crate::store::{AgentCache, Store};

/// 全部兜底路径失效时的静态应答
const APOLOGY_RESPONSE: &str =
    "I'm sorry, I had trouble understanding that. Could you say it again in a different way?";

/// 路由原因（日志与测试断言用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteReason {
    /// 会话连续性快路径
    Continuity,
    /// 无文本输入，按科目默认表
    SubjectDefault,
    /// 协调者决策
    Coordinator,
    /// 协调者自答（route_to == "self"）
    CoordinatorSelf,
    /// 正则提取兜底
    RegexFallback,
    /// 静态致歉兜底
    Apology,
}

/// 路由结论
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub responder: String,
    pub reason: RouteReason,
    /// 协调者自答或致歉兜底时的最终文本（无需再调专家）
    pub direct_response: Option<String>,
    /// 移交给专家时向学生播报的衔接语
    pub handoff_message: Option<String>,
}

/// 协调者的结构化决策
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CoordinatorDecision {
    pub route_to: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub handoff_message: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

pub struct Router {
    store: Store,
    agents: Arc<AgentCache>,
    llm: Arc<dyn LlmClient>,
    cfg: RoutingSection,
}

impl Router {
    pub fn new(
        store: Store,
        agents: Arc<AgentCache>,
        llm: Arc<dyn LlmClient>,
        cfg: RoutingSection,
    ) -> Self {
        Self {
            store,
            agents,
            llm,
            cfg,
        }
    }

    pub fn agents(&self) -> &Arc<AgentCache> {
        &self.agents
    }

    /// 决定本轮应答者。纯决策，无副作用，从不报错
    pub async fn route(
        &self,
        session_id: &str,
        message: Option<&str>,
        lesson: &Lesson,
        student_brief: &str,
    ) -> RouteOutcome {
        // 1. 连续性快路径
        if let Some(responder) = self.continuity_responder(session_id).await {
            return RouteOutcome {
                responder,
                reason: RouteReason::Continuity,
                direct_response: None,
                handoff_message: None,
            };
        }

        // 2. 纯音频/媒体轮：科目默认表
        if message.is_none() {
            let responder = self
                .cfg
                .subject_defaults
                .get(&lesson.subject.to_lowercase())
                .cloned()
                .unwrap_or_else(|| self.cfg.fallback_responder.clone());
            return RouteOutcome {
                responder,
                reason: RouteReason::SubjectDefault,
                direct_response: None,
                handoff_message: None,
            };
        }

        // 3. 协调者决策（失败全部在此吞掉）
        self.coordinator_decision(message.unwrap_or_default(), lesson, student_brief)
            .await
    }

    /// 会话最近一次应答者；非协调者即沿用
    async fn continuity_responder(&self, session_id: &str) -> Option<String> {
        let latest = match self.store.latest_interaction(session_id).await {
            Ok(latest) => latest?,
            Err(e) => {
                tracing::warn!("Continuity lookup failed: {}", e);
                return None;
            }
        };

        if latest.responder == self.cfg.coordinator {
            return None;
        }
        // 角色已知时只沿用学科/支持 Agent；未知名字按学科处理（容忍缓存落后）
        match self.agents.get(&latest.responder).await {
            Ok(Some(agent)) if agent.role == AgentRole::Coordinator => None,
            _ => Some(latest.responder),
        }
    }

    async fn coordinator_decision(
        &self,
        message: &str,
        lesson: &Lesson,
        student_brief: &str,
    ) -> RouteOutcome {
        let coordinator = match self.agents.get(&self.cfg.coordinator).await {
            Ok(Some(agent)) => agent,
            _ => return self.apology(),
        };

        let schema = serde_json::to_value(schemars::schema_for!(CoordinatorDecision))
            .unwrap_or(serde_json::Value::Null);
        let request = LlmRequest::new(
            &coordinator.model,
            format!(
                "{}\n\nStudent: {}\nLesson: {} ({}, grade {})\nDecide who should answer. \
                 Reply with JSON: route_to (agent name or \"self\"), reason, \
                 handoff_message (optional), response (required when route_to is \"self\").",
                coordinator.instructions, student_brief, lesson.title, lesson.subject, lesson.grade
            ),
            message,
        )
        .with_schema(schema);

        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Coordinator call failed, falling back: {}", e);
                return self.apology();
            }
        };

        match parse::parse_relaxed::<CoordinatorDecision>(&raw) {
            Ok(parsed) => self.outcome_from_decision(parsed.value),
            Err(_) => self.regex_fallback(&raw),
        }
    }

    fn outcome_from_decision(&self, decision: CoordinatorDecision) -> RouteOutcome {
        if decision.route_to == "self" {
            let text = decision
                .response
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| APOLOGY_RESPONSE.to_string());
            return RouteOutcome {
                responder: self.cfg.coordinator.clone(),
                reason: RouteReason::CoordinatorSelf,
                direct_response: Some(text),
                handoff_message: None,
            };
        }

        tracing::debug!(
            responder = decision.route_to.as_str(),
            reason = decision.reason.as_str(),
            "Coordinator routed turn"
        );
        RouteOutcome {
            responder: decision.route_to,
            reason: RouteReason::Coordinator,
            direct_response: None,
            handoff_message: decision.handoff_message,
        }
    }

    /// 结构化解析失败后的正则提取
    fn regex_fallback(&self, raw: &str) -> RouteOutcome {
        if let Some(route_to) = parse::extract_string_field(raw, "route_to") {
            let reason = parse::extract_string_field(raw, "reason").unwrap_or_default();
            tracing::warn!(
                responder = route_to.as_str(),
                reason = reason.as_str(),
                "Coordinator output malformed, extracted route via regex"
            );
            if route_to == "self" {
                let text = parse::extract_string_field(raw, "response")
                    .unwrap_or_else(|| APOLOGY_RESPONSE.to_string());
                return RouteOutcome {
                    responder: self.cfg.coordinator.clone(),
                    reason: RouteReason::RegexFallback,
                    direct_response: Some(text),
                    handoff_message: None,
                };
            }
            return RouteOutcome {
                responder: route_to,
                reason: RouteReason::RegexFallback,
                direct_response: None,
                handoff_message: None,
            };
        }
        self.apology()
    }

    /// 终极兜底：不路由任何专家，静态致歉文本直接作为应答
    fn apology(&self) -> RouteOutcome {
        RouteOutcome {
            responder: self.cfg.coordinator.clone(),
            reason: RouteReason::Apology,
            direct_response: Some(APOLOGY_RESPONSE.to_string()),
            handoff_message: None,
        }
    }
}
