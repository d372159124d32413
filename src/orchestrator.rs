//! 回合编排
//!
//! 一轮完整链路：组装上下文 → 路由 → 生成（带缓存句柄）→
//! 可选的渐进语音合成 → 标记已消费的修正 → 旁路派发校验、
//! 交互日志与证据落库。生成失败只给学生一句通用致歉，课程缺失
//! 是唯一向调用方传播的致命错误。

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use tokio::sync::mpsc;

use crate::cache::InstructionCacheManager;
use crate::config::SynthesisSection;
use crate::context::{AssembledContext, ContextAssembler};
use crate::error::SageError;
use crate::mastery::{MasteryCalculator, MasteryVerdict};
use crate::model::{Agent, EvidenceKind, EvidenceRecord, Interaction, TurnRequest, TutorResponse};
use crate::response::{EvidenceAnnotation, GeneratedReply, ResponseFacade};
use crate::router::{RouteReason, Router};
use crate::synthesis::{ProgressivePipeline, SpeechClient, SynthesisOutcome};
use crate::tasks::BackgroundRunner;
use crate::validator::Validator;

const APOLOGY: &str =
    "I'm sorry, something went wrong on my side. Could you ask me that again?";

/// 一轮的产出
#[derive(Debug)]
pub struct TurnOutput {
    pub response: TutorResponse,
    /// speak 请求时的合成音频
    pub audio: Option<Vec<u8>>,
    pub route_reason: RouteReason,
    /// 模型自报完课时的规则判定（权威结论）
    pub mastery_verdict: Option<MasteryVerdict>,
}

pub struct TurnEngine {
    store: crate::store::Store,
    assembler: ContextAssembler,
    router: Router,
    facade: ResponseFacade,
    validator: Arc<Validator>,
    mastery: Arc<MasteryCalculator>,
    cache: Arc<InstructionCacheManager>,
    speech: Arc<dyn SpeechClient>,
    synthesis_cfg: SynthesisSection,
    runner: BackgroundRunner,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: crate::store::Store,
        assembler: ContextAssembler,
        router: Router,
        facade: ResponseFacade,
        validator: Arc<Validator>,
        mastery: Arc<MasteryCalculator>,
        cache: Arc<InstructionCacheManager>,
        speech: Arc<dyn SpeechClient>,
        synthesis_cfg: SynthesisSection,
        runner: BackgroundRunner,
    ) -> Self {
        Self {
            store,
            assembler,
            router,
            facade,
            validator,
            mastery,
            cache,
            speech,
            synthesis_cfg,
            runner,
        }
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutput, SageError> {
        let ctx = self.assembler.assemble(&request).await?;
        let message = request.message.clone().unwrap_or_default();

        let route = self
            .router
            .route(
                &request.session_id,
                request.message.as_deref(),
                &ctx.lesson,
                &ctx.student_brief,
            )
            .await;
        tracing::info!(
            session_id = %request.session_id,
            responder = %route.responder,
            reason = ?route.reason,
            "Turn routed"
        );

        // 协调者自答 / 致歉兜底：不经专家生成，也不进校验
        if let Some(text) = route.direct_response {
            let response = TutorResponse {
                speech_text: text.clone(),
                display_text: text,
                diagram: None,
                lesson_complete: false,
                responder: route.responder.clone(),
            };
            let audio = if request.speak {
                self.full_synthesis(&response.speech_text).await
            } else {
                None
            };
            self.log_interaction(&request, &message, &response);
            return Ok(TurnOutput {
                response,
                audio,
                route_reason: route.reason,
                mastery_verdict: None,
            });
        }

        let agent = match self.router.agents().get(&route.responder).await {
            Ok(Some(agent)) => agent,
            _ => {
                tracing::error!(responder = %route.responder, "Routed agent not found");
                return Ok(self.apology_output(&request, &message, route.reason).await);
            }
        };

        let mut prompt = ctx.prompt.clone();
        if let Some(handoff) = &route.handoff_message {
            prompt.push_str(&format!("\n[HANDOFF]\n{}\n", handoff));
        }

        let cache_handle = self
            .cache
            .handle_for(&agent.model, &agent.instructions)
            .await;

        let (reply, audio) = if request.speak {
            self.generate_spoken(&agent, &prompt, &message, &request, cache_handle)
                .await
        } else {
            match self
                .facade
                .generate(&agent, &prompt, &message, request.media.clone(), cache_handle)
                .await
            {
                Ok(reply) => (Some(reply), None),
                Err(e) => {
                    tracing::error!("Generation failed: {}", e);
                    (None, None)
                }
            }
        };

        let Some(reply) = reply else {
            return Ok(self.apology_output(&request, &message, route.reason).await);
        };

        // 修正已随本应答交付
        if let Some(correction) = &ctx.consumed_correction {
            match self.store.mark_correction_delivered(&correction.id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(id = %correction.id, "Correction already delivered")
                }
                Err(e) => tracing::error!("Failed to mark correction delivered: {}", e),
            }
        }

        let mastery_verdict = if reply.response.lesson_complete {
            self.authoritative_verdict(&request, &ctx).await
        } else {
            None
        };

        self.dispatch_side_effects(&request, &message, &reply);

        Ok(TurnOutput {
            response: reply.response,
            audio,
            route_reason: route.reason,
            mastery_verdict,
        })
    }

    /// 流式生成并联动渐进合成：片段一边累积成完整载荷，
    /// 一边喂给流水线提取可朗读句
    async fn generate_spoken(
        &self,
        agent: &Agent,
        prompt: &str,
        message: &str,
        request: &TurnRequest,
        cache_handle: Option<String>,
    ) -> (Option<GeneratedReply>, Option<Vec<u8>>) {
        let mut fragments = match self
            .facade
            .generate_stream(agent, prompt, message, request.media.clone(), cache_handle)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Stream generation failed: {}", e);
                return (None, None);
            }
        };

        let (tx, rx) = mpsc::channel::<String>(64);
        let pipeline =
            ProgressivePipeline::new(self.speech.clone(), self.synthesis_cfg.clone());
        let pipeline_task = tokio::spawn(async move {
            let input = Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|fragment| (fragment, rx))
            }));
            pipeline.run(input).await
        });

        let mut full = String::new();
        let mut stream_failed = false;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    full.push_str(&fragment);
                    // 流水线侧挂掉也不影响文本累积
                    let _ = tx.send(fragment).await;
                }
                Err(e) => {
                    tracing::error!("Stream broke mid-generation: {}", e);
                    stream_failed = true;
                    break;
                }
            }
        }
        drop(tx);

        let outcome = match pipeline_task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Synthesis pipeline panicked: {}", e);
                SynthesisOutcome::FallbackToFull
            }
        };

        if stream_failed && full.is_empty() {
            return (None, None);
        }

        let reply = self.facade.normalize(&full, &agent.name);
        if reply.response.speech_text.is_empty() && reply.response.display_text.is_empty() {
            return (None, None);
        }

        let audio = match outcome {
            SynthesisOutcome::Audio(bytes) if !bytes.is_empty() => Some(bytes),
            _ => self.full_synthesis(&reply.response.speech_text).await,
        };
        (Some(reply), audio)
    }

    /// 单次全文合成（渐进回退路径与直接应答共用）
    async fn full_synthesis(&self, text: &str) -> Option<Vec<u8>> {
        if text.is_empty() {
            return None;
        }
        match self
            .speech
            .synthesize(text, &self.synthesis_cfg.voice)
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::error!("Full synthesis failed, delivering text only: {}", e);
                None
            }
        }
    }

    /// 模型自报完课只是线索，规则判定才是权威结论
    async fn authoritative_verdict(
        &self,
        request: &TurnRequest,
        ctx: &AssembledContext,
    ) -> Option<MasteryVerdict> {
        match self
            .mastery
            .determine_mastery(
                &request.student_id,
                &request.lesson_id,
                &ctx.lesson.subject,
                &ctx.lesson.grade,
                request.session_started_at,
            )
            .await
        {
            Ok(verdict) => {
                // 留存进度分，作为下次无答题证据时的回退值
                let store = self.store.clone();
                let student_id = request.student_id.clone();
                let lesson_id = request.lesson_id.clone();
                let progress = ctx.mastery as f64;
                self.runner.spawn("progress", async move {
                    store.set_progress(&student_id, &lesson_id, progress).await
                });
                Some(verdict)
            }
            Err(e) => {
                tracing::error!("Mastery determination failed: {}", e);
                None
            }
        }
    }

    /// 旁路副作用：校验、交互日志、证据落库 + 掌握度缓存失效
    fn dispatch_side_effects(&self, request: &TurnRequest, message: &str, reply: &GeneratedReply) {
        let validator = self.validator.clone();
        let session_id = request.session_id.clone();
        let responder = reply.response.responder.clone();
        let user_message = message.to_string();
        let response_text = reply.response.display_text.clone();
        self.runner.spawn("validator", async move {
            validator
                .review(&session_id, &responder, &user_message, &response_text)
                .await;
            Ok::<(), SageError>(())
        });

        self.log_interaction(request, message, &reply.response);

        if !reply.evidence.is_empty() {
            let store = self.store.clone();
            let mastery = self.mastery.clone();
            let records = build_evidence(request, &reply.evidence);
            let student_id = request.student_id.clone();
            let lesson_id = request.lesson_id.clone();
            self.runner.spawn("evidence", async move {
                for record in &records {
                    store.insert_evidence(record).await?;
                }
                mastery.invalidate(&student_id, &lesson_id).await;
                Ok::<(), sqlx::Error>(())
            });
        }
    }

    fn log_interaction(&self, request: &TurnRequest, message: &str, response: &TutorResponse) {
        let store = self.store.clone();
        let interaction = Interaction::new(
            &request.session_id,
            message,
            &response.display_text,
            &response.responder,
        );
        self.runner.spawn("interaction-log", async move {
            store.append_interaction(&interaction).await
        });
    }

    async fn apology_output(
        &self,
        request: &TurnRequest,
        message: &str,
        route_reason: RouteReason,
    ) -> TurnOutput {
        let response = TutorResponse {
            speech_text: APOLOGY.to_string(),
            display_text: APOLOGY.to_string(),
            diagram: None,
            lesson_complete: false,
            responder: "system".to_string(),
        };
        let audio = if request.speak {
            self.full_synthesis(APOLOGY).await
        } else {
            None
        };
        self.log_interaction(request, message, &response);
        TurnOutput {
            response,
            audio,
            route_reason,
            mastery_verdict: None,
        }
    }
}

fn build_evidence(
    request: &TurnRequest,
    annotations: &[EvidenceAnnotation],
) -> Vec<EvidenceRecord> {
    annotations
        .iter()
        .filter_map(|a| {
            let Some(kind) = EvidenceKind::parse(&a.kind) else {
                tracing::warn!(kind = %a.kind, "Unknown evidence kind, dropping annotation");
                return None;
            };
            let mut record = EvidenceRecord::new(
                &request.student_id,
                &request.lesson_id,
                &request.session_id,
                kind,
            );
            if let Some(q) = a.quality {
                record = record.with_quality(q);
            }
            if let Some(c) = a.confidence {
                record = record.with_confidence(c);
            }
            if let Some(topic) = &a.topic {
                record = record.with_topic(topic.clone());
            }
            Some(record)
        })
        .collect()
}
