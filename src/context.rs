//! 上下文组装
//!
//! 并行加载相互独立的数据（画像 / 最近交互 / 课程 / 当前应答者 / 掌握度 /
//! 待修正记录），再按固定顺序拼接请求上下文：掌握度标签 → 自我修正块 →
//! 教学指令块 → 画像/历史/课程 → 学生消息（作为请求的 user 字段）。
//! 历史读取失败降级为空历史（非致命）；课程读取失败直接中止本轮。
//! 每轮至多消费一条修正记录，交付标记由调用方在应答生成后执行。

use std::sync::Arc;

use crate::adapt::{self, DirectiveGenerator};
use crate::error::SageError;
use crate::mastery::MasteryCalculator;
use crate::model::{
    AdaptiveDirectives, Interaction, Lesson, PendingCorrection, StudentProfile, TurnRequest,
};
use crate::store::Store;

/// 组装结果：上下文串 + 本轮决策所需的派生数据
#[derive(Debug)]
pub struct AssembledContext {
    /// 注入模型的系统/上下文字符串
    pub prompt: String,
    pub lesson: Lesson,
    pub profile: Option<StudentProfile>,
    pub history: Vec<Interaction>,
    pub mastery: u8,
    pub directives: AdaptiveDirectives,
    /// 本轮消费的修正记录（生成后由调用方标记交付）
    pub consumed_correction: Option<PendingCorrection>,
    /// 路由器使用的一行学生概要
    pub student_brief: String,
}

pub struct ContextAssembler {
    store: Store,
    mastery: Arc<MasteryCalculator>,
    directives: DirectiveGenerator,
    history_window: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Store,
        mastery: Arc<MasteryCalculator>,
        directives: DirectiveGenerator,
        history_window: usize,
    ) -> Self {
        Self {
            store,
            mastery,
            directives,
            history_window,
        }
    }

    pub async fn assemble(&self, request: &TurnRequest) -> Result<AssembledContext, SageError> {
        let (profile_res, history_res, lesson_res, correction_res, mastery_res) = tokio::join!(
            self.store.get_profile(&request.student_id),
            self.store
                .recent_interactions(&request.session_id, self.history_window),
            self.store.get_lesson(&request.lesson_id),
            self.store.oldest_pending_correction(&request.session_id),
            self.mastery
                .compute_mastery(&request.student_id, &request.lesson_id),
        );

        // 课程缺失对整轮致命
        let lesson = lesson_res?
            .ok_or_else(|| SageError::LessonNotFound(request.lesson_id.clone()))?;

        let profile = profile_res.unwrap_or_else(|e| {
            tracing::warn!("Profile lookup failed, continuing without profile: {}", e);
            None
        });
        let history = history_res.unwrap_or_else(|e| {
            tracing::warn!("History lookup failed, continuing with empty history: {}", e);
            Vec::new()
        });
        let consumed_correction = correction_res.unwrap_or_else(|e| {
            tracing::warn!("Correction lookup failed, skipping this turn: {}", e);
            None
        });
        let mastery = mastery_res.unwrap_or_else(|e| {
            tracing::warn!("Mastery read failed, using neutral score: {}", e);
            50
        });

        let directives = self.directives.generate(profile.as_ref(), &history, mastery);

        let prompt = build_prompt(
            mastery,
            consumed_correction.as_ref(),
            &directives,
            profile.as_ref(),
            &history,
            &lesson,
        );

        let student_brief = profile
            .as_ref()
            .map(|p| format!("{} (grade {})", p.name, p.grade))
            .unwrap_or_else(|| request.student_id.clone());

        Ok(AssembledContext {
            prompt,
            lesson,
            profile,
            history,
            mastery,
            directives,
            consumed_correction,
            student_brief,
        })
    }
}

fn build_prompt(
    mastery: u8,
    correction: Option<&PendingCorrection>,
    directives: &AdaptiveDirectives,
    profile: Option<&StudentProfile>,
    history: &[Interaction],
    lesson: &Lesson,
) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!("[MASTERY: {}/100]\n\n", mastery));

    if let Some(c) = correction {
        prompt.push_str("[SELF-CORRECTION REQUIRED]\n");
        prompt.push_str(
            "Your previous response contained errors. Before answering the new question, \
             briefly acknowledge and correct the earlier mistake.\n",
        );
        prompt.push_str(&format!("Previous response: {}\n", c.original_response));
        if !c.issues.is_empty() {
            prompt.push_str(&format!("Issues: {}\n", c.issues.join("; ")));
        }
        if !c.required_fixes.is_empty() {
            prompt.push_str(&format!("Required fixes: {}\n", c.required_fixes.join("; ")));
        }
        prompt.push('\n');
    }

    prompt.push_str(&adapt::render(directives));
    prompt.push('\n');

    if let Some(p) = profile {
        prompt.push_str(&format!("[STUDENT]\n{}, grade {}\n", p.name, p.grade));
        if let Some(style) = &p.learning_style {
            prompt.push_str(&format!("Learning style: {}\n", style));
        }
        prompt.push('\n');
    }

    if !history.is_empty() {
        prompt.push_str("[RECENT CONVERSATION]\n");
        for interaction in history {
            prompt.push_str(&format!(
                "Student: {}\n{}: {}\n",
                interaction.user_message, interaction.responder, interaction.agent_response
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "[LESSON]\n{} — {} (subject: {}, grade {})\n",
        lesson.title, lesson.topic, lesson.subject, lesson.grade
    ));

    prompt
}
