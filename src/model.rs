//! 核心数据模型
//!
//! 持久化实体（Agent / Interaction / EvidenceRecord / PendingCorrection）与
//! 每轮派生的临时值对象（AdaptiveDirectives / TutorResponse）。
//! EvidenceRecord 与 Interaction 为追加式，写入后不可变。

use serde::{Deserialize, Serialize};

/// Agent 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentRole {
    /// 协调者：负责路由决策，也可直接应答
    Coordinator,
    /// 学科专家
    Subject,
    /// 支持角色（鼓励、答疑等非学科应答者）
    Support,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Coordinator => "coordinator",
            AgentRole::Subject => "subject",
            AgentRole::Support => "support",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "coordinator" => AgentRole::Coordinator,
            "support" => AgentRole::Support,
            _ => AgentRole::Subject,
        }
    }
}

/// Agent 能力标志
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentCapabilities {
    /// 可接收音频输入
    pub audio_input: bool,
    /// 可输出图示标记
    pub diagram_output: bool,
}

/// 教学 Agent：加载后不可变，按 TTL 从存储刷新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub role: AgentRole,
    /// 模型标识（决定缓存分组）
    pub model: String,
    /// 静态教学指令（进入指令缓存的内容）
    pub instructions: String,
    /// 学科专家对应的科目
    pub subject: Option<String>,
    pub capabilities: AgentCapabilities,
}

/// 单次交互（追加式日志，created_at 毫秒时间戳定义会话顺序）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub session_id: String,
    pub user_message: String,
    pub agent_response: String,
    pub responder: String,
    pub created_at: i64,
}

impl Interaction {
    pub fn new(
        session_id: impl Into<String>,
        user_message: impl Into<String>,
        agent_response: impl Into<String>,
        responder: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("int_{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            user_message: user_message.into(),
            agent_response: agent_response.into(),
            responder: responder.into(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 证据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceKind {
    CorrectAnswer,
    IncorrectAnswer,
    Explanation,
    Application,
    Struggle,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::CorrectAnswer => "correct_answer",
            EvidenceKind::IncorrectAnswer => "incorrect_answer",
            EvidenceKind::Explanation => "explanation",
            EvidenceKind::Application => "application",
            EvidenceKind::Struggle => "struggle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "correct_answer" => Some(EvidenceKind::CorrectAnswer),
            "incorrect_answer" => Some(EvidenceKind::IncorrectAnswer),
            "explanation" => Some(EvidenceKind::Explanation),
            "application" => Some(EvidenceKind::Application),
            "struggle" => Some(EvidenceKind::Struggle),
            _ => None,
        }
    }
}

/// 学习证据（写入后不可变，只做聚合）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: String,
    pub student_id: String,
    pub lesson_id: String,
    pub session_id: String,
    pub kind: EvidenceKind,
    /// 质量分 [0,100]
    pub quality_score: f64,
    /// 置信度 [0,1]
    pub confidence: f64,
    /// 主题/上下文标签
    pub topic: Option<String>,
    pub created_at: i64,
}

impl EvidenceRecord {
    pub fn new(
        student_id: impl Into<String>,
        lesson_id: impl Into<String>,
        session_id: impl Into<String>,
        kind: EvidenceKind,
    ) -> Self {
        Self {
            id: format!("ev_{}", uuid::Uuid::new_v4()),
            student_id: student_id.into(),
            lesson_id: lesson_id.into(),
            session_id: session_id.into(),
            kind,
            quality_score: 0.0,
            confidence: 1.0,
            topic: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality_score = score;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }
}

/// 待修正记录的状态：唯一允许的迁移是 Pending → Delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrectionStatus {
    Pending,
    Delivered,
}

impl CorrectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionStatus::Pending => "pending",
            CorrectionStatus::Delivered => "delivered",
        }
    }
}

/// 质检拒绝后排队的修正记录（交付后保留，作为审计痕迹）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCorrection {
    pub id: String,
    pub session_id: String,
    pub responder: String,
    /// 被拒应答的快照
    pub original_response: String,
    pub issues: Vec<String>,
    pub required_fixes: Vec<String>,
    pub status: CorrectionStatus,
    pub created_at: i64,
}

impl PendingCorrection {
    pub fn new(
        session_id: impl Into<String>,
        responder: impl Into<String>,
        original_response: impl Into<String>,
        issues: Vec<String>,
        required_fixes: Vec<String>,
    ) -> Self {
        Self {
            id: format!("cor_{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            responder: responder.into(),
            original_response: original_response.into(),
            issues,
            required_fixes,
            status: CorrectionStatus::Pending,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 学生画像
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    pub grade: String,
    /// 声明的学习风格（visual / auditory / kinesthetic / reading_writing / logical / social / solitary）
    pub learning_style: Option<String>,
    pub strengths: Vec<String>,
    pub struggles: Vec<String>,
}

/// 课程元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub subject: String,
    pub grade: String,
    pub title: String,
    pub topic: String,
}

/// 鼓励强度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncouragementLevel {
    High,
    Standard,
    Minimal,
}

impl EncouragementLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncouragementLevel::High => "high",
            EncouragementLevel::Standard => "standard",
            EncouragementLevel::Minimal => "minimal",
        }
    }
}

/// 每轮派生的教学指令（临时值对象，不持久化，仅 debug 日志留痕）
#[derive(Debug, Clone, Default, Serialize)]
pub struct AdaptiveDirectives {
    pub style_instructions: Option<String>,
    pub difficulty_instructions: String,
    pub scaffolding_instructions: String,
    pub phase_guidance: String,
    pub strength_notes: Vec<String>,
    pub struggle_notes: Vec<String>,
    pub encouragement: Option<EncouragementLevel>,
    /// 本轮计算出的掌握度 [0,100]
    pub mastery: u8,
}

/// 学生输入中的媒体载荷（音频/图像）
#[derive(Debug, Clone)]
pub struct MediaPart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// 一轮辅导的入参（由外层请求处理层提供）
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub student_id: String,
    pub lesson_id: String,
    /// 文本输入；纯音频/媒体轮次为 None
    pub message: Option<String>,
    pub media: Vec<MediaPart>,
    /// 是否需要语音输出（触发渐进式合成）
    pub speak: bool,
    /// 会话开始时间（毫秒时间戳），用于掌握度判定的时长标准
    pub session_started_at: i64,
}

/// 规范化后的结构化应答
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TutorResponse {
    /// 朗读文本（渐进合成的输入）
    pub speech_text: String,
    /// 展示文本
    pub display_text: String,
    /// 提取出的图示标记（如有）
    pub diagram: Option<String>,
    /// 模型自报的课程完成标志（与规则判定的掌握度判据相互独立）
    pub lesson_complete: bool,
    pub responder: String,
}
