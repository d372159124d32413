//! 自适应教学指令生成
//!
//! (画像, 近期交互, 当前掌握度) 的纯函数，三条独立轴各产出一段注入上游的
//! 自然语言指令：风格轴（声明的学习风格 → 固定指令包）、难度轴（掌握度
//! 阈值 50/80）、脚手架轴（挣扎短语占比阈值 0.2/0.4）。画像中的已知强项
//! 与薄弱点在任意轴之外追加利用/预判提示。生成器不改任何状态，输出用完
//! 即弃，仅 debug 日志留痕。

use crate::model::{AdaptiveDirectives, EncouragementLevel, Interaction, StudentProfile};

/// 指令生成器：持有小写化的挣扎短语表
pub struct DirectiveGenerator {
    struggle_indicators: Vec<String>,
}

impl DirectiveGenerator {
    pub fn new(struggle_indicators: Vec<String>) -> Self {
        Self {
            struggle_indicators: struggle_indicators
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    /// 生成本轮指令
    pub fn generate(
        &self,
        profile: Option<&StudentProfile>,
        recent: &[Interaction],
        mastery: u8,
    ) -> AdaptiveDirectives {
        let ratio = self.struggle_ratio(recent);
        let (scaffolding, encouragement) = scaffolding_for(ratio);
        let (difficulty, phase) = difficulty_for(mastery);

        let style = profile
            .and_then(|p| p.learning_style.as_deref())
            .and_then(style_bundle);

        let (strength_notes, struggle_notes) = profile
            .map(|p| {
                (
                    p.strengths
                        .iter()
                        .map(|s| format!("Leverage the student's strength in {} when introducing new ideas.", s))
                        .collect(),
                    p.struggles
                        .iter()
                        .map(|s| format!("Anticipate difficulty with {}; pre-empt it with a worked example.", s))
                        .collect(),
                )
            })
            .unwrap_or_default();

        let directives = AdaptiveDirectives {
            style_instructions: style.map(String::from),
            difficulty_instructions: difficulty.to_string(),
            scaffolding_instructions: scaffolding.to_string(),
            phase_guidance: phase.to_string(),
            strength_notes,
            struggle_notes,
            encouragement: Some(encouragement),
            mastery,
        };

        tracing::debug!(
            mastery,
            struggle_ratio = ratio,
            encouragement = encouragement.as_str(),
            "Generated adaptive directives"
        );
        directives
    }

    /// 近期交互中命中挣扎短语的占比
    pub fn struggle_ratio(&self, recent: &[Interaction]) -> f64 {
        if recent.is_empty() {
            return 0.0;
        }
        let hits = recent
            .iter()
            .filter(|i| {
                let text = i.user_message.to_lowercase();
                self.struggle_indicators.iter().any(|p| text.contains(p))
            })
            .count();
        hits as f64 / recent.len() as f64
    }
}

/// 难度轴：掌握度 <50 简化模式，50..80 标准节奏，>=80 加速模式
fn difficulty_for(mastery: u8) -> (&'static str, &'static str) {
    if mastery < 50 {
        (
            "SIMPLIFICATION MODE: break every concept into the smallest possible steps. \
             Give at least 3 worked examples before asking the student to try. \
             Verify understanding after every single step.",
            "Do not compress any teaching phase. Move on only after the current phase is secure.",
        )
    } else if mastery < 80 {
        (
            "Standard pacing: teach at the usual depth, one concept at a time, \
             with a check question after each concept.",
            "Follow the normal phase sequence without compression.",
        )
    } else {
        (
            "ACCELERATION MODE: the student is ahead. Compress the early phases, \
             skip redundant warm-ups, and pose harder questions.",
            "Early phases may be compressed; later phases must never be compressed.",
        )
    }
}

/// 脚手架轴：r > 0.4 最大脚手架，0.2 < r <= 0.4 标准，否则最小
fn scaffolding_for(ratio: f64) -> (&'static str, EncouragementLevel) {
    if ratio > 0.4 {
        (
            "MAXIMUM SCAFFOLDING: provide hints before the student asks, model the first \
             step of every exercise, and celebrate every partial success.",
            EncouragementLevel::High,
        )
    } else if ratio > 0.2 {
        (
            "Standard scaffolding: offer a hint when the student stalls, \
             otherwise let them work.",
            EncouragementLevel::Standard,
        )
    } else {
        (
            "Minimal scaffolding: let the student drive; intervene only on request.",
            EncouragementLevel::Minimal,
        )
    }
}

/// 风格轴：声明的学习风格 → 固定指令包；未声明则不产出该块
fn style_bundle(style: &str) -> Option<&'static str> {
    match style.to_lowercase().as_str() {
        "visual" => Some(
            "Visual learner: describe diagrams, use spatial language, and emit a diagram \
             block whenever the concept has a visual structure.",
        ),
        "auditory" => Some(
            "Auditory learner: favor spoken explanation, rhythm and repetition; \
             read key formulas aloud in words.",
        ),
        "kinesthetic" => Some(
            "Kinesthetic learner: anchor every concept in a physical action or \
             manipulable object the student can imagine handling.",
        ),
        "reading_writing" | "reading-writing" => Some(
            "Reading/writing learner: provide concise written summaries and ask the \
             student to restate ideas in their own words.",
        ),
        "logical" => Some(
            "Logical learner: lead with the underlying rule or pattern, then derive \
             examples from it; make every step's justification explicit.",
        ),
        "social" => Some(
            "Social learner: frame exercises as dialogue, role-play explaining the \
             concept to a friend.",
        ),
        "solitary" => Some(
            "Solitary learner: give the student quiet thinking time; pose a question \
             and wait rather than filling silence.",
        ),
        _ => None,
    }
}

/// 渲染为注入上游的指令块
pub fn render(directives: &AdaptiveDirectives) -> String {
    let mut block = String::from("[TEACHING DIRECTIVES]\n");
    if let Some(style) = &directives.style_instructions {
        block.push_str(style);
        block.push('\n');
    }
    block.push_str(&directives.difficulty_instructions);
    block.push('\n');
    block.push_str(&directives.phase_guidance);
    block.push('\n');
    block.push_str(&directives.scaffolding_instructions);
    block.push('\n');
    if let Some(level) = directives.encouragement {
        block.push_str(&format!("Encouragement level: {}.\n", level.as_str()));
    }
    for note in &directives.strength_notes {
        block.push_str(note);
        block.push('\n');
    }
    for note in &directives.struggle_notes {
        block.push_str(note);
        block.push('\n');
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DirectivesSection;

    fn generator() -> DirectiveGenerator {
        DirectiveGenerator::new(DirectivesSection::default().struggle_indicators)
    }

    fn interaction(user: &str) -> Interaction {
        Interaction::new("sess1", user, "ok", "math_tutor")
    }

    fn profile(style: Option<&str>) -> StudentProfile {
        StudentProfile {
            student_id: "s1".to_string(),
            name: "Ada".to_string(),
            grade: "5".to_string(),
            learning_style: style.map(String::from),
            strengths: vec!["patterns".to_string()],
            struggles: vec!["fractions".to_string()],
        }
    }

    #[test]
    fn test_struggle_ratio_counts_matching_turns() {
        let gen = generator();
        let recent = vec![
            interaction("I don't understand this"),
            interaction("ok got it"),
            interaction("this is hard"),
            interaction("next one please"),
        ];
        assert!((gen.struggle_ratio(&recent) - 0.5).abs() < f64::EPSILON);
        assert_eq!(gen.struggle_ratio(&[]), 0.0);
    }

    #[test]
    fn test_encouragement_boundaries_exact() {
        // r > 0.4 => high；r = 0.4 仍是 standard；r = 0.2 是 minimal
        assert_eq!(scaffolding_for(0.41).1, EncouragementLevel::High);
        assert_eq!(scaffolding_for(0.4).1, EncouragementLevel::Standard);
        assert_eq!(scaffolding_for(0.21).1, EncouragementLevel::Standard);
        assert_eq!(scaffolding_for(0.2).1, EncouragementLevel::Minimal);
        assert_eq!(scaffolding_for(0.0).1, EncouragementLevel::Minimal);
    }

    #[test]
    fn test_difficulty_thresholds() {
        assert!(difficulty_for(49).0.contains("SIMPLIFICATION"));
        assert!(difficulty_for(50).0.contains("Standard pacing"));
        assert!(difficulty_for(79).0.contains("Standard pacing"));
        assert!(difficulty_for(80).0.contains("ACCELERATION"));
    }

    #[test]
    fn test_low_mastery_high_struggle_visual_bundle() {
        let gen = generator();
        // 一半轮次命中挣扎短语 => ratio 0.5
        let recent = vec![
            interaction("i'm stuck"),
            interaction("i'm confused"),
            interaction("ok"),
            interaction("sure"),
        ];
        let p = profile(Some("visual"));
        let d = gen.generate(Some(&p), &recent, 30);

        assert!(d.difficulty_instructions.contains("SIMPLIFICATION"));
        assert!(!d.difficulty_instructions.contains("ACCELERATION"));
        assert!(d.scaffolding_instructions.contains("MAXIMUM SCAFFOLDING"));
        assert!(d.style_instructions.as_deref().unwrap().contains("Visual learner"));
        assert_eq!(d.encouragement, Some(EncouragementLevel::High));

        let block = render(&d);
        assert!(block.contains("MAXIMUM SCAFFOLDING"));
        assert!(block.contains("strength in patterns"));
        assert!(block.contains("difficulty with fractions"));
    }

    #[test]
    fn test_no_declared_style_emits_no_style_block() {
        let gen = generator();
        let p = profile(None);
        let d = gen.generate(Some(&p), &[], 60);
        assert!(d.style_instructions.is_none());
        assert_eq!(d.encouragement, Some(EncouragementLevel::Minimal));
    }
}
