//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SAGE__*` 覆盖（双下划线表示嵌套，
//! 如 `SAGE__VALIDATOR__TIMEOUT_SECS=15`）。所有段均有默认值，配置文件缺失时可直接运行。

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::SageError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub routing: RoutingSection,
    pub mastery: MasterySection,
    pub directives: DirectivesSection,
    pub validator: ValidatorSection,
    pub synthesis: SynthesisSection,
    pub cache: CacheSection,
}

/// [app] 段：历史窗口与数据库路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// SQLite 数据库路径，未设置时用 ./sage.db
    pub db_path: Option<String>,
    /// 组装上下文时读取的最近交互条数
    pub history_window: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            db_path: None,
            history_window: default_history_window(),
        }
    }
}

fn default_history_window() -> usize {
    10
}

/// [llm] 段：生成后端与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    /// 默认模型（Agent 未指定时使用）
    pub model: String,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 流式请求超时（秒）
    pub stream_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "sage-tutor-1".to_string(),
            request_timeout_secs: 60,
            stream_timeout_secs: 120,
        }
    }
}

/// [routing] 段：科目到默认应答者的映射与兜底
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// 协调者 Agent 名称
    pub coordinator: String,
    /// 无文本输入时按课程科目查此表
    pub subject_defaults: HashMap<String, String>,
    /// 未知科目的兜底应答者
    pub fallback_responder: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        let mut subject_defaults = HashMap::new();
        subject_defaults.insert("math".to_string(), "math_tutor".to_string());
        subject_defaults.insert("science".to_string(), "science_tutor".to_string());
        subject_defaults.insert("english".to_string(), "english_tutor".to_string());
        Self {
            coordinator: "coordinator".to_string(),
            subject_defaults,
            fallback_responder: "general_tutor".to_string(),
        }
    }
}

/// [mastery] 段：读缓存 TTL
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasterySection {
    /// 掌握度读缓存保留时间（秒）；纯读性能优化，证据写入会使其失效
    pub cache_ttl_secs: u64,
}

impl Default for MasterySection {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

/// [directives] 段：挣扎短语表（脚手架轴的匹配依据）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectivesSection {
    pub struggle_indicators: Vec<String>,
}

impl Default for DirectivesSection {
    fn default() -> Self {
        Self {
            struggle_indicators: vec![
                "i don't understand".to_string(),
                "don't get it".to_string(),
                "i'm confused".to_string(),
                "confused".to_string(),
                "this is hard".to_string(),
                "too hard".to_string(),
                "i'm stuck".to_string(),
                "i give up".to_string(),
                "can you explain again".to_string(),
            ],
        }
    }
}

/// [validator] 段：二次质检
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorSection {
    /// 质检调用超时（秒）；超时即自动通过（fail-open）
    pub timeout_secs: u64,
    /// 质检使用的模型（与应答模型分离，避免自我认同）
    pub model: String,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            model: "sage-validator-1".to_string(),
        }
    }
}

/// [synthesis] 段：渐进式语音合成
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisSection {
    /// 同时在途的合成调用上限
    pub max_concurrent: usize,
    /// 合成失败次数达到该值后整轮回退为单次全文合成
    pub failure_threshold: u32,
    /// 单个合成块的字符上限，超长句按标点或空白再切
    pub max_chunk_chars: usize,
    /// 合成文本字节预算（下游硬限制）
    pub max_text_bytes: usize,
    /// 默认音色
    pub voice: String,
    /// 流式响应里承载朗读文本的字段名
    pub speech_field: String,
}

impl Default for SynthesisSection {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            failure_threshold: 3,
            max_chunk_chars: 200,
            max_text_bytes: 5000,
            voice: "warm".to_string(),
            speech_field: "speech_text".to_string(),
        }
    }
}

/// [cache] 段：静态教学材料缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// 缓存完整生命周期（秒）
    pub ttl_secs: u64,
    /// 超过该年龄即后台续期（秒）
    pub renew_after_secs: u64,
    /// Agent 定义的内存缓存刷新周期（秒）
    pub agent_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: 7200,
            renew_after_secs: 5400,
            agent_ttl_secs: 300,
        }
    }
}

/// 加载配置：config/default.toml（可缺省）+ SAGE__ 环境变量覆盖
pub fn load_config() -> Result<AppConfig, SageError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config/default").required(false))
        .add_source(config::Environment::with_prefix("SAGE").separator("__"));

    let cfg = builder
        .build()
        .map_err(|e| SageError::Config(e.to_string()))?;

    cfg.try_deserialize()
        .map_err(|e| SageError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.history_window, 10);
        assert_eq!(cfg.validator.timeout_secs, 10);
        assert_eq!(cfg.synthesis.max_concurrent, 3);
        assert_eq!(cfg.synthesis.failure_threshold, 3);
        assert_eq!(cfg.cache.ttl_secs, 7200);
        assert!(cfg.cache.renew_after_secs < cfg.cache.ttl_secs);
        assert!(!cfg.directives.struggle_indicators.is_empty());
    }

    #[test]
    fn test_subject_defaults_cover_core_subjects() {
        let cfg = RoutingSection::default();
        assert_eq!(cfg.subject_defaults.get("math").unwrap(), "math_tutor");
        assert_eq!(cfg.fallback_responder, "general_tutor");
    }
}
