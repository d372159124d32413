//! 掌握度：证据聚合计算与规则判定

pub mod calculator;
pub mod rules;

pub use calculator::MasteryCalculator;
pub use rules::{EvidenceSummary, MasteryCriteria, MasteryRules, MasteryVerdict};
