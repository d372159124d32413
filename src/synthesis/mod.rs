//! 语音合成：增量句子提取 + 有界并发的渐进合成流水线

pub mod extract;
pub mod pipeline;
pub mod tts;

pub use extract::{split_chunk, SentenceExtractor};
pub use pipeline::{ProgressivePipeline, SynthesisOutcome};
pub use tts::{HttpSpeechClient, MockSpeechClient, SpeechClient};
