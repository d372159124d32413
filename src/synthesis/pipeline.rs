//! 渐进合成流水线
//!
//! 消费流式片段，边提取完成句边发起合成调用：Semaphore 限制在途
//! 并发（到达上限时提取侧等待），每块带序号入 JoinSet，完成后按
//! 序号重组，绝不按完成顺序拼接。失败计数达到阈值后停发新调用，
//! 整轮以 FallbackToFull 信号收场，由调用方做单次全文合成。

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SynthesisSection;
use crate::error::SpeechError;
use crate::synthesis::extract::SentenceExtractor;
use crate::synthesis::tts::SpeechClient;

/// 一轮渐进合成的结局
#[derive(Debug, PartialEq, Eq)]
pub enum SynthesisOutcome {
    /// 按块序拼接的音频
    Audio(Vec<u8>),
    /// 渐进提取失败或失败次数达阈值，调用方应整段重合成
    FallbackToFull,
}

pub struct ProgressivePipeline {
    speech: Arc<dyn SpeechClient>,
    cfg: SynthesisSection,
}

impl ProgressivePipeline {
    pub fn new(speech: Arc<dyn SpeechClient>, cfg: SynthesisSection) -> Self {
        Self { speech, cfg }
    }

    /// 跑完一轮：fragments 是模型输出的文本片段流
    pub async fn run<S>(&self, mut fragments: S) -> SynthesisOutcome
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut extractor =
            SentenceExtractor::new(self.cfg.speech_field.clone(), self.cfg.max_chunk_chars);
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrent));
        let mut in_flight: JoinSet<(usize, Result<Vec<u8>, SpeechError>)> = JoinSet::new();
        let mut segments: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        let mut failures = 0u32;
        let mut next_index = 0usize;

        while let Some(fragment) = fragments.next().await {
            for chunk in extractor.push(&fragment) {
                self.dispatch(chunk, &mut next_index, &semaphore, &mut in_flight, &mut segments, &mut failures)
                    .await;
            }
        }
        for chunk in extractor.finish() {
            self.dispatch(chunk, &mut next_index, &semaphore, &mut in_flight, &mut segments, &mut failures)
                .await;
        }

        while let Some(joined) = in_flight.join_next().await {
            Self::record(joined, &mut segments, &mut failures);
        }

        if !extractor.field_found() {
            tracing::warn!("Speech field never located in stream, falling back to full synthesis");
            return SynthesisOutcome::FallbackToFull;
        }
        if failures >= self.cfg.failure_threshold {
            tracing::warn!(failures, "Synthesis failure threshold reached, falling back");
            return SynthesisOutcome::FallbackToFull;
        }

        let mut audio = Vec::new();
        for segment in segments.into_values() {
            audio.extend(segment);
        }
        SynthesisOutcome::Audio(audio)
    }

    async fn dispatch(
        &self,
        chunk: String,
        next_index: &mut usize,
        semaphore: &Arc<Semaphore>,
        in_flight: &mut JoinSet<(usize, Result<Vec<u8>, SpeechError>)>,
        segments: &mut BTreeMap<usize, Vec<u8>>,
        failures: &mut u32,
    ) {
        // 阈值后不再发起调用，但继续消费流保证提取侧推进
        if *failures >= self.cfg.failure_threshold {
            return;
        }

        // 先把已完成的结果收走，保证失败计数及时生效
        while let Some(joined) = in_flight.try_join_next() {
            Self::record(joined, segments, failures);
            if *failures >= self.cfg.failure_threshold {
                return;
            }
        }

        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            return;
        };
        let index = *next_index;
        *next_index += 1;

        let speech = self.speech.clone();
        let voice = self.cfg.voice.clone();
        in_flight.spawn(async move {
            let result = speech.synthesize(&chunk, &voice).await;
            drop(permit);
            (index, result)
        });
    }

    fn record(
        joined: Result<(usize, Result<Vec<u8>, SpeechError>), tokio::task::JoinError>,
        segments: &mut BTreeMap<usize, Vec<u8>>,
        failures: &mut u32,
    ) {
        match joined {
            Ok((index, Ok(bytes))) => {
                segments.insert(index, bytes);
            }
            Ok((index, Err(e))) => {
                tracing::warn!(index, "Chunk synthesis failed: {}", e);
                *failures += 1;
            }
            Err(e) => {
                tracing::warn!("Synthesis task panicked: {}", e);
                *failures += 1;
            }
        }
    }
}
