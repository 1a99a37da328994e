use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::StageError,
    srt::strip_markup,
    stages::{StageContext, StageExecutor, StageJob, StageKind, StageOutput, read_segments, write_segments},
    types::SubtitleSegment,
    vocabulary::{KnownWordSet, VocabularyOracle, annotate, collect_vocabulary, tokenize, unknown_words},
};

/// Transcript + known words → annotated transcript.
///
/// Unknown words are wrapped in `<u>…</u>`. Bracketed sound and speaker
/// marks (`[Musik]`, `(lacht)`) are removed from the text; cues with no
/// words left (`[Musik]`, `♪`) are dropped.
pub struct FilterStage {
    oracle: Arc<dyn VocabularyOracle>,
}

impl FilterStage {
    pub fn new(oracle: Arc<dyn VocabularyOracle>) -> Self {
        Self { oracle }
    }

    fn filter_segment(
        &self,
        segment: &SubtitleSegment,
        known: &KnownWordSet,
    ) -> Option<(SubtitleSegment, Vec<String>)> {
        let plain = strip_sound_marks(&strip_markup(&segment.text));
        if tokenize(&plain).is_empty() {
            return None;
        }

        let unknown = unknown_words(&plain, known, self.oracle.as_ref());
        let unknown_set: HashSet<&str> = unknown.iter().map(String::as_str).collect();
        let text = annotate(&plain, |word| unknown_set.contains(word));

        Some((
            SubtitleSegment {
                text,
                translation: None,
                ..segment.clone()
            },
            unknown,
        ))
    }
}

/// Remove `[…]` and `(…)` spans, then tidy the whitespace they leave.
/// An opener without a closer is kept as text.
fn strip_sound_marks(text: &str) -> String {
    text.lines()
        .map(|line| {
            let mut kept = String::with_capacity(line.len());
            let mut rest = line;
            while let Some(open) = rest.find(['[', '(']) {
                let close = if rest[open..].starts_with('[') { ']' } else { ')' };
                let Some(len) = rest[open..].find(close) else {
                    break;
                };
                kept.push_str(&rest[..open]);
                kept.push(' ');
                rest = &rest[open + len + 1..];
            }
            kept.push_str(rest);
            kept.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl StageExecutor for FilterStage {
    fn stage(&self) -> StageKind {
        StageKind::Filter
    }

    async fn execute(&self, job: &StageJob, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.checkpoint()?;
        let segments = read_segments(&job.paths.transcript).await?;
        let total = segments.len();
        ctx.report(0.0, format!("filtering {} segments", total))?;

        let mut kept = Vec::with_capacity(total);
        let mut vocabulary = Vec::new();
        let mut done = 0;

        for batch in segments.chunks(ctx.batch_size()) {
            ctx.checkpoint()?;
            for segment in batch {
                if let Some((filtered, unknown)) = self.filter_segment(segment, &job.known_words) {
                    kept.push(filtered);
                    vocabulary.extend(unknown);
                }
            }
            done += batch.len();
            ctx.report(
                done as f64 / total as f64,
                format!("filtered {}/{} segments", done, total),
            )?;
        }

        for (i, seg) in kept.iter_mut().enumerate() {
            seg.index = i + 1;
        }
        write_segments(&job.paths.filtered, &kept).await?;

        let vocabulary = collect_vocabulary(vocabulary);
        tracing::info!(
            task_id = %ctx.task_id(),
            kept = kept.len(),
            dropped = total - kept.len(),
            unknown = vocabulary.len(),
            "filtered transcript written"
        );
        ctx.report(1.0, format!("{} unknown words", vocabulary.len()))?;

        Ok(StageOutput {
            artifact: job.paths.filtered.clone(),
            vocabulary,
        })
    }
}
