use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;

use tokio::fs;

use crate::{
    capabilities::Translator,
    error::StageError,
    srt::strip_markup,
    stages::{
        StageContext, StageExecutor, StageJob, StageKind, StageOutput, read_segments,
        replace_file, write_segments,
    },
    types::{Languages, SubtitleSegment},
    vocabulary::{KnownWordSet, VocabularyOracle, annotate, collect_vocabulary, unknown_words},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectiveTranslation {
    pub segments: Vec<SubtitleSegment>,
    pub vocabulary: Vec<String>,
    pub translated: usize,
    pub reused: usize,
}

/// A translated file from an earlier run and the languages it was made for.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousTranslation {
    pub languages: Languages,
    pub segments: Vec<SubtitleSegment>,
}

fn reuse_key(segment: &SubtitleSegment) -> (u64, String) {
    (
        (segment.start_seconds * 1000.0).round() as u64,
        strip_markup(&segment.text),
    )
}

/// Translate only the segments that still contain unknown words.
///
/// Unknown words are recomputed from each segment's own text against
/// `known` on every call. Segments that are fully known lose their
/// translation and annotation. Translations found in `previous` for the same
/// start time and source text are reused instead of calling the translator,
/// but only when `previous` was made for the same language pair.
pub async fn apply_selective_translation(
    segments: &[SubtitleSegment],
    previous: Option<&PreviousTranslation>,
    known: &KnownWordSet,
    oracle: &dyn VocabularyOracle,
    translator: &dyn Translator,
    languages: &Languages,
    ctx: &StageContext,
) -> Result<SelectiveTranslation, StageError> {
    let cached: HashMap<(u64, String), &str> = previous
        .filter(|prev| prev.languages == *languages)
        .into_iter()
        .flat_map(|prev| prev.segments.iter())
        .filter_map(|seg| Some((reuse_key(seg), seg.translation.as_deref()?)))
        .collect();

    let total = segments.len();
    let mut out = SelectiveTranslation {
        segments: Vec::with_capacity(total),
        ..Default::default()
    };
    let mut vocabulary = Vec::new();
    let mut done = 0;

    for batch in segments.chunks(ctx.batch_size()) {
        ctx.checkpoint()?;
        for segment in batch {
            let plain = strip_markup(&segment.text);
            let unknown = unknown_words(&plain, known, oracle);

            if unknown.is_empty() {
                out.segments.push(SubtitleSegment {
                    text: plain,
                    translation: None,
                    ..segment.clone()
                });
                continue;
            }

            let unknown_set: HashSet<&str> = unknown.iter().map(String::as_str).collect();
            let text = annotate(&plain, |word| unknown_set.contains(word));

            let translation = match cached.get(&reuse_key(segment)) {
                Some(existing) => {
                    out.reused += 1;
                    existing.to_string()
                }
                None => {
                    out.translated += 1;
                    let reply = translator
                        .translate(&plain, &languages.source, &languages.target)
                        .await
                        .map_err(|source| StageError::Capability {
                            capability: "translation",
                            source,
                        })?;
                    if reply.trim().is_empty() {
                        return Err(StageError::Capability {
                            capability: "translation",
                            source: anyhow::anyhow!(
                                "{} returned an empty translation for segment {}",
                                translator.name(),
                                segment.index
                            ),
                        });
                    }
                    reply
                }
            };

            vocabulary.extend(unknown);
            out.segments.push(SubtitleSegment {
                text,
                translation: Some(translation.trim().to_string()),
                ..segment.clone()
            });
        }

        done += batch.len();
        ctx.report(
            done as f64 / total as f64,
            format!("translated {}/{} segments", done, total),
        )?;
    }

    out.vocabulary = collect_vocabulary(vocabulary);
    Ok(out)
}

/// Filtered transcript + known words → selectively translated transcript.
pub struct TranslateStage {
    translator: Arc<dyn Translator>,
    oracle: Arc<dyn VocabularyOracle>,
}

impl TranslateStage {
    pub fn new(translator: Arc<dyn Translator>, oracle: Arc<dyn VocabularyOracle>) -> Self {
        Self { translator, oracle }
    }
}

#[async_trait]
impl StageExecutor for TranslateStage {
    fn stage(&self) -> StageKind {
        StageKind::Translate
    }

    async fn execute(&self, job: &StageJob, ctx: &StageContext) -> Result<StageOutput, StageError> {
        ctx.checkpoint()?;
        let segments = read_segments(&job.paths.filtered).await?;

        let previous = read_previous(job).await;
        if previous.as_ref().is_some_and(|p| p.languages != job.languages) {
            tracing::info!(
                task_id = %ctx.task_id(),
                target = %job.languages.target,
                "language pair changed, translating from scratch"
            );
        }

        ctx.report(
            0.0,
            format!(
                "translating {} segments with {}",
                segments.len(),
                self.translator.name()
            ),
        )?;

        let result = apply_selective_translation(
            &segments,
            previous.as_ref(),
            &job.known_words,
            self.oracle.as_ref(),
            self.translator.as_ref(),
            &job.languages,
            ctx,
        )
        .await?;

        let languages_path = job.paths.translation_languages();
        match fs::remove_file(&languages_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StageError::io(&languages_path, e)),
        }
        write_segments(&job.paths.translated, &result.segments).await?;
        let languages = serde_json::to_vec(&job.languages)
            .map_err(|e| StageError::io(&languages_path, e.into()))?;
        replace_file(&languages_path, &languages).await?;
        tracing::info!(
            task_id = %ctx.task_id(),
            translated = result.translated,
            reused = result.reused,
            path = %job.paths.translated.display(),
            "translation written"
        );
        ctx.report(
            1.0,
            format!(
                "{} segments translated, {} reused",
                result.translated, result.reused
            ),
        )?;

        Ok(StageOutput {
            artifact: job.paths.translated.clone(),
            vocabulary: result.vocabulary,
        })
    }
}

/// The previous translated file, if it exists, is readable and records
/// which languages it was made for.
async fn read_previous(job: &StageJob) -> Option<PreviousTranslation> {
    let languages_path = job.paths.translation_languages();
    if !job.paths.translated.exists() || !languages_path.exists() {
        return None;
    }

    let languages = match fs::read(&languages_path).await {
        Ok(raw) => serde_json::from_slice::<Languages>(&raw).ok(),
        Err(_) => None,
    };
    let Some(languages) = languages else {
        tracing::warn!(path = %languages_path.display(), "ignoring unreadable translation languages");
        return None;
    };

    match read_segments(&job.paths.translated).await {
        Ok(segments) => Some(PreviousTranslation {
            languages,
            segments,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable previous translation");
            None
        }
    }
}
