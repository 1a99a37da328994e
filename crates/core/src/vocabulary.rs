//! Known-word classification.
//!
//! The pipeline never caches a known-word set: every filter or translate
//! run receives a fresh [`KnownWordSet`] from the caller.

use std::collections::{BTreeSet, HashSet};

use crate::srt::strip_markup;

/// Words the requesting user already understands, normalised to lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownWordSet {
    words: HashSet<String>,
}

impl KnownWordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a newline-separated word list. Blank lines and `#` comments are skipped.
    pub fn from_word_list(raw: &str) -> Self {
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect()
    }

    pub fn insert(&mut self, word: &str) -> bool {
        let word = normalize(word);
        if word.is_empty() {
            return false;
        }
        self.words.insert(word)
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(&normalize(word))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn to_sorted_vec(&self) -> Vec<String> {
        let mut words: Vec<String> = self.words.iter().cloned().collect();
        words.sort();
        words
    }
}

impl<S: AsRef<str>> FromIterator<S> for KnownWordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = KnownWordSet::new();
        for word in iter {
            set.insert(word.as_ref());
        }
        set
    }
}

fn normalize(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Decides whether a word is known to the user.
pub trait VocabularyOracle: Send + Sync {
    fn classify_known(&self, word: &str, known: &KnownWordSet) -> bool;
}

/// Case-insensitive lookup that also accepts possessive forms (`Peter's`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LowercaseOracle;

impl VocabularyOracle for LowercaseOracle {
    fn classify_known(&self, word: &str, known: &KnownWordSet) -> bool {
        if known.contains(word) {
            return true;
        }
        let lower = normalize(word);
        ["'s", "’s"]
            .iter()
            .find_map(|suffix| lower.strip_suffix(suffix))
            .is_some_and(|base| known.contains(base))
    }
}

fn is_joiner(c: char) -> bool {
    matches!(c, '\'' | '’' | '-')
}

/// Byte ranges of the words in `text`.
///
/// A word is a run of alphabetic characters, optionally joined by internal
/// apostrophes or hyphens. Numbers and punctuation are not words.
pub fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let next_is_alpha = chars.peek().is_some_and(|&(_, n)| n.is_alphabetic());
        if c.is_alphabetic() {
            start.get_or_insert(i);
        } else if is_joiner(c) && start.is_some() && next_is_alpha {
            continue;
        } else if let Some(s) = start.take() {
            spans.push((s, i));
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// Split text into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    word_spans(text)
        .into_iter()
        .map(|(s, e)| text[s..e].to_lowercase())
        .collect()
}

/// Wrap every word for which `is_unknown` holds in `<u>…</u>`.
pub fn annotate(text: &str, is_unknown: impl Fn(&str) -> bool) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for (s, e) in word_spans(text) {
        let word = &text[s..e];
        if is_unknown(&word.to_lowercase()) {
            out.push_str(&text[last..s]);
            out.push_str("<u>");
            out.push_str(word);
            out.push_str("</u>");
            last = e;
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Unknown words of a subtitle text, in order of first appearance, without duplicates.
pub fn unknown_words(
    text: &str,
    known: &KnownWordSet,
    oracle: &dyn VocabularyOracle,
) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(&strip_markup(text))
        .into_iter()
        .filter(|word| !oracle.classify_known(word, known))
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Sorted, de-duplicated vocabulary list.
pub fn collect_vocabulary<I>(words: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    words.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}
