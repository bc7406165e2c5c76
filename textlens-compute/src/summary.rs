//! Extractive summarization.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use textlens_core::{ComputeError, Summary};

use crate::segment::{split_sentences, tokenize};
use crate::{run_blocking, ComputeFunction};

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "and", "or", "but", "if", "then", "of", "in", "on", "at", "to", "for",
        "from", "by", "with", "as", "is", "are", "was", "were", "be", "been", "it", "its", "this",
        "that", "these", "those", "i", "you", "he", "she", "we", "they", "me", "him", "her", "us",
        "them", "my", "your", "our", "their", "do", "does", "did", "have", "has", "had", "not",
        "so", "too", "very", "can", "will", "just", "there", "here", "what", "which", "who",
        "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
        "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "это",
    ]
    .into_iter()
    .collect()
});

/// Picks the most representative sentences and keeps them in source order.
///
/// Sentences are ranked by the mean normalized frequency of their content
/// words across the whole text. Ties go to the earlier sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractiveSummarizer {
    /// Fraction of sentences to keep, rounded up.
    pub ratio: f64,
    /// Hard cap on kept sentences.
    pub max_sentences: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            ratio: 0.3,
            max_sentences: 5,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new(ratio: f64, max_sentences: usize) -> Self {
        Self {
            ratio,
            max_sentences,
        }
    }

    /// Number of sentences kept out of `total`.
    pub fn budget(&self, total: usize) -> usize {
        let wanted = (total as f64 * self.ratio.clamp(0.0, 1.0)).ceil() as usize;
        wanted.clamp(1, self.max_sentences.max(1)).min(total)
    }

    pub fn summarize(&self, raw_text: &str) -> Result<String, ComputeError> {
        let sentences = split_sentences(raw_text);
        if sentences.is_empty() {
            return Err(ComputeError::EmptyInput);
        }

        let budget = self.budget(sentences.len());
        if budget == sentences.len() {
            return Ok(sentences.join(" "));
        }

        let tokens: Vec<Vec<String>> = sentences
            .iter()
            .map(|sentence| content_words(sentence))
            .collect();

        let mut frequency: HashMap<&str, f64> = HashMap::new();
        for word in tokens.iter().flatten() {
            *frequency.entry(word.as_str()).or_insert(0.0) += 1.0;
        }
        let peak = frequency.values().copied().fold(0.0, f64::max);

        let scores: Vec<f64> = tokens
            .iter()
            .map(|words| {
                if words.is_empty() || peak == 0.0 {
                    return 0.0;
                }
                let total: f64 = words
                    .iter()
                    .map(|word| frequency.get(word.as_str()).copied().unwrap_or(0.0) / peak)
                    .sum();
                total / words.len() as f64
            })
            .collect();

        let mut ranked: Vec<usize> = (0..sentences.len()).collect();
        ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
        let mut kept: Vec<usize> = ranked.into_iter().take(budget).collect();
        kept.sort_unstable();

        Ok(kept
            .into_iter()
            .map(|index| sentences[index].as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }
}

fn content_words(sentence: &str) -> Vec<String> {
    tokenize(sentence)
        .into_iter()
        .filter(|word| word.chars().count() > 1 && !STOPWORDS.contains(word.as_str()))
        .collect()
}

#[async_trait]
impl ComputeFunction<Summary> for ExtractiveSummarizer {
    async fn compute(&self, source_text: &str) -> Result<String, ComputeError> {
        let summarizer = *self;
        let text = source_text.to_owned();
        let summary = run_blocking(move || summarizer.summarize(&text)).await?;
        tracing::debug!(chars = summary.len(), "Summarized text");
        Ok(summary)
    }

    fn model_id(&self) -> &str {
        "extractive-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "Rust services handle caching well. \
        The weather was mild on Tuesday. \
        A cache keeps hot results close to the service. \
        Lunch was pasta. \
        Caching results avoids repeated work in the service.";

    #[test]
    fn test_budget_rounds_up_and_caps() {
        let summarizer = ExtractiveSummarizer::new(0.3, 5);
        assert_eq!(summarizer.budget(1), 1);
        assert_eq!(summarizer.budget(5), 2);
        assert_eq!(summarizer.budget(100), 5);
    }

    #[test]
    fn test_single_sentence_is_returned_as_is() {
        let summarizer = ExtractiveSummarizer::default();
        assert_eq!(summarizer.summarize("Great day!").unwrap(), "Great day!");
    }

    #[test]
    fn test_summary_keeps_topical_sentences_in_order() {
        let summarizer = ExtractiveSummarizer::new(0.4, 5);
        let summary = summarizer.summarize(ARTICLE).unwrap();
        assert_eq!(
            summary,
            "A cache keeps hot results close to the service. \
             Caching results avoids repeated work in the service."
        );
    }

    #[test]
    fn test_summary_is_shorter_than_source() {
        let summarizer = ExtractiveSummarizer::default();
        let summary = summarizer.summarize(ARTICLE).unwrap();
        assert!(summary.len() < ARTICLE.len());
        assert!(!summary.is_empty());
    }

    #[test]
    fn test_blank_text_is_empty_input() {
        let summarizer = ExtractiveSummarizer::default();
        assert_eq!(summarizer.summarize("\n\n"), Err(ComputeError::EmptyInput));
    }

    #[tokio::test]
    async fn test_compute_matches_sync_summary() {
        let summarizer = ExtractiveSummarizer::default();
        let expected = summarizer.summarize(ARTICLE).unwrap();
        let computed = ComputeFunction::<Summary>::compute(&summarizer, ARTICLE)
            .await
            .unwrap();
        assert_eq!(computed, expected);
    }
}
