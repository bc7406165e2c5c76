//! Sentence-level sentiment scoring.
//!
//! Each sentence is classified independently into a three-way distribution
//! (negative, neutral, positive), then projected onto a single scalar with the
//! fixed weights `[-1, 0, 1]`.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use textlens_core::{ComputeError, Sentiment};

use crate::segment::{split_sentences, tokenize};
use crate::{run_blocking, ComputeFunction};

// ============================================================================
// CLASS DISTRIBUTION
// ============================================================================

/// Probability mass per sentiment class for one sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassProbabilities {
    pub negative: f64,
    pub neutral: f64,
    pub positive: f64,
}

impl ClassProbabilities {
    /// Projection weights for negative, neutral and positive, in that order.
    pub const WEIGHTS: [f64; 3] = [-1.0, 0.0, 1.0];

    /// Softmax over raw class logits.
    pub fn from_logits(logits: [f64; 3]) -> Self {
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps = logits.map(|logit| (logit - max).exp());
        let total: f64 = exps.iter().sum();
        Self {
            negative: exps[0] / total,
            neutral: exps[1] / total,
            positive: exps[2] / total,
        }
    }

    /// Weighted projection onto a scalar in [-1, 1].
    pub fn score(&self) -> Result<f64, ComputeError> {
        let probabilities = [self.negative, self.neutral, self.positive];
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(ComputeError::Model {
                reason: format!("non-finite class probabilities: {:?}", self),
            });
        }
        let score: f64 = probabilities
            .iter()
            .zip(Self::WEIGHTS)
            .map(|(p, w)| p * w)
            .sum();
        Ok(score.clamp(-1.0, 1.0))
    }
}

/// A model that classifies a single sentence.
///
/// Implementations are shared across requests and must be safe for
/// concurrent read-only use.
pub trait SentenceClassifier: Send + Sync {
    fn classify(&self, sentence: &str) -> Result<ClassProbabilities, ComputeError>;

    fn model_id(&self) -> &str;
}

// ============================================================================
// LEXICON CLASSIFIER
// ============================================================================

const POSITIVE_WORDS: &[&str] = &[
    "love", "loved", "loves", "lovely", "like", "liked", "likes", "great", "good", "nice",
    "excellent", "amazing", "awesome", "wonderful", "fantastic", "happy", "glad", "pleased",
    "enjoy", "enjoyed", "best", "better", "beautiful", "brilliant", "perfect", "delightful",
    "superb", "fun", "recommend", "thank", "thanks", "grateful", "impressive", "favorite",
    "success", "successful", "люблю", "нравится", "хорошо", "хороший", "отлично", "отличный",
    "прекрасно", "прекрасный", "замечательно", "рад", "счастлив",
];

const NEGATIVE_WORDS: &[&str] = &[
    "hate", "hated", "hates", "dislike", "bad", "worse", "worst", "terrible", "awful",
    "horrible", "poor", "sad", "angry", "annoying", "annoyed", "disappointing", "disappointed",
    "boring", "ugly", "broken", "fail", "failed", "failure", "wrong", "pain", "painful",
    "useless", "upset", "unhappy", "disgusting", "ненавижу", "плохо", "плохой", "ужасно",
    "ужасный", "грустно", "отвратительно",
];

const NEGATORS: &[&str] = &[
    "not", "no", "never", "nothing", "nobody", "neither", "nor", "cannot", "without", "не",
    "нет", "никогда",
];

const INTENSIFIERS: &[&str] = &[
    "very", "really", "so", "extremely", "absolutely", "totally", "incredibly", "очень",
];

/// Tokens after a negator that it still applies to.
const NEGATION_SCOPE: usize = 3;

/// Deterministic word-list classifier.
///
/// Polarity hits are turned into class logits with a fixed neutral bias, so a
/// sentence without any sentiment-bearing word scores exactly zero.
#[derive(Debug, Clone)]
pub struct LexiconClassifier {
    positive: HashSet<&'static str>,
    negative: HashSet<&'static str>,
    negators: HashSet<&'static str>,
    intensifiers: HashSet<&'static str>,
    polarity_weight: f64,
    neutral_bias: f64,
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self {
            positive: POSITIVE_WORDS.iter().copied().collect(),
            negative: NEGATIVE_WORDS.iter().copied().collect(),
            negators: NEGATORS.iter().copied().collect(),
            intensifiers: INTENSIFIERS.iter().copied().collect(),
            polarity_weight: 2.0,
            neutral_bias: 1.0,
        }
    }
}

impl LexiconClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_negator(&self, token: &str) -> bool {
        self.negators.contains(token) || token.ends_with("n't")
    }

    /// Accumulated (negative, positive) evidence for a sentence.
    fn polarity(&self, sentence: &str) -> (f64, f64) {
        let mut negative = 0.0;
        let mut positive = 0.0;
        let mut negated_for = 0usize;
        let mut boost = 1.0;

        for token in tokenize(sentence) {
            let token = token.as_str();
            if self.is_negator(token) {
                negated_for = NEGATION_SCOPE;
                continue;
            }
            if self.intensifiers.contains(token) {
                boost = 1.5;
                continue;
            }

            let negated = negated_for > 0;
            if self.positive.contains(token) {
                if negated {
                    negative += boost;
                } else {
                    positive += boost;
                }
            } else if self.negative.contains(token) {
                if negated {
                    positive += 0.5 * boost;
                } else {
                    negative += boost;
                }
            }

            boost = 1.0;
            negated_for = negated_for.saturating_sub(1);
        }

        (negative, positive)
    }
}

impl SentenceClassifier for LexiconClassifier {
    fn classify(&self, sentence: &str) -> Result<ClassProbabilities, ComputeError> {
        let (negative, positive) = self.polarity(sentence);
        Ok(ClassProbabilities::from_logits([
            self.polarity_weight * negative,
            self.neutral_bias,
            self.polarity_weight * positive,
        ]))
    }

    fn model_id(&self) -> &str {
        "lexicon-v1"
    }
}

// ============================================================================
// SENTIMENT ANALYZER
// ============================================================================

/// Compute Function for sentiment artifacts: one score per sentence.
#[derive(Clone)]
pub struct SentimentAnalyzer {
    classifier: Arc<dyn SentenceClassifier>,
}

impl std::fmt::Debug for SentimentAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentimentAnalyzer")
            .field("model", &self.classifier.model_id())
            .finish()
    }
}

impl Default for SentimentAnalyzer {
    fn default() -> Self {
        Self::new(Arc::new(LexiconClassifier::default()))
    }
}

impl SentimentAnalyzer {
    pub fn new(classifier: Arc<dyn SentenceClassifier>) -> Self {
        Self { classifier }
    }

    /// Score every sentence of `raw_text` synchronously.
    pub fn analyze(&self, raw_text: &str) -> Result<Vec<f64>, ComputeError> {
        score_text(self.classifier.as_ref(), raw_text)
    }
}

fn score_text(classifier: &dyn SentenceClassifier, raw_text: &str) -> Result<Vec<f64>, ComputeError> {
    let sentences = split_sentences(raw_text);
    if sentences.is_empty() {
        return Err(ComputeError::EmptyInput);
    }
    sentences
        .iter()
        .map(|sentence| classifier.classify(sentence)?.score())
        .collect()
}

#[async_trait]
impl ComputeFunction<Sentiment> for SentimentAnalyzer {
    async fn compute(&self, source_text: &str) -> Result<Vec<f64>, ComputeError> {
        let classifier = Arc::clone(&self.classifier);
        let text = source_text.to_owned();
        let scores = run_blocking(move || score_text(classifier.as_ref(), &text)).await?;
        tracing::debug!(
            model = self.classifier.model_id(),
            sentences = scores.len(),
            "Scored sentiment"
        );
        Ok(scores)
    }

    fn model_id(&self) -> &str {
        self.classifier.model_id()
    }
}
