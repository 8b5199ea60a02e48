//! Deterministic keyword-based classifier.
//!
//! Scores the same seven-label emotion space and three-way sentiment space as
//! the transformer backend, from small keyword lists. Used as the
//! substitutable mock backend in tests and as a zero-artifact deployment
//! mode.

use std::collections::BTreeMap;

use async_trait::async_trait;

use moodscope_schema::{EmotionLabel, EmotionResult, ModelsInfo, Polarity, SentimentResult};

use crate::{validate_distribution, ModelError, RunnerHealth, SemanticClassifier};

const EMOTION_KEYWORDS: &[(EmotionLabel, &[&str])] = &[
    (
        EmotionLabel::Anger,
        &[
            "angry", "furious", "hate", "annoyed", "mad", "outrageous", "unacceptable", "rage",
        ],
    ),
    (
        EmotionLabel::Disgust,
        &["disgusting", "gross", "nasty", "awful", "horrible", "revolting"],
    ),
    (
        EmotionLabel::Fear,
        &[
            "afraid", "scared", "worried", "anxious", "nervous", "fear", "terrified", "dread",
        ],
    ),
    (
        EmotionLabel::Joy,
        &[
            "happy", "glad", "great", "love", "nice", "wonderful", "excited", "excellent",
            "awesome", "fun", "amazing", "thanks", "thank", "delighted", "enjoy", "perfect",
        ],
    ),
    (
        EmotionLabel::Sadness,
        &[
            "sad", "sorry", "miss", "lonely", "cry", "unhappy", "disappointed", "regret",
        ],
    ),
    (
        EmotionLabel::Surprise,
        &[
            "surprised", "unexpected", "wow", "unbelievable", "sudden", "shocking", "incredible",
        ],
    ),
];

const POSITIVE_WORDS: &[&str] = &[
    "happy", "glad", "great", "love", "nice", "wonderful", "excited", "excellent", "awesome",
    "fun", "amazing", "thanks", "thank", "delighted", "enjoy", "perfect", "good", "better",
    "best", "cool", "helpful",
];

const NEGATIVE_WORDS: &[&str] = &[
    "sad", "sorry", "unhappy", "disappointed", "regret", "angry", "furious", "hate", "annoyed",
    "mad", "awful", "horrible", "terrible", "disgusting", "gross", "nasty", "afraid", "scared",
    "worried", "anxious", "bad", "worse", "worst",
];

/// Base mass given to every label before keyword hits are added. Neutral
/// starts heavier so keyword-free text stays neutral.
const LABEL_BASE: f32 = 0.25;
const NEUTRAL_BASE: f32 = 1.0;

pub struct LexiconClassifier;

impl LexiconClassifier {
    pub fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    fn emotion_scores(text: &str) -> BTreeMap<EmotionLabel, f32> {
        let tokens = Self::tokens(text);
        let mut raw: BTreeMap<EmotionLabel, f32> = EmotionLabel::ALL
            .iter()
            .map(|label| {
                let base = if *label == EmotionLabel::Neutral {
                    NEUTRAL_BASE
                } else {
                    LABEL_BASE
                };
                (*label, base)
            })
            .collect();

        for (label, keywords) in EMOTION_KEYWORDS {
            let hits = tokens
                .iter()
                .filter(|t| keywords.contains(&t.as_str()))
                .count();
            if hits > 0 {
                if let Some(score) = raw.get_mut(label) {
                    *score += hits as f32;
                }
            }
        }

        let total: f32 = raw.values().sum();
        raw.into_iter().map(|(l, s)| (l, s / total)).collect()
    }

    fn sentiment(text: &str) -> SentimentResult {
        let tokens = Self::tokens(text);
        let pos = tokens
            .iter()
            .filter(|t| POSITIVE_WORDS.contains(&t.as_str()))
            .count() as f32;
        let neg = tokens
            .iter()
            .filter(|t| NEGATIVE_WORDS.contains(&t.as_str()))
            .count() as f32;

        if pos > neg {
            SentimentResult {
                label: Polarity::Positive,
                score: 0.5 + 0.5 * (pos - neg) / (pos + neg),
            }
        } else if neg > pos {
            SentimentResult {
                label: Polarity::Negative,
                score: 0.5 + 0.5 * (neg - pos) / (pos + neg),
            }
        } else {
            SentimentResult {
                label: Polarity::Neutral,
                score: 0.6,
            }
        }
    }
}

impl Default for LexiconClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticClassifier for LexiconClassifier {
    async fn score_emotion(&self, texts: &[String]) -> Result<Vec<EmotionResult>, ModelError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            let scores = Self::emotion_scores(text);
            let probs: Vec<f32> = scores.values().copied().collect();
            validate_distribution(&probs)?;
            results.push(EmotionResult::from_scores(scores));
        }
        Ok(results)
    }

    async fn score_sentiment(&self, texts: &[String]) -> Result<Vec<SentimentResult>, ModelError> {
        Ok(texts.iter().map(|t| Self::sentiment(t)).collect())
    }

    async fn warm_up(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn health(&self) -> RunnerHealth {
        RunnerHealth {
            backend: "lexicon".to_string(),
            device: "cpu".to_string(),
            accelerator_available: false,
            models_loaded: true,
            memory: None,
        }
    }

    fn info(&self) -> ModelsInfo {
        ModelsInfo {
            emotion_model: "lexicon-emotion-v1".to_string(),
            sentiment_model: "lexicon-sentiment-v1".to_string(),
            device: "cpu".to_string(),
        }
    }
}
