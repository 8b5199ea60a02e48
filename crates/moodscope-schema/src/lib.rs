use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of emotion labels produced by the emotion classifier.
///
/// Variants are declared in lexicographic order; `Ord` therefore breaks
/// arg-max ties toward the lexicographically smallest label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmotionLabel {
    Anger,
    Disgust,
    Fear,
    Joy,
    Neutral,
    Sadness,
    Surprise,
}

impl EmotionLabel {
    pub const ALL: [EmotionLabel; 7] = [
        EmotionLabel::Anger,
        EmotionLabel::Disgust,
        EmotionLabel::Fear,
        EmotionLabel::Joy,
        EmotionLabel::Neutral,
        EmotionLabel::Sadness,
        EmotionLabel::Surprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Anger => "anger",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Joy => "joy",
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Sadness => "sadness",
            EmotionLabel::Surprise => "surprise",
        }
    }

    pub fn parse(s: &str) -> Option<EmotionLabel> {
        match s.to_ascii_lowercase().as_str() {
            "anger" => Some(EmotionLabel::Anger),
            "disgust" => Some(EmotionLabel::Disgust),
            "fear" => Some(EmotionLabel::Fear),
            "joy" => Some(EmotionLabel::Joy),
            "neutral" => Some(EmotionLabel::Neutral),
            "sadness" => Some(EmotionLabel::Sadness),
            "surprise" => Some(EmotionLabel::Surprise),
            _ => None,
        }
    }

    /// Valence weight on the Russell circumplex (-1 negative .. +1 positive).
    pub fn valence_weight(&self) -> f32 {
        match self {
            EmotionLabel::Joy => 0.8,
            EmotionLabel::Surprise => 0.3,
            EmotionLabel::Neutral => 0.0,
            EmotionLabel::Fear => -0.5,
            EmotionLabel::Sadness => -0.7,
            EmotionLabel::Anger => -0.8,
            EmotionLabel::Disgust => -0.6,
        }
    }

    /// Arousal weight on the Russell circumplex (0 calm .. 1 excited).
    pub fn arousal_weight(&self) -> f32 {
        match self {
            EmotionLabel::Joy => 0.7,
            EmotionLabel::Surprise => 0.9,
            EmotionLabel::Neutral => 0.1,
            EmotionLabel::Fear => 0.8,
            EmotionLabel::Sadness => 0.3,
            EmotionLabel::Anger => 0.9,
            EmotionLabel::Disgust => 0.6,
        }
    }
}

impl fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentiment polarity label.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Negative,
    Neutral,
    Positive,
}

impl Polarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarity::Negative => "negative",
            Polarity::Neutral => "neutral",
            Polarity::Positive => "positive",
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-message emotion output: a probability distribution over the seven
/// labels plus valence/arousal derived from it via the fixed circumplex
/// weights.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionResult {
    pub dominant: EmotionLabel,
    pub confidence: f32,
    /// Probability per label; sums to 1 within tolerance.
    pub scores: BTreeMap<EmotionLabel, f32>,
    pub valence: f32,
    pub arousal: f32,
}

impl EmotionResult {
    /// Build a result from a label distribution, deriving dominant label,
    /// confidence, valence and arousal. Arg-max ties go to the
    /// lexicographically smallest label via the `BTreeMap` iteration order.
    pub fn from_scores(scores: BTreeMap<EmotionLabel, f32>) -> Self {
        let mut dominant = EmotionLabel::Neutral;
        let mut confidence = f32::MIN;
        for (label, score) in &scores {
            if *score > confidence {
                dominant = *label;
                confidence = *score;
            }
        }
        if scores.is_empty() {
            confidence = 0.0;
        }
        let valence = scores
            .iter()
            .map(|(label, score)| score * label.valence_weight())
            .sum();
        let arousal = scores
            .iter()
            .map(|(label, score)| score * label.arousal_weight())
            .sum();
        Self {
            dominant,
            confidence,
            scores,
            valence,
            arousal,
        }
    }
}

/// Per-message sentiment output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentResult {
    pub label: Polarity,
    /// Classifier confidence in [0, 1].
    pub score: f32,
}

impl SentimentResult {
    /// Signed score in [-1, 1]: positive keeps the confidence, negative
    /// negates it, neutral collapses to 0.
    pub fn signed_score(&self) -> f32 {
        match self.label {
            Polarity::Positive => self.score,
            Polarity::Negative => -self.score,
            Polarity::Neutral => 0.0,
        }
    }
}

// ============================================================
// External interface (wire) types
// ============================================================

/// One message of a conversation as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub content: String,
}

/// Analysis request: an opaque conversation id plus ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub conversation_id: i64,
    pub messages: Vec<IncomingMessage>,
}

/// Identifiers of the loaded models and their device placement, echoed back
/// to the caller. These come from deployment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelsInfo {
    pub emotion_model: String,
    pub sentiment_model: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmotionSummary {
    pub dominant_emotion: EmotionLabel,
    pub emotion_confidence: f32,
    /// Mean of the per-message distributions; 7 labels -> probability.
    pub emotion_distribution: BTreeMap<EmotionLabel, f32>,
    /// Mean valence; absent for an empty message set.
    pub average_valence: Option<f32>,
    /// Mean arousal; absent for an empty message set.
    pub average_arousal: Option<f32>,
    /// Population standard deviation of per-message valence.
    pub emotional_volatility: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentSummary {
    pub sentiment_polarity: Polarity,
    /// Mean signed sentiment score in [-1, 1].
    pub sentiment_score: f32,
    pub positive_ratio: f32,
    pub negative_ratio: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualitySummary {
    /// Composite quality score in [0, 1].
    pub conversation_quality_score: f32,
    pub message_count: usize,
    pub engagement_level: EngagementLevel,
    pub emotional_consistency: f32,
}

/// Per-message breakdown included in the response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAnalysis {
    pub message_index: usize,
    pub emotion: EmotionLabel,
    pub emotion_confidence: f32,
    pub emotion_scores: BTreeMap<EmotionLabel, f32>,
    pub sentiment: Polarity,
    /// Signed sentiment score in [-1, 1].
    pub sentiment_score: f32,
    pub valence: f32,
    pub arousal: f32,
}

/// Conversation-level aggregate over all messages of a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationAnalysis {
    pub emotion: EmotionSummary,
    pub sentiment: SentimentSummary,
    pub quality: QualitySummary,
    pub message_level_analysis: Vec<MessageAnalysis>,
}

/// Response envelope for a successful analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub conversation_id: i64,
    pub analysis: ConversationAnalysis,
    pub status: String,
    pub models_info: ModelsInfo,
}
