//! Conversation-level aggregation over ordered per-message results.
//!
//! Pure functions of their input: no I/O, no randomness, so a fixed input
//! always aggregates to bit-identical output.

use std::collections::BTreeMap;

use moodscope_schema::{
    ConversationAnalysis, EmotionLabel, EmotionResult, EmotionSummary, EngagementLevel,
    MessageAnalysis, Polarity, QualitySummary, SentimentSummary,
};

use crate::config::QualityConfig;
use crate::scheduler::ScoredMessage;

/// Signed-score band treated as neutral for the positive/negative ratios.
const RATIO_BAND: f32 = 0.2;

const ENGAGEMENT_HIGH: f32 = 0.6;
const ENGAGEMENT_MEDIUM: f32 = 0.3;

/// Aggregate scored messages into the conversation-level analysis.
pub fn aggregate(scored: &[ScoredMessage], quality: &QualityConfig) -> ConversationAnalysis {
    let message_level: Vec<MessageAnalysis> = scored
        .iter()
        .enumerate()
        .map(|(index, message)| MessageAnalysis {
            message_index: index,
            emotion: message.emotion.dominant,
            emotion_confidence: message.emotion.confidence,
            emotion_scores: message.emotion.scores.clone(),
            sentiment: message.sentiment.label,
            sentiment_score: message.sentiment.signed_score(),
            valence: message.emotion.valence,
            arousal: message.emotion.arousal,
        })
        .collect();

    let emotion = summarize_emotion(scored);
    let sentiment = summarize_sentiment(scored);
    let quality = summarize_quality(scored, &emotion, &sentiment, quality);

    ConversationAnalysis {
        emotion,
        sentiment,
        quality,
        message_level_analysis: message_level,
    }
}

fn summarize_emotion(scored: &[ScoredMessage]) -> EmotionSummary {
    if scored.is_empty() {
        let mut distribution: BTreeMap<EmotionLabel, f32> =
            EmotionLabel::ALL.iter().map(|l| (*l, 0.0)).collect();
        distribution.insert(EmotionLabel::Neutral, 1.0);
        return EmotionSummary {
            dominant_emotion: EmotionLabel::Neutral,
            emotion_confidence: 0.0,
            emotion_distribution: distribution,
            average_valence: None,
            average_arousal: None,
            emotional_volatility: 0.0,
        };
    }

    let n = scored.len() as f32;
    let mut mean: BTreeMap<EmotionLabel, f32> =
        EmotionLabel::ALL.iter().map(|l| (*l, 0.0)).collect();
    for message in scored {
        for (label, score) in &message.emotion.scores {
            if let Some(total) = mean.get_mut(label) {
                *total += score / n;
            }
        }
    }
    // Arg-max over the mean distribution; ties break lexicographically via
    // the map's key order.
    let summary = EmotionResult::from_scores(mean);

    let valences: Vec<f32> = scored.iter().map(|m| m.emotion.valence).collect();
    let arousals: Vec<f32> = scored.iter().map(|m| m.emotion.arousal).collect();
    let mean_valence = valences.iter().sum::<f32>() / n;
    let mean_arousal = arousals.iter().sum::<f32>() / n;
    let volatility = population_std(&valences, mean_valence);

    EmotionSummary {
        dominant_emotion: summary.dominant,
        emotion_confidence: summary.confidence,
        emotion_distribution: summary.scores,
        average_valence: Some(mean_valence),
        average_arousal: Some(mean_arousal),
        emotional_volatility: volatility,
    }
}

fn summarize_sentiment(scored: &[ScoredMessage]) -> SentimentSummary {
    if scored.is_empty() {
        return SentimentSummary {
            sentiment_polarity: Polarity::Neutral,
            sentiment_score: 0.0,
            positive_ratio: 0.0,
            negative_ratio: 0.0,
        };
    }

    let n = scored.len() as f32;
    let signed: Vec<f32> = scored.iter().map(|m| m.sentiment.signed_score()).collect();
    let mean_signed = signed.iter().sum::<f32>() / n;
    let positive_ratio = signed.iter().filter(|s| **s > RATIO_BAND).count() as f32 / n;
    let negative_ratio = signed.iter().filter(|s| **s < -RATIO_BAND).count() as f32 / n;

    SentimentSummary {
        sentiment_polarity: majority_polarity(scored),
        sentiment_score: mean_signed,
        positive_ratio,
        negative_ratio,
    }
}

/// Majority vote over per-message labels; any tie for the top count
/// resolves to neutral.
fn majority_polarity(scored: &[ScoredMessage]) -> Polarity {
    let mut counts: BTreeMap<Polarity, usize> = BTreeMap::new();
    for message in scored {
        *counts.entry(message.sentiment.label).or_insert(0) += 1;
    }
    let top = counts.values().copied().max().unwrap_or(0);
    let mut leaders = counts.iter().filter(|(_, count)| **count == top);
    match (leaders.next(), leaders.next()) {
        (Some((polarity, _)), None) => *polarity,
        _ => Polarity::Neutral,
    }
}

fn summarize_quality(
    scored: &[ScoredMessage],
    emotion: &EmotionSummary,
    sentiment: &SentimentSummary,
    config: &QualityConfig,
) -> QualitySummary {
    let message_count = scored.len();
    let score = quality_score(
        sentiment.positive_ratio,
        emotion.average_valence.unwrap_or(0.0),
        message_count,
        config,
    );
    let engagement_level = if score >= ENGAGEMENT_HIGH {
        EngagementLevel::High
    } else if score >= ENGAGEMENT_MEDIUM {
        EngagementLevel::Medium
    } else {
        EngagementLevel::Low
    };

    QualitySummary {
        conversation_quality_score: score,
        message_count,
        engagement_level,
        emotional_consistency: 1.0 - (emotion.emotional_volatility / 2.0).min(1.0),
    }
}

/// Composite quality score: weighted mean of positive-sentiment share,
/// normalized valence and a saturating exchange signal. Monotonic in each
/// input and clamped to [0, 1].
pub fn quality_score(
    positive_share: f32,
    mean_valence: f32,
    message_count: usize,
    config: &QualityConfig,
) -> f32 {
    let weight_sum =
        config.sentiment_weight + config.valence_weight + config.engagement_weight;
    if weight_sum <= 0.0 {
        return 0.0;
    }
    let valence_component = ((mean_valence + 1.0) / 2.0).clamp(0.0, 1.0);
    let n = message_count as f32;
    let engagement_component = n / (n + config.engagement_saturation);
    let combined = (config.sentiment_weight * positive_share.clamp(0.0, 1.0)
        + config.valence_weight * valence_component
        + config.engagement_weight * engagement_component)
        / weight_sum;
    combined.clamp(0.0, 1.0)
}

fn population_std(values: &[f32], mean: f32) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / values.len() as f32;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use moodscope_schema::SentimentResult;

    fn message(dominant: EmotionLabel, polarity: Polarity, confidence: f32) -> ScoredMessage {
        let mut scores: BTreeMap<EmotionLabel, f32> =
            EmotionLabel::ALL.iter().map(|l| (*l, 0.0)).collect();
        scores.insert(dominant, 1.0);
        ScoredMessage {
            emotion: EmotionResult::from_scores(scores),
            sentiment: SentimentResult {
                label: polarity,
                score: confidence,
            },
        }
    }

    #[test]
    fn two_way_sentiment_tie_is_neutral() {
        let scored = vec![
            message(EmotionLabel::Joy, Polarity::Positive, 0.9),
            message(EmotionLabel::Sadness, Polarity::Negative, 0.9),
        ];
        let analysis = aggregate(&scored, &QualityConfig::default());
        assert_eq!(analysis.sentiment.sentiment_polarity, Polarity::Neutral);
    }

    #[test]
    fn clear_majority_wins() {
        let scored = vec![
            message(EmotionLabel::Joy, Polarity::Positive, 0.9),
            message(EmotionLabel::Joy, Polarity::Positive, 0.8),
            message(EmotionLabel::Sadness, Polarity::Negative, 0.9),
        ];
        let analysis = aggregate(&scored, &QualityConfig::default());
        assert_eq!(analysis.sentiment.sentiment_polarity, Polarity::Positive);
    }

    #[test]
    fn dominant_emotion_is_argmax_of_mean_distribution() {
        let scored = vec![
            message(EmotionLabel::Joy, Polarity::Positive, 0.9),
            message(EmotionLabel::Joy, Polarity::Positive, 0.9),
            message(EmotionLabel::Fear, Polarity::Negative, 0.9),
        ];
        let analysis = aggregate(&scored, &QualityConfig::default());
        assert_eq!(analysis.emotion.dominant_emotion, EmotionLabel::Joy);
        let dist_sum: f32 = analysis.emotion.emotion_distribution.values().sum();
        assert!((dist_sum - 1.0).abs() < 1e-4);
    }

    #[test]
    fn dominant_emotion_tie_breaks_to_lexicographically_smallest() {
        let scored = vec![
            message(EmotionLabel::Surprise, Polarity::Neutral, 0.5),
            message(EmotionLabel::Anger, Polarity::Neutral, 0.5),
        ];
        let analysis = aggregate(&scored, &QualityConfig::default());
        // Mean distribution has 0.5 on both; anger sorts first.
        assert_eq!(analysis.emotion.dominant_emotion, EmotionLabel::Anger);
    }

    #[test]
    fn message_order_is_preserved_in_breakdown() {
        let scored = vec![
            message(EmotionLabel::Joy, Polarity::Positive, 0.9),
            message(EmotionLabel::Sadness, Polarity::Negative, 0.7),
            message(EmotionLabel::Neutral, Polarity::Neutral, 0.6),
        ];
        let analysis = aggregate(&scored, &QualityConfig::default());
        let indexes: Vec<usize> = analysis
            .message_level_analysis
            .iter()
            .map(|m| m.message_index)
            .collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(analysis.message_level_analysis[1].emotion, EmotionLabel::Sadness);
    }

    #[test]
    fn empty_input_reports_null_averages() {
        let analysis = aggregate(&[], &QualityConfig::default());
        assert_eq!(analysis.emotion.average_valence, None);
        assert_eq!(analysis.emotion.average_arousal, None);
        assert_eq!(analysis.quality.message_count, 0);
    }

    #[test]
    fn quality_score_stays_in_unit_range() {
        let config = QualityConfig::default();
        for positive in [0.0, 0.5, 1.0] {
            for valence in [-1.0, 0.0, 1.0] {
                for count in [0, 1, 2, 100, 10_000] {
                    let score = quality_score(positive, valence, count, &config);
                    assert!((0.0..=1.0).contains(&score), "score {score} out of range");
                }
            }
        }
    }

    #[test]
    fn quality_score_is_monotonic_in_each_input() {
        let config = QualityConfig::default();
        let base = quality_score(0.3, 0.0, 4, &config);
        assert!(quality_score(0.6, 0.0, 4, &config) >= base);
        assert!(quality_score(0.3, 0.5, 4, &config) >= base);
        assert!(quality_score(0.3, 0.0, 8, &config) >= base);
    }

    #[test]
    fn quality_engagement_signal_saturates() {
        let config = QualityConfig::default();
        let big = quality_score(0.5, 0.0, 1_000, &config);
        let bigger = quality_score(0.5, 0.0, 1_000_000, &config);
        assert!(bigger >= big);
        assert!(bigger <= 1.0);
        assert!((bigger - big).abs() < 0.05);
    }

    #[test]
    fn volatility_is_zero_for_single_message() {
        let scored = vec![message(EmotionLabel::Joy, Polarity::Positive, 0.9)];
        let analysis = aggregate(&scored, &QualityConfig::default());
        assert_eq!(analysis.emotion.emotional_volatility, 0.0);
        assert_eq!(analysis.quality.emotional_consistency, 1.0);
    }

    #[test]
    fn engagement_level_follows_thresholds() {
        let scored_high: Vec<ScoredMessage> = (0..20)
            .map(|_| message(EmotionLabel::Joy, Polarity::Positive, 0.95))
            .collect();
        let analysis = aggregate(&scored_high, &QualityConfig::default());
        assert_eq!(analysis.quality.engagement_level, EngagementLevel::High);

        let scored_low = vec![message(EmotionLabel::Sadness, Polarity::Negative, 0.9)];
        let analysis = aggregate(&scored_low, &QualityConfig::default());
        assert_eq!(analysis.quality.engagement_level, EngagementLevel::Low);
    }
}
