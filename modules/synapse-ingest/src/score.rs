//! Relevance scoring for ingested news.
//!
//! The score orders the public feed. It is a weighted blend of classifier
//! confidence, recency decay, and a small content-length signal, and is
//! monotonic increasing in both tag confidence and recency.

use chrono::{DateTime, Utc};

const CONFIDENCE_WEIGHT: f32 = 0.5;
const RECENCY_WEIGHT: f32 = 0.4;
const CONTENT_WEIGHT: f32 = 0.1;

/// Recency factor halves every 24 hours.
const RECENCY_HALF_LIFE_HOURS: f32 = 24.0;

/// Summaries at or above this length earn the full content weight.
const CONTENT_SATURATION_CHARS: usize = 800;

pub fn score_news(
    tag_confidence: f32,
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    summary: &str,
) -> f32 {
    let confidence = tag_confidence.clamp(0.0, 1.0);

    // Undated items count as fresh rather than being buried.
    let recency = match published_at {
        Some(ts) => {
            let age_hours = (now - ts).num_seconds().max(0) as f32 / 3600.0;
            0.5f32.powf(age_hours / RECENCY_HALF_LIFE_HOURS)
        }
        None => 1.0,
    };

    let content =
        (summary.chars().count() as f32 / CONTENT_SATURATION_CHARS as f32).clamp(0.0, 1.0);

    CONFIDENCE_WEIGHT * confidence + RECENCY_WEIGHT * recency + CONTENT_WEIGHT * content
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn monotonic_in_confidence() {
        let now = Utc::now();
        let at = Some(now - Duration::hours(6));
        let mut prev = -1.0f32;
        for conf in [0.0, 0.2, 0.5, 0.8, 1.0] {
            let s = score_news(conf, at, now, "summary text");
            assert!(s > prev, "score must rise with confidence");
            prev = s;
        }
    }

    #[test]
    fn monotonic_in_recency() {
        let now = Utc::now();
        let newer = score_news(0.7, Some(now - Duration::hours(1)), now, "s");
        let older = score_news(0.7, Some(now - Duration::hours(48)), now, "s");
        assert!(newer > older);
    }

    #[test]
    fn undated_items_score_as_fresh() {
        let now = Utc::now();
        let undated = score_news(0.7, None, now, "s");
        let fresh = score_news(0.7, Some(now), now, "s");
        assert!((undated - fresh).abs() < 1e-6);
    }

    #[test]
    fn bounded_zero_to_one() {
        let now = Utc::now();
        let max = score_news(1.5, Some(now), now, &"x".repeat(2000));
        assert!(max <= 1.0 + 1e-6);
        let min = score_news(-0.5, Some(now - Duration::days(365)), now, "");
        assert!(min >= 0.0);
    }
}
