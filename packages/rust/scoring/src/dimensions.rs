//! Individual BFS dimensions. Each returns a score clamped to 0..=100.

use std::sync::LazyLock;

use brandpipe_shared::BrandGuide;
use regex::Regex;

pub const TONE_ALIGNMENT: &str = "tone_alignment";
pub const FACTUAL_CONSISTENCY: &str = "factual_consistency";
pub const FORMATTING_COMPLIANCE: &str = "formatting_compliance";

/// Claims that need a matching key fact to stand.
const SUPERLATIVES: &[&str] = &[
    "best",
    "guaranteed",
    "cheapest",
    "unbeatable",
    "award winning",
    "world class",
    "number one",
];

static FIGURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:[.,]\d+)*%?").expect("valid figure pattern"));

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#[\p{L}\p{N}_]+").expect("valid hashtag pattern"));

/// Character limit for a platform when the guide sets none.
pub fn platform_limit(platform: &str) -> usize {
    match platform.trim().to_ascii_lowercase().as_str() {
        "twitter" | "x" => 280,
        "threads" => 500,
        "instagram" => 2200,
        "linkedin" => 3000,
        "facebook" => 5000,
        _ => 2000,
    }
}

/// Voice keywords present, minus a penalty per avoided phrase used.
pub(crate) fn tone_alignment(body: &str, guide: &BrandGuide) -> f64 {
    let words = tokenize(body);

    let base = if guide.voice.is_empty() {
        75.0
    } else {
        let wanted = guide.voice.len().min(3);
        let hits = guide
            .voice
            .iter()
            .filter(|v| contains_phrase(&words, v))
            .count()
            .min(wanted);
        55.0 + 45.0 * hits as f64 / wanted as f64
    };

    let avoided = guide
        .avoid
        .iter()
        .filter(|p| contains_phrase(&words, p))
        .count();

    clamp(base - 25.0 * avoided as f64)
}

/// Figures and superlatives must be backed by a key fact (or the topic).
pub(crate) fn factual_consistency(body: &str, topic: &str, guide: &BrandGuide) -> f64 {
    let support: Vec<String> = guide
        .key_facts
        .iter()
        .map(String::as_str)
        .chain([topic])
        .map(str::to_lowercase)
        .collect();
    let support_words: Vec<Vec<String>> = support.iter().map(|s| tokenize(s)).collect();

    let unsupported_figures = FIGURE
        .find_iter(body)
        .map(|m| m.as_str())
        .filter(|fig| !support.iter().any(|s| s.contains(fig)))
        .count();

    let words = tokenize(body);
    let unsupported_claims = SUPERLATIVES
        .iter()
        .filter(|claim| contains_phrase(&words, claim))
        .filter(|claim| !support_words.iter().any(|s| contains_phrase(s, claim)))
        .count();

    clamp(100.0 - 20.0 * unsupported_figures as f64 - 15.0 * unsupported_claims as f64)
}

/// Length, hashtag, and emoji rules.
pub(crate) fn formatting_compliance(body: &str, platform: &str, guide: &BrandGuide) -> f64 {
    let rules = &guide.formatting;
    let limit = rules.max_length.unwrap_or_else(|| platform_limit(platform));

    let mut score = 100.0;
    if body.chars().count() > limit {
        score -= 60.0;
    }

    let hashtags = HASHTAG.find_iter(body).count();
    score -= 15.0 * hashtags.saturating_sub(rules.max_hashtags) as f64;

    if !rules.allow_emoji && body.chars().any(is_emoji) {
        score -= 30.0;
    }

    clamp(score)
}

fn clamp(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Lowercase alphanumeric words; apostrophes stay inside words.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whole-word, case-insensitive phrase match.
fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle = tokenize(phrase);
    if needle.is_empty() || needle.len() > words.len() {
        return false;
    }
    words.windows(needle.len()).any(|w| w == needle.as_slice())
}

fn is_emoji(c: char) -> bool {
    matches!(c, '\u{1F300}'..='\u{1FAFF}' | '\u{2600}'..='\u{27BF}' | '\u{1F1E6}'..='\u{1F1FF}')
}

#[cfg(test)]
mod tests {
    use brandpipe_shared::FormattingRules;

    use super::*;

    fn guide() -> BrandGuide {
        BrandGuide {
            brand_name: "Hearth & Crumb".into(),
            voice: vec!["warm".into(), "neighbourly".into()],
            avoid: vec!["cheap".into(), "mass produced".into()],
            key_facts: vec!["Open 7am to 3pm daily".into(), "Flour milled 40 miles away".into()],
            pillars: vec![],
            formatting: FormattingRules::default(),
        }
    }

    #[test]
    fn tone_rewards_voice_and_punishes_avoided_terms() {
        let g = guide();
        let on_voice = tone_alignment("A warm, neighbourly loaf for your table.", &g);
        let flat = tone_alignment("A loaf for your table.", &g);
        let off_voice = tone_alignment("Cheap bread, mass-produced daily.", &g);
        assert_eq!(on_voice, 100.0);
        assert_eq!(flat, 55.0);
        assert_eq!(off_voice, 5.0);
    }

    #[test]
    fn avoided_terms_match_whole_words_only() {
        // "cheapest" is not "cheap".
        let g = guide();
        assert_eq!(tone_alignment("warm loaves", &g), tone_alignment("warm loaves, cheapest", &g));
    }

    #[test]
    fn unsupported_figures_and_claims_cost_points() {
        let g = guide();
        assert_eq!(factual_consistency("We open at 7am every day.", "", &g), 100.0);
        assert_eq!(factual_consistency("Flour from 40 miles away.", "", &g), 100.0);
        assert_eq!(factual_consistency("Over 500 loaves a day!", "", &g), 80.0);
        assert_eq!(factual_consistency("The best bread, guaranteed.", "", &g), 70.0);
        // The planned topic counts as support.
        assert_eq!(factual_consistency("Our 10 year anniversary", "10 year anniversary", &g), 100.0);
    }

    #[test]
    fn formatting_checks_length_hashtags_and_emoji() {
        let mut g = guide();
        assert_eq!(formatting_compliance("Fresh bread.", "twitter", &g), 100.0);
        assert_eq!(formatting_compliance(&"a".repeat(281), "twitter", &g), 40.0);
        assert_eq!(formatting_compliance(&"a".repeat(281), "instagram", &g), 100.0);
        assert_eq!(formatting_compliance("Bread #a #b #c #d #e", "instagram", &g), 70.0);

        g.formatting.allow_emoji = false;
        g.formatting.max_length = Some(10);
        assert_eq!(formatting_compliance("Bread day 🍞", "facebook", &g), 10.0);
    }

    #[test]
    fn platform_limits() {
        assert_eq!(platform_limit("X"), 280);
        assert_eq!(platform_limit(" LinkedIn "), 3000);
        assert_eq!(platform_limit("mastodon"), 2000);
    }
}
