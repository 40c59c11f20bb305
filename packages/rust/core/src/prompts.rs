//! Prompt construction and parsing of completion output.

use brandpipe_shared::{
    BrandGuide, BrandPipeError, ContentPlan, ExtractionResult, PlannedItem, Result,
};
use serde::Deserialize;

/// Upper bound on extracted copy sent with the guide prompt.
const MAX_SOURCE_CHARS: usize = 12_000;

pub(crate) fn guide_prompt(result: &ExtractionResult) -> String {
    let mut copy = String::new();
    for block in &result.text_blocks {
        copy.push_str(&block.text);
        copy.push('\n');
    }

    let meta = &result.metadata;
    format!(
        "Derive a brand guide from this website.\n\
         Source: {url}\n\
         Title: {title}\n\
         Description: {description}\n\
         Images found: {images}\n\n\
         Website copy:\n{copy}\n\
         Return JSON with keys: brand_name (string), voice (array of tone keywords), \
         avoid (array of words the brand would never use), key_facts (array of facts stated \
         on the site), pillars (array of content themes), formatting (object with \
         max_hashtags and allow_emoji). Use only facts present in the copy.",
        url = result.source_url,
        title = meta.title.as_deref().unwrap_or("-"),
        description = meta.description.as_deref().unwrap_or("-"),
        images = result.images.len(),
        copy = truncate_chars(&copy, MAX_SOURCE_CHARS),
    )
}

pub(crate) fn plan_prompt(guide: &BrandGuide, items: u32) -> String {
    format!(
        "Plan {items} social posts, one per day, for {name}.\n\
         Voice: {voice}\n\
         Content pillars: {pillars}\n\
         Key facts: {facts}\n\n\
         Return JSON: {{\"items\": [{{\"day\": 1, \"platform\": \"instagram\", \
         \"topic\": \"...\", \"angle\": \"...\"}}]}} with exactly {items} items.",
        name = display_name(guide),
        voice = guide.voice.join(", "),
        pillars = guide.pillars.join(", "),
        facts = guide.key_facts.join("; "),
    )
}

/// `feedback` carries the reason the previous attempt was rejected.
pub(crate) fn draft_prompt(
    guide: &BrandGuide,
    item: &PlannedItem,
    feedback: Option<&str>,
) -> String {
    let mut prompt = format!(
        "Write a {platform} post for {name} (day {day}).\n\
         Topic: {topic}\n\
         Angle: {angle}\n\
         Voice: {voice}\n\
         Never use: {avoid}\n\
         Facts you may cite (cite nothing else): {facts}\n\
         At most {hashtags} hashtags.{emoji}",
        platform = item.platform,
        name = display_name(guide),
        day = item.day,
        topic = item.topic,
        angle = item.angle.as_deref().unwrap_or("-"),
        voice = guide.voice.join(", "),
        avoid = guide.avoid.join(", "),
        facts = guide.key_facts.join("; "),
        hashtags = guide.formatting.max_hashtags,
        emoji = if guide.formatting.allow_emoji { "" } else { " No emoji." },
    );
    if let Some(max) = guide.formatting.max_length {
        prompt.push_str(&format!(" At most {max} characters."));
    }
    if let Some(feedback) = feedback {
        prompt.push_str(&format!("\n\nThe previous version was rejected: {feedback}"));
    }
    prompt
}

fn display_name(guide: &BrandGuide) -> &str {
    if guide.brand_name.trim().is_empty() {
        "the brand"
    } else {
        &guide.brand_name
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

pub(crate) fn parse_guide(text: &str) -> Result<BrandGuide> {
    let json = json_body(text, '{', '}')
        .ok_or_else(|| BrandPipeError::Generation("guide response has no JSON object".into()))?;
    let guide: BrandGuide = serde_json::from_str(json)
        .map_err(|e| BrandPipeError::Generation(format!("guide JSON invalid: {e}")))?;

    if guide.voice.is_empty() && guide.key_facts.is_empty() && guide.pillars.is_empty() {
        return Err(BrandPipeError::Generation(
            "guide has no voice, facts, or pillars".into(),
        ));
    }
    Ok(guide)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlanShape {
    Wrapped { items: Vec<PlannedItem> },
    Bare(Vec<PlannedItem>),
}

/// Parse and validate a plan; fewer than `expected` usable items is an error.
pub(crate) fn parse_plan(text: &str, expected: u32) -> Result<ContentPlan> {
    let stripped = strip_code_fences(text);
    let json = [('{', '}'), ('[', ']')]
        .iter()
        .filter_map(|(open, close)| json_body(stripped, *open, *close))
        .min_by_key(|body| stripped.find(*body).unwrap_or(usize::MAX))
        .ok_or_else(|| BrandPipeError::Generation("plan response has no JSON".into()))?;

    let shape: PlanShape = serde_json::from_str(json)
        .map_err(|e| BrandPipeError::Generation(format!("plan JSON invalid: {e}")))?;
    let items = match shape {
        PlanShape::Wrapped { items } | PlanShape::Bare(items) => items,
    };

    let mut items: Vec<PlannedItem> = items
        .into_iter()
        .filter(|i| !i.topic.trim().is_empty() && !i.platform.trim().is_empty())
        .collect();

    let expected = expected as usize;
    if items.len() < expected {
        return Err(BrandPipeError::Generation(format!(
            "plan has {} usable items, expected {expected}",
            items.len()
        )));
    }
    items.truncate(expected);
    Ok(ContentPlan { items })
}

pub(crate) fn parse_draft(text: &str) -> Result<String> {
    let body = strip_code_fences(text).trim().trim_matches('"').trim();
    if body.is_empty() {
        return Err(BrandPipeError::Generation("draft response was empty".into()));
    }
    Ok(body.to_string())
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Outermost `open`..`close` span, after stripping code fences.
fn json_body(text: &str, open: char, close: char) -> Option<&str> {
    let text = strip_code_fences(text);
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[... truncated ...]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guide_parses_inside_code_fence() {
        let text = "```json\n{\"brand_name\":\"Fern\",\"voice\":[\"calm\"],\"key_facts\":[\"Est. 2012\"]}\n```";
        let guide = parse_guide(text).unwrap();
        assert_eq!(guide.brand_name, "Fern");
        assert_eq!(guide.voice, vec!["calm"]);
        assert_eq!(guide.formatting.max_hashtags, 3);
    }

    #[test]
    fn guide_with_prose_around_json() {
        let text = "Here is the guide:\n{\"voice\":[\"dry\",\"witty\"]}\nHope it helps!";
        assert_eq!(parse_guide(text).unwrap().voice.len(), 2);
    }

    #[test]
    fn empty_guide_is_rejected() {
        assert!(parse_guide("{\"brand_name\":\"Fern\"}").is_err());
        assert!(parse_guide("no json here").is_err());
    }

    fn plan_json(n: u32) -> String {
        let items: Vec<String> = (1..=n)
            .map(|d| format!(r#"{{"day":{d},"platform":"instagram","topic":"topic {d}"}}"#))
            .collect();
        format!(r#"{{"items":[{}]}}"#, items.join(","))
    }

    #[test]
    fn short_plan_is_generation_error() {
        let err = parse_plan(&plan_json(5), 7).unwrap_err();
        assert!(matches!(err, BrandPipeError::Generation(_)));
        assert!(err.to_string().contains("expected 7"));
    }

    #[test]
    fn long_plan_is_truncated_and_bare_arrays_accepted() {
        assert_eq!(parse_plan(&plan_json(9), 7).unwrap().items.len(), 7);

        let bare = r#"[{"day":1,"platform":"x","topic":"launch"}]"#;
        let plan = parse_plan(bare, 1).unwrap();
        assert_eq!(plan.items[0].platform, "x");
    }

    #[test]
    fn blank_items_do_not_count() {
        let text = r#"{"items":[{"day":1,"platform":"x","topic":" "},{"day":2,"platform":"x","topic":"b"}]}"#;
        assert!(parse_plan(text, 2).is_err());
        assert_eq!(parse_plan(text, 1).unwrap().items[0].topic, "b");
    }

    #[test]
    fn draft_strips_quotes_and_fences() {
        assert_eq!(parse_draft("\"Fresh bread today.\"").unwrap(), "Fresh bread today.");
        assert_eq!(parse_draft("```\nFresh bread.\n```").unwrap(), "Fresh bread.");
        assert!(parse_draft("  ").is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(10);
        let out = truncate_chars(&text, 3);
        assert!(out.starts_with("ééé\n"));
    }

    #[test]
    fn draft_prompt_includes_feedback() {
        let guide = BrandGuide {
            brand_name: "Fern".into(),
            ..BrandGuide::default()
        };
        let item = PlannedItem {
            day: 2,
            platform: "linkedin".into(),
            topic: "hiring".into(),
            angle: None,
        };
        let prompt = draft_prompt(&guide, &item, Some("tone_alignment 30"));
        assert!(prompt.contains("linkedin post for Fern (day 2)"));
        assert!(prompt.contains("rejected: tone_alignment 30"));
    }
}
