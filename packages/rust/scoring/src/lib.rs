//! Brand Fidelity Scoring (BFS).
//!
//! [`score`] is pure: the same draft, guide, and config always produce the
//! same [`BfsScore`]. [`decide`] turns a score into an accept / retry /
//! escalate verdict.

pub mod dimensions;
pub mod policy;

use std::collections::BTreeMap;

use brandpipe_shared::{
    BfsScore, BrandGuide, BrandPipeError, ContentDraft, DimensionPolicy, Result, ScoringConfig,
};

pub use dimensions::{FACTUAL_CONSISTENCY, FORMATTING_COMPLIANCE, TONE_ALIGNMENT, platform_limit};
pub use policy::{Verdict, decide};

/// Score a draft against its brand guide.
pub fn score(draft: &ContentDraft, guide: &BrandGuide, config: &ScoringConfig) -> Result<BfsScore> {
    score_body(&draft.body, &draft.platform, &draft.topic, guide, config)
}

/// Score raw copy for `platform`; `topic` counts as factual support.
pub fn score_body(
    body: &str,
    platform: &str,
    topic: &str,
    guide: &BrandGuide,
    config: &ScoringConfig,
) -> Result<BfsScore> {
    validate(config)?;

    let body = body.trim();
    if body.is_empty() {
        return Err(BrandPipeError::Scoring("draft body is empty".into()));
    }

    let dims: [(&str, &DimensionPolicy, f64); 3] = [
        (
            TONE_ALIGNMENT,
            &config.tone_alignment,
            dimensions::tone_alignment(body, guide),
        ),
        (
            FACTUAL_CONSISTENCY,
            &config.factual_consistency,
            dimensions::factual_consistency(body, topic, guide),
        ),
        (
            FORMATTING_COMPLIANCE,
            &config.formatting_compliance,
            dimensions::formatting_compliance(body, platform, guide),
        ),
    ];

    let total_weight: f64 = dims.iter().map(|(_, p, _)| p.weight).sum();
    let weighted: f64 = dims.iter().map(|(_, p, s)| p.weight * s).sum();
    let overall = round2(weighted / total_weight);

    let above_floors = dims.iter().all(|(_, p, s)| *s >= p.floor);
    let passed = above_floors && overall >= config.acceptance_threshold;

    tracing::debug!(overall, passed, "draft scored");

    Ok(BfsScore {
        overall,
        dimensions: dims
            .iter()
            .map(|(name, _, s)| (name.to_string(), round2(*s)))
            .collect::<BTreeMap<_, _>>(),
        passed,
    })
}

fn validate(config: &ScoringConfig) -> Result<()> {
    let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);

    if !in_range(config.acceptance_threshold) {
        return Err(BrandPipeError::Scoring(format!(
            "acceptance threshold {} outside 0..=100",
            config.acceptance_threshold
        )));
    }

    let policies = [
        (TONE_ALIGNMENT, &config.tone_alignment),
        (FACTUAL_CONSISTENCY, &config.factual_consistency),
        (FORMATTING_COMPLIANCE, &config.formatting_compliance),
    ];
    for (name, p) in policies {
        if !p.weight.is_finite() || p.weight < 0.0 {
            return Err(BrandPipeError::Scoring(format!("{name}: invalid weight {}", p.weight)));
        }
        if !in_range(p.floor) {
            return Err(BrandPipeError::Scoring(format!("{name}: floor {} outside 0..=100", p.floor)));
        }
    }

    if policies.iter().map(|(_, p)| p.weight).sum::<f64>() <= 0.0 {
        return Err(BrandPipeError::Scoring("dimension weights sum to zero".into()));
    }
    Ok(())
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use brandpipe_shared::{DraftStatus, FormattingRules};
    use chrono::Utc;

    use super::*;

    fn guide() -> BrandGuide {
        BrandGuide {
            brand_name: "Northwind".into(),
            voice: vec!["bold".into(), "curious".into()],
            avoid: vec!["synergy".into()],
            key_facts: vec!["Roasting since 2009".into()],
            pillars: vec!["origin stories".into()],
            formatting: FormattingRules::default(),
        }
    }

    fn draft(body: &str, platform: &str) -> ContentDraft {
        let now = Utc::now();
        ContentDraft {
            id: "d1".into(),
            brand_id: "northwind".into(),
            run_id: "r1".into(),
            plan_index: 0,
            day: 1,
            platform: platform.into(),
            topic: "Meet the farmers".into(),
            body: body.into(),
            bfs_score: None,
            bfs_breakdown: None,
            retry_count: 0,
            status: DraftStatus::Generating,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn on_brand_draft_passes() {
        let d = draft("A bold, curious look at the farms behind our beans. Roasting since 2009.", "instagram");
        let s = score(&d, &guide(), &ScoringConfig::default()).unwrap();
        assert!(s.passed, "{s:?}");
        assert_eq!(s.dimensions.len(), 3);
        assert_eq!(s.overall, 100.0);
    }

    #[test]
    fn floor_fails_draft_despite_overall() {
        // tone 55, factual 70 (two unsupported claims), formatting 100: overall 71.5
        let d = draft("The best coffee, guaranteed.", "instagram");
        let mut config = ScoringConfig::default();
        config.factual_consistency.floor = 75.0;
        let s = score(&d, &guide(), &config).unwrap();
        assert!(s.overall >= config.acceptance_threshold);
        assert!(!s.passed);
    }

    #[test]
    fn overall_is_weighted_mean() {
        let d = draft("Synergy everywhere.", "twitter");
        let s = score(&d, &guide(), &ScoringConfig::default()).unwrap();
        // tone 55 - 25 = 30, factual 100, formatting 100
        let expected = 0.40 * 30.0 + 0.35 * 100.0 + 0.25 * 100.0;
        assert!((s.overall - expected).abs() < 0.01);
        assert_eq!(s.dimensions[TONE_ALIGNMENT], 30.0);
        assert!(!s.passed);
    }

    #[test]
    fn scoring_is_pure() {
        let d = draft("Curious about where your beans grow?", "linkedin");
        let g = guide();
        let c = ScoringConfig::default();
        assert_eq!(score(&d, &g, &c).unwrap(), score(&d, &g, &c).unwrap());
    }

    #[test]
    fn empty_body_is_scoring_failure() {
        let err = score(&draft("   ", "x"), &guide(), &ScoringConfig::default()).unwrap_err();
        assert!(matches!(err, BrandPipeError::Scoring(_)));
    }

    #[test]
    fn invalid_weights_are_scoring_failure() {
        let mut config = ScoringConfig::default();
        config.tone_alignment.weight = -1.0;
        assert!(matches!(
            score(&draft("hi", "x"), &guide(), &config),
            Err(BrandPipeError::Scoring(_))
        ));

        let mut config = ScoringConfig::default();
        config.tone_alignment.weight = 0.0;
        config.factual_consistency.weight = 0.0;
        config.formatting_compliance.weight = 0.0;
        assert!(score(&draft("hi", "x"), &guide(), &config).is_err());

        let mut config = ScoringConfig::default();
        config.formatting_compliance.weight = f64::NAN;
        assert!(score(&draft("hi", "x"), &guide(), &config).is_err());
    }
}
