//! Page → [`ExtractionResult`], with each facet isolated.
//!
//! Text, images, and metadata run independently: an error or panic in one
//! facet is recorded in `partial_failures` and never discards the others.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use brandpipe_shared::{BrandPipeError, ExtractionResult, Result};
use chrono::Utc;
use scraper::Html;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::classifier::HostClassifier;
use crate::fetch::FetchedDocument;
use crate::strategies::StrategyRegistry;

/// Classify and extract a fetched page.
///
/// The parsed DOM is not `Send`; it lives and dies inside this call.
pub fn extract_document(
    brand_id: &str,
    source_url: &str,
    page: &FetchedDocument,
    classifier: &HostClassifier,
    registry: &StrategyRegistry,
) -> ExtractionResult {
    let doc = Html::parse_document(&page.body);
    let profile = classifier.classify(&page.headers, &doc);
    let strategy = registry.select(profile.host_kind);

    let mut failures = Vec::new();
    let text_blocks = run_facet("text", &mut failures, || strategy.extract_text(&doc))
        .unwrap_or_default();
    let images = run_facet("images", &mut failures, || {
        strategy.extract_images(&doc, &page.url)
    })
    .unwrap_or_default();
    let metadata = run_facet("metadata", &mut failures, || strategy.extract_metadata(&doc))
        .unwrap_or_default();

    tracing::debug!(
        host = %profile.host_kind,
        confidence = profile.confidence,
        strategy = strategy.name(),
        text_blocks = text_blocks.len(),
        images = images.len(),
        partial_failures = failures.len(),
        "page extracted"
    );

    ExtractionResult {
        brand_id: brand_id.to_string(),
        source_url: source_url.to_string(),
        text_blocks,
        images,
        detected_host: profile.host_kind,
        host_profile: profile,
        metadata,
        content_hash: compute_hash(&page.body),
        partial_failures: failures,
        extracted_at: Utc::now(),
    }
}

/// Run one facet, converting errors and panics into a recorded failure.
fn run_facet<T>(
    facet: &str,
    failures: &mut Vec<String>,
    f: impl FnOnce() -> Result<T>,
) -> Option<T> {
    let err = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Some(value),
        Ok(Err(BrandPipeError::ExtractionPartial { message, .. })) => {
            BrandPipeError::extraction(facet, message)
        }
        Ok(Err(e)) => BrandPipeError::extraction(facet, e.to_string()),
        Err(panic) => BrandPipeError::extraction(facet, format!("panicked: {}", panic_message(&panic))),
    };

    warn!(facet, error = %err, "extraction facet failed");
    failures.push(err.to_string());
    None
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Compute SHA-256 hash of content.
pub(crate) fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use brandpipe_shared::{HostKind, ImageAsset, TextBlock};
    use url::Url;

    use super::*;
    use crate::strategies::ExtractionStrategy;

    struct PanickingImages;

    impl ExtractionStrategy for PanickingImages {
        fn kind(&self) -> HostKind {
            HostKind::Generic
        }
        fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>> {
            crate::strategies::GenericStrategy.extract_text(doc)
        }
        fn extract_images(&self, _doc: &Html, _base: &Url) -> Result<Vec<ImageAsset>> {
            panic!("image parser exploded")
        }
    }

    fn page(body: &str) -> FetchedDocument {
        FetchedDocument {
            url: Url::parse("https://acme.example/").unwrap(),
            status: 200,
            headers: vec![],
            body: body.to_string(),
        }
    }

    #[test]
    fn image_panic_keeps_text() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(PanickingImages));

        let result = extract_document(
            "acme",
            "https://acme.example/",
            &page("<main><h1>Acme</h1><p>Since 1998.</p><img src='/a.png'></main>"),
            &HostClassifier::new(),
            &registry,
        );

        assert_eq!(result.text_blocks.len(), 2);
        assert!(result.images.is_empty());
        assert_eq!(result.partial_failures.len(), 1);
        assert!(result.partial_failures[0].contains("images"));
        assert!(result.partial_failures[0].contains("exploded"));
    }

    #[test]
    fn hash_is_sha256_of_body() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
