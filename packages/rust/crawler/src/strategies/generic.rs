//! Fallback strategy for unrecognised hosts.
//!
//! Reads plain `img[src]` and heading/paragraph markup only.

use brandpipe_shared::{HostKind, ImageAsset, Result, TextBlock};
use scraper::Html;
use url::Url;

use super::{ExtractionStrategy, ImageCollector, ImageRules, collect_text};

/// Readability-style roots tried before falling back to `<body>`.
const TEXT_ROOTS: &[&str] = &["main", "article", r#"[role="main"]"#];

pub struct GenericStrategy;

impl ExtractionStrategy for GenericStrategy {
    fn kind(&self) -> HostKind {
        HostKind::Generic
    }

    fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>> {
        collect_text(doc, TEXT_ROOTS)
    }

    fn extract_images(&self, doc: &Html, base: &Url) -> Result<Vec<ImageAsset>> {
        let mut images = ImageCollector::new(base, &ImageRules::PLAIN);
        images.collect(doc, "img[src]")?;
        Ok(images.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_lazy_attributes() {
        let doc = Html::parse_document(
            r#"<main>
                <img src="/a.png" alt="Logo">
                <img data-src="/lazy.png">
                <img src="data:image/gif;base64,R0lG" data-src="/b.png">
            </main>"#,
        );
        let base = Url::parse("https://acme.example/about").unwrap();
        let images = GenericStrategy.extract_images(&doc, &base).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "https://acme.example/a.png");
        assert_eq!(images[0].alt_text.as_deref(), Some("Logo"));
        assert!(!images[0].is_lazy_loaded);
        assert_eq!(images[0].source_attribute, "src");
    }
}
