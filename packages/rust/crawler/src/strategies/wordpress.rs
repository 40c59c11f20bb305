//! WordPress strategy.
//!
//! Lazy-load plugins move the real URL into `data-lazy-src` or `data-src`;
//! the media library serves resized copies as `name-WxH.ext`.

use std::sync::LazyLock;

use brandpipe_shared::{HostKind, ImageAsset, Result, TextBlock};
use regex::Regex;
use scraper::Html;
use url::Url;

use super::{ExtractionStrategy, ImageCollector, ImageRules, collect_text, identity_raw};

const TEXT_ROOTS: &[&str] = &[".entry-content", "main", "article"];

/// Only media-library paths carry generated resize suffixes.
const UPLOADS_DIR: &str = "/wp-content/uploads/";

static RESIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d+x\d+(\.[A-Za-z0-9]+)$").expect("valid resize pattern"));

const RULES: ImageRules = ImageRules {
    lazy_attrs: &["data-lazy-src", "data-src"],
    rewrite_raw: identity_raw,
    canonicalize: strip_resize_suffix,
};

pub struct WordpressStrategy;

impl ExtractionStrategy for WordpressStrategy {
    fn kind(&self) -> HostKind {
        HostKind::Wordpress
    }

    fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>> {
        collect_text(doc, TEXT_ROOTS)
    }

    fn extract_images(&self, doc: &Html, base: &Url) -> Result<Vec<ImageAsset>> {
        let mut images = ImageCollector::new(base, &RULES);
        images.collect(doc, "img")?;
        Ok(images.finish())
    }
}

fn strip_resize_suffix(mut url: Url) -> Url {
    if !url.path().contains(UPLOADS_DIR) {
        return url;
    }
    let stripped = RESIZE_SUFFIX.replace(url.path(), "$1").into_owned();
    if stripped != url.path() {
        url.set_path(&stripped);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_suffix_is_stripped() {
        let url = Url::parse("https://acme.example/wp-content/uploads/2024/05/bread-300x200.jpg")
            .unwrap();
        assert_eq!(
            strip_resize_suffix(url).as_str(),
            "https://acme.example/wp-content/uploads/2024/05/bread.jpg"
        );

        // Dimensions inside the name are not a resize suffix.
        let url = Url::parse("https://acme.example/wp-content/uploads/1920x1080-hero.jpg").unwrap();
        assert_eq!(
            strip_resize_suffix(url).as_str(),
            "https://acme.example/wp-content/uploads/1920x1080-hero.jpg"
        );
    }

    #[test]
    fn resize_suffix_outside_uploads_is_kept() {
        let url = Url::parse("https://partner-cdn.example/brand/logo-300x200.png").unwrap();
        assert_eq!(
            strip_resize_suffix(url).as_str(),
            "https://partner-cdn.example/brand/logo-300x200.png"
        );
    }

    #[test]
    fn lazy_src_wins_over_placeholder() {
        let doc = Html::parse_document(
            r#"<div class="entry-content">
                <img src="data:image/svg+xml,%3Csvg%3E" data-lazy-src="/wp-content/uploads/a-1024x768.png" alt=" ">
            </div>"#,
        );
        let base = Url::parse("https://acme.example/blog/").unwrap();
        let images = WordpressStrategy.extract_images(&doc, &base).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "https://acme.example/wp-content/uploads/a.png");
        assert_eq!(images[0].source_attribute, "data-lazy-src");
        assert_eq!(images[0].alt_text, None);
    }
}
