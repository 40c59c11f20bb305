//! Squarespace strategy.
//!
//! Squarespace lazy-loads through `data-src` / `data-image` and serves CDN
//! variants that differ only by a `?format=` query.

use brandpipe_shared::{HostKind, ImageAsset, Result, TextBlock};
use scraper::Html;
use url::Url;

use super::{ExtractionStrategy, ImageCollector, ImageRules, collect_text, identity_raw};

const TEXT_ROOTS: &[&str] = &["#page", "main", "article"];

/// Asset hosts whose query strings only select a size variant.
const CDN_HOSTS: &[&str] = &["images.squarespace-cdn.com", "static1.squarespace.com"];

const RULES: ImageRules = ImageRules {
    lazy_attrs: &["data-src", "data-image"],
    rewrite_raw: identity_raw,
    canonicalize: strip_cdn_query,
};

pub struct SquarespaceStrategy;

impl ExtractionStrategy for SquarespaceStrategy {
    fn kind(&self) -> HostKind {
        HostKind::Squarespace
    }

    fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>> {
        collect_text(doc, TEXT_ROOTS)
    }

    fn extract_images(&self, doc: &Html, base: &Url) -> Result<Vec<ImageAsset>> {
        let mut images = ImageCollector::new(base, &RULES);
        images.collect(doc, "img, [data-image]")?;
        Ok(images.finish())
    }
}

fn strip_cdn_query(mut url: Url) -> Url {
    let on_cdn = url
        .host_str()
        .is_some_and(|h| CDN_HOSTS.iter().any(|cdn| h.eq_ignore_ascii_case(cdn)));
    if on_cdn {
        url.set_query(None);
    }
    url
}
