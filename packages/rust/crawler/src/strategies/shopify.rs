//! Shopify strategy.
//!
//! Theme markup references protocol-relative CDN URLs with `{width}`
//! templates and `_WxH` size suffixes; all resolve to the original asset.

use std::sync::LazyLock;

use brandpipe_shared::{HostKind, ImageAsset, Result, TextBlock};
use regex::Regex;
use scraper::Html;
use url::Url;

use super::{ExtractionStrategy, ImageCollector, ImageRules, collect_text};

const TEXT_ROOTS: &[&str] = &["main", "#MainContent"];

static SIZE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_(?:\d+x\d*|\d*x\d+|x)(?:@\dx)?(\.[A-Za-z0-9]+)$").expect("valid size pattern")
});

const RULES: ImageRules = ImageRules {
    lazy_attrs: &["data-src", "data-srcset"],
    rewrite_raw: drop_width_template,
    canonicalize: original_asset,
};

pub struct ShopifyStrategy;

impl ExtractionStrategy for ShopifyStrategy {
    fn kind(&self) -> HostKind {
        HostKind::Shopify
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

fn drop_width_template(raw: &str) -> String {
    raw.replace("{width}", "")
}

fn original_asset(mut url: Url) -> Url {
    let on_cdn = url.host_str().is_some_and(|h| h.contains("shopify"))
        || url.path().contains("/cdn/shop/");
    if !on_cdn {
        return url;
    }
    url.set_query(None);
    let stripped = SIZE_SUFFIX.replace(url.path(), "$1").into_owned();
    if stripped != url.path() {
        url.set_path(&stripped);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_and_sizes_resolve_to_one_asset() {
        let doc = Html::parse_document(
            r#"<main>
                <img data-src="//cdn.shopify.com/s/files/1/0001/products/mug_{width}x.jpg?v=1699">
                <img src="https://cdn.shopify.com/s/files/1/0001/products/mug_600x.jpg">
                <img data-srcset="//cdn.shopify.com/s/files/1/0001/products/tee_180x.png 180w, //cdn.shopify.com/s/files/1/0001/products/tee_360x.png 360w">
            </main>"#,
        );
        let base = Url::parse("https://shop.example/products/mug").unwrap();
        let images = ShopifyStrategy.extract_images(&doc, &base).unwrap();

        let urls: Vec<&str> = images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://cdn.shopify.com/s/files/1/0001/products/mug.jpg",
                "https://cdn.shopify.com/s/files/1/0001/products/tee.png",
            ]
        );
        assert_eq!(images[1].source_attribute, "data-srcset");
    }

    #[test]
    fn off_cdn_urls_are_left_alone() {
        let url = Url::parse("https://acme.example/img/photo_600x.jpg?v=2").unwrap();
        assert_eq!(
            original_asset(url).as_str(),
            "https://acme.example/img/photo_600x.jpg?v=2"
        );
    }
}
