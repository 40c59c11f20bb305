//! Wix strategy.
//!
//! Wix renders images through `wow-image` wrappers whose `data-image-info`
//! JSON names the media asset; rendered `src` values append a `/v1/...`
//! transform path to the same asset.

use brandpipe_shared::{HostKind, ImageAsset, Result, TextBlock};
use scraper::Html;
use url::Url;

use super::{ExtractionStrategy, ImageCollector, ImageRules, collect_text, identity_raw, selector};

const TEXT_ROOTS: &[&str] = &["main", "#SITE_CONTAINER"];

const MEDIA_BASE: &str = "https://static.wixstatic.com/media/";

const RULES: ImageRules = ImageRules {
    lazy_attrs: &["data-src"],
    rewrite_raw: identity_raw,
    canonicalize: strip_transform,
};

pub struct WixStrategy;

impl ExtractionStrategy for WixStrategy {
    fn kind(&self) -> HostKind {
        HostKind::Wix
    }

    fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>> {
        collect_text(doc, TEXT_ROOTS)
    }

    fn extract_images(&self, doc: &Html, base: &Url) -> Result<Vec<ImageAsset>> {
        let mut images = ImageCollector::new(base, &RULES);

        for el in doc.select(&selector("[data-image-info]")?) {
            let Some(raw) = el.value().attr("data-image-info") else {
                continue;
            };
            match parse_image_info(raw) {
                Some((uri, alt)) => {
                    images.push(&uri, "data-image-info", true, alt);
                }
                None => tracing::warn!(info = raw, "malformed data-image-info, skipped"),
            }
        }

        images.collect(doc, "img")?;
        Ok(images.finish())
    }
}

/// Asset URL and alt text from a `data-image-info` payload.
fn parse_image_info(raw: &str) -> Option<(String, Option<String>)> {
    let info: serde_json::Value = serde_json::from_str(raw).ok()?;
    let data = info.get("imageData")?;
    let uri = data.get("uri")?.as_str()?.trim();
    if uri.is_empty() {
        return None;
    }

    let url = if uri.starts_with("http://") || uri.starts_with("https://") || uri.starts_with("//")
    {
        uri.to_string()
    } else {
        format!("{MEDIA_BASE}{}", uri.trim_start_matches('/'))
    };
    let alt = data
        .get("alt")
        .and_then(|a| a.as_str())
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);
    Some((url, alt))
}

fn strip_transform(mut url: Url) -> Url {
    if !url.host_str().is_some_and(|h| h.ends_with("wixstatic.com")) {
        return url;
    }
    if let Some(idx) = url.path().find("/v1/") {
        let original = url.path()[..idx].to_string();
        url.set_path(&original);
        url.set_query(None);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_info_and_rendered_src_dedupe() {
        let doc = Html::parse_document(
            r#"<main>
                <wow-image data-image-info='{"containerId":"c1","imageData":{"uri":"11062b_abc~mv2.jpg","alt":"Storefront"}}'>
                    <img src="https://static.wixstatic.com/media/11062b_abc~mv2.jpg/v1/fill/w_980,h_551/11062b_abc~mv2.jpg">
                </wow-image>
                <wow-image data-image-info='{"imageData": '></wow-image>
                <img data-src="https://static.wixstatic.com/media/logo~mv2.png/v1/fit/w_200/logo~mv2.png">
            </main>"#,
        );
        let base = Url::parse("https://acme.wixsite.com/home").unwrap();
        let images = WixStrategy.extract_images(&doc, &base).unwrap();

        let urls: Vec<&str> = images.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://static.wixstatic.com/media/11062b_abc~mv2.jpg",
                "https://static.wixstatic.com/media/logo~mv2.png",
            ]
        );
        assert_eq!(images[0].alt_text.as_deref(), Some("Storefront"));
        assert_eq!(images[0].source_attribute, "data-image-info");
    }

    #[test]
    fn malformed_image_info_is_none() {
        assert!(parse_image_info("not json").is_none());
        assert!(parse_image_info(r#"{"imageData":{}}"#).is_none());
        assert!(parse_image_info(r#"{"imageData":{"uri":""}}"#).is_none());
    }
}
