//! Platform-specific extraction strategies.
//!
//! Each [`HostKind`] has one [`ExtractionStrategy`]; [`StrategyRegistry`] maps
//! a classified host to its strategy and falls back to [`GenericStrategy`].

mod generic;
mod shopify;
mod squarespace;
mod wix;
mod wordpress;

use std::collections::{HashMap, HashSet};

use brandpipe_shared::{BrandPipeError, HostKind, ImageAsset, PageMetadata, Result, TextBlock};
use scraper::{ElementRef, Html, Selector};
use url::Url;

pub use generic::GenericStrategy;
pub use shopify::ShopifyStrategy;
pub use squarespace::SquarespaceStrategy;
pub use wix::WixStrategy;
pub use wordpress::WordpressStrategy;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Extracts copy and imagery from a parsed page of one hosting platform.
pub trait ExtractionStrategy: Send + Sync {
    /// Platform this strategy handles.
    fn kind(&self) -> HostKind;

    /// Headings and paragraphs of the main content, in document order.
    fn extract_text(&self, doc: &Html) -> Result<Vec<TextBlock>>;

    /// Images with absolute, canonical, deduplicated URLs.
    fn extract_images(&self, doc: &Html, base: &Url) -> Result<Vec<ImageAsset>>;

    /// Page-level metadata; shared across platforms.
    fn extract_metadata(&self, doc: &Html) -> Result<PageMetadata> {
        extract_metadata(doc)
    }

    fn name(&self) -> &str {
        self.kind().as_str()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Lookup table from host kind to strategy.
pub struct StrategyRegistry {
    strategies: HashMap<HostKind, Box<dyn ExtractionStrategy>>,
    fallback: GenericStrategy,
}

impl StrategyRegistry {
    /// Registry with every built-in strategy.
    pub fn new() -> Self {
        let mut registry = Self {
            strategies: HashMap::new(),
            fallback: GenericStrategy,
        };
        registry.register(Box::new(SquarespaceStrategy));
        registry.register(Box::new(WordpressStrategy));
        registry.register(Box::new(ShopifyStrategy));
        registry.register(Box::new(WixStrategy));
        registry.register(Box::new(GenericStrategy));
        registry
    }

    /// Install `strategy` for its kind, replacing any previous one.
    pub fn register(&mut self, strategy: Box<dyn ExtractionStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Strategy for `kind`; unregistered kinds get the generic strategy.
    pub fn select(&self, kind: HostKind) -> &dyn ExtractionStrategy {
        self.strategies
            .get(&kind)
            .or_else(|| self.strategies.get(&HostKind::Generic))
            .map(|s| s.as_ref())
            .unwrap_or(&self.fallback)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared extraction helpers
// ---------------------------------------------------------------------------

/// Elements whose descendants never contribute copy.
const CHROME_TAGS: &[&str] = &["nav", "footer", "aside", "script", "style", "noscript", "template"];

pub(crate) fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| BrandPipeError::extraction("selector", format!("{css}: {e:?}")))
}

/// Collect `h1`-`h6` and `p` blocks under the first matching root, or the
/// whole body when no root matches.
pub(crate) fn collect_text(doc: &Html, roots: &[&str]) -> Result<Vec<TextBlock>> {
    let blocks_sel = selector("h1, h2, h3, h4, h5, h6, p")?;

    let mut root = None;
    for css in roots.iter().copied().chain(["body"]) {
        if let Some(el) = doc.select(&selector(css)?).next() {
            root = Some(el);
            break;
        }
    }
    let Some(root) = root else {
        return Ok(Vec::new());
    };

    let blocks = root
        .select(&blocks_sel)
        .filter(|el| !inside_chrome(el))
        .filter_map(|el| {
            let text = normalize_whitespace(&el.text().collect::<String>());
            (!text.is_empty()).then(|| TextBlock {
                tag: el.value().name().to_string(),
                text,
            })
        })
        .collect();
    Ok(blocks)
}

fn inside_chrome(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| CHROME_TAGS.contains(&a.value().name()))
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// How a platform exposes and canonicalises image URLs.
pub(crate) struct ImageRules {
    /// Lazy-load attributes, in preference order, read before `src`.
    pub lazy_attrs: &'static [&'static str],
    /// Applied to the raw attribute value before resolution.
    pub rewrite_raw: fn(&str) -> String,
    /// Applied to the resolved absolute URL.
    pub canonicalize: fn(Url) -> Url,
}

impl ImageRules {
    pub(crate) const PLAIN: ImageRules = ImageRules {
        lazy_attrs: &[],
        rewrite_raw: identity_raw,
        canonicalize: identity_url,
    };
}

pub(crate) fn identity_raw(raw: &str) -> String {
    raw.to_string()
}

fn identity_url(url: Url) -> Url {
    url
}

/// Accumulates images, resolving against `base` and dropping duplicates.
pub(crate) struct ImageCollector<'a> {
    base: &'a Url,
    rules: &'a ImageRules,
    seen: HashSet<String>,
    images: Vec<ImageAsset>,
}

impl<'a> ImageCollector<'a> {
    pub(crate) fn new(base: &'a Url, rules: &'a ImageRules) -> Self {
        Self {
            base,
            rules,
            seen: HashSet::new(),
            images: Vec::new(),
        }
    }

    /// Add every element matching `css`, preferring lazy attributes over `src`.
    pub(crate) fn collect(&mut self, doc: &Html, css: &str) -> Result<()> {
        for el in doc.select(&selector(css)?) {
            let alt = el
                .value()
                .attr("alt")
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);

            let lazy = self.rules.lazy_attrs.iter().find_map(|attr| {
                el.value()
                    .attr(attr)
                    .and_then(|v| pick_candidate(attr, v))
                    .map(|v| (*attr, v))
            });

            match lazy {
                Some((attr, raw)) => {
                    self.push(&raw, attr, true, alt);
                }
                None => {
                    if let Some(raw) = el.value().attr("src").and_then(|v| pick_candidate("src", v))
                    {
                        self.push(&raw, "src", false, alt);
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve and add one raw URL. Returns `false` when it was skipped.
    pub(crate) fn push(
        &mut self,
        raw: &str,
        attribute: &str,
        is_lazy_loaded: bool,
        alt_text: Option<String>,
    ) -> bool {
        let rewritten = (self.rules.rewrite_raw)(raw.trim());
        let Ok(resolved) = self.base.join(&rewritten) else {
            tracing::debug!(raw, "unresolvable image url");
            return false;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            return false;
        }

        let mut url = (self.rules.canonicalize)(resolved);
        url.set_fragment(None);
        let key = url.to_string();
        if !self.seen.insert(key.clone()) {
            return false;
        }

        self.images.push(ImageAsset {
            url: key,
            alt_text,
            is_lazy_loaded,
            source_attribute: attribute.to_string(),
        });
        true
    }

    pub(crate) fn finish(self) -> Vec<ImageAsset> {
        self.images
    }
}

/// Usable URL from an attribute value; `srcset` values yield their last
/// (largest) candidate. Placeholders (`data:`, blank) yield nothing.
fn pick_candidate(attr: &str, value: &str) -> Option<String> {
    let value = value.trim();
    let candidate = if attr.ends_with("srcset") {
        value
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .last()?
    } else {
        value
    };

    if candidate.is_empty() || candidate.starts_with("data:") || candidate.starts_with("about:") {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Title, description, site name, preview image, and theme colour.
pub(crate) fn extract_metadata(doc: &Html) -> Result<PageMetadata> {
    let meta_content = |css: &str| -> Result<Option<String>> {
        Ok(doc
            .select(&selector(css)?)
            .filter_map(|el| el.value().attr("content"))
            .map(normalize_whitespace)
            .find(|c| !c.is_empty()))
    };

    let title = match doc.select(&selector("title")?).next() {
        Some(el) => Some(normalize_whitespace(&el.text().collect::<String>())).filter(|t| !t.is_empty()),
        None => None,
    };

    Ok(PageMetadata {
        title: title.or(meta_content(r#"meta[property="og:title"]"#)?),
        description: meta_content(r#"meta[name="description"]"#)?
            .or(meta_content(r#"meta[property="og:description"]"#)?),
        site_name: meta_content(r#"meta[property="og:site_name"]"#)?,
        og_image: meta_content(r#"meta[property="og:image"]"#)?,
        theme_color: meta_content(r#"meta[name="theme-color"]"#)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingImages;

    impl ExtractionStrategy for FailingImages {
        fn kind(&self) -> HostKind {
            HostKind::Wix
        }
        fn extract_text(&self, _doc: &Html) -> Result<Vec<TextBlock>> {
            Ok(Vec::new())
        }
        fn extract_images(&self, _doc: &Html, _base: &Url) -> Result<Vec<ImageAsset>> {
            Err(BrandPipeError::extraction("images", "boom"))
        }
    }

    #[test]
    fn registry_selects_by_kind() {
        let registry = StrategyRegistry::new();
        for kind in HostKind::ALL {
            assert_eq!(registry.select(kind).kind(), kind);
        }
    }

    #[test]
    fn register_replaces_strategy() {
        let mut registry = StrategyRegistry::new();
        registry.register(Box::new(FailingImages));
        let doc = Html::parse_document("<p>x</p>");
        let base = Url::parse("https://acme.example/").unwrap();
        assert!(registry.select(HostKind::Wix).extract_images(&doc, &base).is_err());
    }

    #[test]
    fn text_skips_chrome_and_blank_blocks() {
        let doc = Html::parse_document(
            r#"<body>
                <nav><p>Menu</p></nav>
                <main><h1>  Our   Story </h1><p></p><p>Baked daily.</p></main>
                <footer><p>Copyright</p></footer>
            </body>"#,
        );
        let blocks = collect_text(&doc, &["main"]).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].tag, "h1");
        assert_eq!(blocks[0].text, "Our Story");
        assert_eq!(blocks[1].text, "Baked daily.");
    }

    #[test]
    fn text_falls_back_to_body() {
        let doc = Html::parse_document("<body><p>Only body</p></body>");
        let blocks = collect_text(&doc, &["#missing"]).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn srcset_picks_last_candidate() {
        assert_eq!(
            pick_candidate("data-srcset", "a.jpg 100w, b.jpg 800w").as_deref(),
            Some("b.jpg")
        );
        assert_eq!(pick_candidate("src", "data:image/gif;base64,R0lG"), None);
        assert_eq!(pick_candidate("src", "  "), None);
    }

    #[test]
    fn metadata_prefers_title_then_og() {
        let doc = Html::parse_document(
            r##"<html><head>
                <meta property="og:title" content="OG Title">
                <meta property="og:site_name" content="Acme">
                <meta name="theme-color" content="#ff6600">
                <meta property="og:description" content="Fresh goods">
            </head><body></body></html>"##,
        );
        let meta = extract_metadata(&doc).unwrap();
        assert_eq!(meta.title.as_deref(), Some("OG Title"));
        assert_eq!(meta.site_name.as_deref(), Some("Acme"));
        assert_eq!(meta.theme_color.as_deref(), Some("#ff6600"));
        assert_eq!(meta.description.as_deref(), Some("Fresh goods"));
    }
}
