//! Hosting platform detection.
//!
//! Signals are checked in category order: CDN hostnames in resource URLs,
//! meta generator tags, characteristic DOM markup, then response headers.
//! The first signal that matches picks the platform; confidence is the share
//! of that platform's signals that matched.

use brandpipe_shared::{HostKind, HostProfile};
use scraper::{Html, Selector};

/// How a signal is checked against a page.
#[derive(Debug, Clone, Copy)]
enum Check {
    /// Substring of any resource URL (src, href, srcset, ...).
    Cdn(&'static str),
    /// Case-insensitive substring of `<meta name="generator">`.
    Generator(&'static str),
    /// At least one element matches the CSS selector.
    Dom(&'static str),
    /// Response header `name` contains `value` (empty = header present).
    Header {
        name: &'static str,
        value: &'static str,
    },
}

#[derive(Debug, Clone, Copy)]
struct Signal {
    host: HostKind,
    check: Check,
}

const fn signal(host: HostKind, check: Check) -> Signal {
    Signal { host, check }
}

/// Every signal, in evaluation order.
const SIGNALS: &[Signal] = &[
    // CDN hostnames
    signal(HostKind::Squarespace, Check::Cdn("images.squarespace-cdn.com")),
    signal(HostKind::Squarespace, Check::Cdn("static1.squarespace.com")),
    signal(HostKind::Wordpress, Check::Cdn("/wp-content/")),
    signal(HostKind::Wordpress, Check::Cdn("/wp-includes/")),
    signal(HostKind::Shopify, Check::Cdn("cdn.shopify.com")),
    signal(HostKind::Wix, Check::Cdn("static.wixstatic.com")),
    signal(HostKind::Wix, Check::Cdn("static.parastorage.com")),
    // Generator tags
    signal(HostKind::Squarespace, Check::Generator("squarespace")),
    signal(HostKind::Wordpress, Check::Generator("wordpress")),
    signal(HostKind::Wix, Check::Generator("wix.com")),
    // Characteristic markup
    signal(HostKind::Squarespace, Check::Dom("[data-image-dimensions]")),
    signal(HostKind::Squarespace, Check::Dom(".sqs-block")),
    signal(HostKind::Wordpress, Check::Dom(r#"link[rel="https://api.w.org/"]"#)),
    signal(HostKind::Wordpress, Check::Dom(r#"[class*="wp-block-"]"#)),
    signal(HostKind::Shopify, Check::Dom("script#shopify-features")),
    signal(HostKind::Shopify, Check::Dom(r#"link[href*="myshopify.com"]"#)),
    signal(HostKind::Wix, Check::Dom("wow-image")),
    signal(HostKind::Wix, Check::Dom("[data-mesh-id]")),
    // Response headers
    signal(HostKind::Squarespace, Check::Header { name: "server", value: "squarespace" }),
    signal(HostKind::Wordpress, Check::Header { name: "link", value: "wp-json" }),
    signal(HostKind::Shopify, Check::Header { name: "x-shopid", value: "" }),
    signal(HostKind::Shopify, Check::Header { name: "powered-by", value: "shopify" }),
    signal(HostKind::Wix, Check::Header { name: "x-wix-request-id", value: "" }),
];

/// Attributes whose values are treated as resource URLs for CDN checks.
const URL_ATTRIBUTES: &[&str] = &[
    "src",
    "href",
    "srcset",
    "content",
    "data-src",
    "data-srcset",
    "data-image",
    "data-lazy-src",
];

/// Deterministic host classifier. Selectors are compiled once at construction.
pub struct HostClassifier {
    dom_selectors: Vec<Option<Selector>>,
    generator: Option<Selector>,
}

impl HostClassifier {
    pub fn new() -> Self {
        let dom_selectors = SIGNALS
            .iter()
            .map(|s| match s.check {
                Check::Dom(css) => Selector::parse(css).ok(),
                _ => None,
            })
            .collect();

        Self {
            dom_selectors,
            generator: Selector::parse(r#"meta[name="generator"]"#).ok(),
        }
    }

    /// Classify a page from its (lowercase-named) response headers and DOM.
    pub fn classify(&self, headers: &[(String, String)], doc: &Html) -> HostProfile {
        let resource_urls = collect_resource_urls(doc);
        let generators: Vec<String> = self
            .generator
            .as_ref()
            .map(|sel| {
                doc.select(sel)
                    .filter_map(|el| el.value().attr("content"))
                    .map(str::to_lowercase)
                    .collect()
            })
            .unwrap_or_default();

        let matched: Vec<bool> = SIGNALS
            .iter()
            .enumerate()
            .map(|(i, s)| match s.check {
                Check::Cdn(needle) => resource_urls.iter().any(|u| u.contains(needle)),
                Check::Generator(needle) => generators.iter().any(|g| g.contains(needle)),
                Check::Dom(_) => self.dom_selectors[i]
                    .as_ref()
                    .is_some_and(|sel| doc.select(sel).next().is_some()),
                Check::Header { name, value } => headers.iter().any(|(k, v)| {
                    k.eq_ignore_ascii_case(name) && v.to_lowercase().contains(value)
                }),
            })
            .collect();

        let Some(first) = matched.iter().position(|m| *m) else {
            return HostProfile::generic();
        };
        let host_kind = SIGNALS[first].host;

        let mut total = 0usize;
        let mut signals = Vec::new();
        for (s, hit) in SIGNALS.iter().zip(&matched) {
            if s.host != host_kind {
                continue;
            }
            total += 1;
            if *hit {
                signals.push(describe(&s.check));
            }
        }

        HostProfile {
            host_kind,
            confidence: signals.len() as f64 / total as f64,
            signals,
        }
    }
}

impl Default for HostClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_resource_urls(doc: &Html) -> Vec<String> {
    let mut urls = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(el) = scraper::ElementRef::wrap(node) else {
            continue;
        };
        for attr in URL_ATTRIBUTES {
            if let Some(value) = el.value().attr(attr) {
                urls.push(value.to_string());
            }
        }
    }
    urls
}

fn describe(check: &Check) -> String {
    match check {
        Check::Cdn(needle) => format!("cdn:{needle}"),
        Check::Generator(needle) => format!("generator:{needle}"),
        Check::Dom(css) => format!("dom:{css}"),
        Check::Header { name, .. } => format!("header:{name}"),
    }
}
