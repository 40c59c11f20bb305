//! Page fetching behind the [`PageFetcher`] seam.
//!
//! [`HttpFetcher`] is the default implementation: a reqwest client with an
//! explicit timeout, a redirect limit, and SSRF protection.

use std::net::IpAddr;

use async_trait::async_trait;
use brandpipe_shared::{BrandPipeError, FetchConfig, Result};
use reqwest::Client;
use tracing::{debug, instrument, warn};
use url::Url;

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("brandpipe/", env!("CARGO_PKG_VERSION"));

/// A fetched page: final URL after redirects, status, headers, and body.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: Url,
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Retrieves a page for extraction.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(config.timeout)
            .build()
            .map_err(|e| BrandPipeError::Fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<FetchedDocument> {
        if !self.allow_private_hosts && is_ssrf_target(url) {
            warn!("SSRF protection: blocked");
            return Err(BrandPipeError::invalid_input(format!(
                "{url}: private or local address not allowed"
            )));
        }

        debug!("fetching page");
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| BrandPipeError::Fetch(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BrandPipeError::Fetch(format!("{url}: HTTP {status}")));
        }

        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| BrandPipeError::Fetch(format!("{url}: body read failed: {e}")))?;

        Ok(FetchedDocument {
            url: final_url,
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(allow_private_hosts: bool) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(5),
            max_redirects: 3,
            allow_private_hosts,
        }
    }

    #[test]
    fn ssrf_blocks_private_and_local_targets() {
        for raw in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://printer.local/",
        ] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url), "{raw}");
        }
    }

    #[test]
    fn ssrf_allows_public() {
        let url = Url::parse("https://www.acme.example/about").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[tokio::test]
    async fn private_target_is_invalid_input() {
        let fetcher = HttpFetcher::new(&config(false)).unwrap();
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, BrandPipeError::InvalidInput { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn fetch_returns_body_and_lowercase_headers() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("X-ShopId", "42")
                    .set_body_string("<html><body><p>hi</p></body></html>"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config(true)).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let doc = fetcher.fetch(&url).await.unwrap();

        assert_eq!(doc.status, 200);
        assert!(doc.body.contains("<p>hi</p>"));
        assert!(doc.headers.iter().any(|(k, v)| k == "x-shopid" && v == "42"));
    }

    #[tokio::test]
    async fn http_error_is_retryable_fetch_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&config(true)).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();

        assert!(matches!(err, BrandPipeError::Fetch(_)));
        assert!(err.to_string().contains("503"));
        assert!(err.is_retryable());
    }
}
