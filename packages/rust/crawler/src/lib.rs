//! Crawling, host classification, and platform-aware extraction.
//!
//! This crate provides:
//! - [`HostClassifier`]: detects the hosting platform of a fetched page
//! - [`strategies`]: per-platform text and image extraction
//! - [`PageFetcher`] / [`HttpFetcher`]: page retrieval with SSRF protection
//! - [`CrawlWorker`] / [`WorkerPool`]: lease-driven job processing

pub mod classifier;
pub mod extract;
pub mod fetch;
pub mod strategies;
pub mod worker;

pub use classifier::HostClassifier;
pub use extract::extract_document;
pub use fetch::{FetchedDocument, HttpFetcher, PageFetcher};
pub use strategies::{ExtractionStrategy, StrategyRegistry};
pub use worker::{CrawlContext, CrawlWorker, WorkOutcome, WorkerPool};

#[cfg(test)]
mod tests {
    use brandpipe_shared::{ExtractionResult, HostKind};
    use url::Url;

    use super::*;

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/html/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    fn extract_fixture(name: &str, page_url: &str) -> ExtractionResult {
        let page = FetchedDocument {
            url: Url::parse(page_url).unwrap(),
            status: 200,
            headers: vec![],
            body: load_fixture(name),
        };
        extract_document(
            "brand-1",
            page_url,
            &page,
            &HostClassifier::new(),
            &StrategyRegistry::new(),
        )
    }

    fn urls(result: &ExtractionResult) -> Vec<&str> {
        result.images.iter().map(|i| i.url.as_str()).collect()
    }

    fn assert_absolute_and_unique(result: &ExtractionResult) {
        let mut seen = std::collections::HashSet::new();
        for image in &result.images {
            let url = Url::parse(&image.url).expect("absolute image url");
            assert!(matches!(url.scheme(), "http" | "https"), "{}", image.url);
            assert!(seen.insert(image.url.clone()), "duplicate {}", image.url);
        }
    }

    #[test]
    fn squarespace_lazy_images_and_copy() {
        let result = extract_fixture("squarespace.html", "https://hearthandcrumb.example/");

        assert_eq!(result.detected_host, HostKind::Squarespace);
        assert_eq!(result.images.len(), 3);
        assert!(result.images.iter().all(|i| i.is_lazy_loaded));
        assert_eq!(result.text_blocks.len(), 2);
        assert!(result.text_blocks.iter().all(|b| b.tag == "p"));
        assert!(result.partial_failures.is_empty());
        assert_eq!(result.metadata.site_name.as_deref(), Some("Hearth & Crumb"));
        assert_absolute_and_unique(&result);
    }

    #[test]
    fn wordpress_resolves_and_dedupes() {
        let result = extract_fixture("wordpress.html", "https://northwind.example/");

        assert_eq!(result.detected_host, HostKind::Wordpress);
        assert!(result.host_profile.confidence > 0.5);
        assert_eq!(
            urls(&result),
            vec![
                "https://northwind.example/wp-content/uploads/2024/03/roaster.jpg",
                "https://northwind.example/wp-content/uploads/2024/03/beans.png",
                "https://northwind.example/wp-content/uploads/2024/03/cafe.webp",
            ]
        );
        assert_eq!(result.text_blocks.len(), 4);
        assert_eq!(result.text_blocks[0].tag, "h1");
        assert_absolute_and_unique(&result);
    }

    #[test]
    fn shopify_size_variants_collapse() {
        let result = extract_fixture("shopify.html", "https://tidewater.example/");

        assert_eq!(result.detected_host, HostKind::Shopify);
        assert_eq!(
            urls(&result),
            vec![
                "https://cdn.shopify.com/s/files/1/0001/products/sea-salt.jpg",
                "https://cdn.shopify.com/s/files/1/0001/products/cedar.jpg",
            ]
        );
        assert_eq!(result.text_blocks.len(), 2);
    }

    #[test]
    fn wix_image_info_and_rendered_src_merge() {
        let result = extract_fixture("wix.html", "https://studioalder.example/");

        assert_eq!(result.detected_host, HostKind::Wix);
        assert_eq!(urls(&result), vec!["https://static.wixstatic.com/media/a1b2c3_mug.jpg"]);
        assert_eq!(result.images[0].alt_text.as_deref(), Some("Speckled mug"));
        // Malformed image info is skipped, not a facet failure.
        assert!(result.partial_failures.is_empty());
    }

    #[test]
    fn generic_page_skips_chrome() {
        let result = extract_fixture("generic.html", "https://meridian.example/about");

        assert_eq!(result.detected_host, HostKind::Generic);
        assert_eq!(result.host_profile.confidence, 0.0);
        assert_eq!(urls(&result), vec!["https://meridian.example/images/frame.jpg"]);
        let texts: Vec<&str> = result.text_blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Steel frames, built to last",
                "We measure, design, and braze every frame in our workshop.",
            ]
        );
        assert_eq!(result.metadata.theme_color.as_deref(), Some("#1a3d5c"));
    }

    #[test]
    fn same_body_same_hash() {
        let a = extract_fixture("generic.html", "https://meridian.example/");
        let b = extract_fixture("generic.html", "https://meridian.example/");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.detected_host, b.detected_host);
    }

    /// Job store, worker and HTTP fetcher wired against a local server.
    async fn live_worker() -> (
        CrawlWorker,
        std::sync::Arc<brandpipe_storage::JobStore>,
        std::sync::Arc<brandpipe_storage::Storage>,
    ) {
        use std::sync::Arc;
        use std::time::Duration;

        use brandpipe_shared::{FetchConfig, JobStoreConfig};
        use brandpipe_storage::{JobStore, Storage};

        let path = std::env::temp_dir().join(format!("bp_crawl_e2e_{}.db", uuid::Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&path).await.unwrap());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let jobs = Arc::new(JobStore::new(
            Arc::clone(&storage),
            JobStoreConfig {
                max_attempts: 1,
                visibility_timeout: Duration::from_secs(60),
            },
            tx,
        ));
        let fetcher = HttpFetcher::new(&FetchConfig {
            timeout: Duration::from_secs(5),
            max_redirects: 3,
            allow_private_hosts: true,
        })
        .unwrap();
        let ctx = CrawlContext {
            jobs: Arc::clone(&jobs),
            storage: Arc::clone(&storage),
            fetcher: Arc::new(fetcher),
            classifier: Arc::new(HostClassifier::new()),
            registry: Arc::new(StrategyRegistry::new()),
        };
        (CrawlWorker::new("w-e2e", ctx), jobs, storage)
    }

    #[tokio::test]
    async fn squarespace_page_crawls_end_to_end() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(load_fixture("squarespace.html")),
            )
            .mount(&server)
            .await;

        let (worker, jobs, storage) = live_worker().await;
        let job_id = jobs.enqueue("hearth", &server.uri()).await.unwrap();

        let WorkOutcome::Succeeded { result_ref, .. } = worker.run_once().await.unwrap() else {
            panic!("expected the crawl to succeed");
        };

        let job = jobs.get("hearth", &job_id).await.unwrap();
        assert_eq!(job.state, brandpipe_shared::JobState::Succeeded);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.result_ref.as_deref(), Some(result_ref.as_str()));

        let stored = storage
            .get_extraction_result("hearth", &result_ref)
            .await
            .unwrap()
            .expect("result persisted for the brand");
        assert_eq!(stored.detected_host, HostKind::Squarespace);
        assert_eq!(stored.images.len(), 3);
        assert_eq!(stored.text_blocks.len(), 2);
        assert!(stored.partial_failures.is_empty());
        assert_absolute_and_unique(&stored);
    }
}
