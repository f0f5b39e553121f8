//! Integration tests for the crawl pipeline and the embedding stage
//!
//! These use wiremock for the crawled site, the render service and the
//! embedding API, and run full sessions against a SQLite store.

use crate::common::{article, temp_store, test_config};
use crawlfleet::config::{CrawlerConfig, RenderConfig};
use crawlfleet::crawler::{
    build_http_client, CrawlPipeline, CrawlRequest, HttpRenderer, PageFetcher, PageRenderer,
};
use crawlfleet::embedding::{EmbeddingStage, HttpEmbeddingProvider};
use crawlfleet::job::{JobError, JobPayload};
use crawlfleet::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

fn crawler_config() -> CrawlerConfig {
    CrawlerConfig {
        retry_base_ms: 1,
        max_retries: 1,
        ..CrawlerConfig::default()
    }
}

fn pipeline(
    store: Arc<dyn Store>,
    renderer: Option<Arc<dyn PageRenderer>>,
    crawler: &CrawlerConfig,
) -> CrawlPipeline {
    let config = test_config("");
    let client = build_http_client(&config.user_agent, Duration::from_secs(5)).unwrap();
    let render = RenderConfig {
        enabled: renderer.is_some(),
        ..RenderConfig::default()
    };
    CrawlPipeline::new(
        PageFetcher::new(client, crawler),
        renderer,
        store,
        crawler,
        &render,
    )
}

fn render_service(server: &MockServer) -> Arc<dyn PageRenderer> {
    Arc::new(HttpRenderer::new(
        reqwest::Client::new(),
        format!("{}/render", server.uri()),
        Duration::from_secs(5),
    ))
}

#[tokio::test]
async fn test_crawl_follows_links_and_stores_documents() {
    let site = MockServer::start().await;
    let base = site.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(article(
            "Home",
            &[format!("{}/guide", base), format!("{}/faq", base)],
        )))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(html(article("Guide", &[format!("{}/", base)])))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/faq"))
        .respond_with(html(article("FAQ", &[])))
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let store = Arc::new(store);
    let crawler = crawler_config();
    let request =
        CrawlRequest::from_payload(&JobPayload::crawl(format!("{}/", base)), &crawler).unwrap();

    let outcome = pipeline(store.clone(), None, &crawler)
        .run(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.pages_crawled, 3);
    assert_eq!(outcome.report.documents_stored, 3);
    assert!(outcome.report.errors.is_empty());
    assert_eq!(store.count_documents().unwrap(), 3);

    let guide = store
        .get_document(&format!("{}/guide", base))
        .unwrap()
        .expect("guide should be stored");
    assert_eq!(guide.title.as_deref(), Some("Guide"));
    assert!(!guide.rendered);
}

#[tokio::test]
async fn test_broken_link_is_recorded_and_crawl_continues() {
    let site = MockServer::start().await;
    let base = site.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(article(
            "Home",
            &[format!("{}/broken", base), format!("{}/guide", base)],
        )))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/guide"))
        .respond_with(html(article("Guide", &[])))
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let store = Arc::new(store);
    let crawler = crawler_config();
    let request =
        CrawlRequest::from_payload(&JobPayload::crawl(format!("{}/", base)), &crawler).unwrap();

    let outcome = pipeline(store.clone(), None, &crawler)
        .run(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.documents_stored, 2);
    assert_eq!(outcome.report.errors.len(), 1);
    assert_eq!(outcome.report.errors[0].url, format!("{}/broken", base));
    assert!(outcome.report.errors[0].reason.contains("404"));
    assert!(store
        .get_document(&format!("{}/broken", base))
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_unavailable_root_is_retryable() {
    let site = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let store = Arc::new(store);
    let crawler = crawler_config();
    let request =
        CrawlRequest::from_payload(&JobPayload::crawl(format!("{}/", site.uri())), &crawler)
            .unwrap();

    let err = pipeline(store.clone(), None, &crawler)
        .run(&request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::RootFailed { .. }));
    assert!(err.is_retryable());
    assert_eq!(store.count_documents().unwrap(), 0);
    // one attempt plus the configured retry
    assert_eq!(site.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_depth_limit_stops_at_root() {
    let site = MockServer::start().await;
    let base = site.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(article("Home", &[format!("{}/deeper", base)])))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path("/deeper"))
        .respond_with(html(article("Deeper", &[])))
        .expect(0)
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let crawler = crawler_config();
    let mut payload = JobPayload::crawl(format!("{}/", base));
    payload.options.max_depth = Some(0);
    let request = CrawlRequest::from_payload(&payload, &crawler).unwrap();

    let outcome = pipeline(Arc::new(store), None, &crawler)
        .run(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.documents_stored, 1);
    assert_eq!(outcome.stored_urls.len(), 1);
}

#[tokio::test]
async fn test_empty_shell_falls_back_to_rendering() {
    let site = MockServer::start().await;
    let base = site.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><body><div id="root"></div><script src="/app.js"></script></body></html>"#
                .to_string(),
        ))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "html": article("Rendered app", &[])
        })))
        .expect(1)
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let store = Arc::new(store);
    let crawler = crawler_config();
    let request =
        CrawlRequest::from_payload(&JobPayload::crawl(format!("{}/", base)), &crawler).unwrap();

    let outcome = pipeline(store.clone(), Some(render_service(&site)), &crawler)
        .run(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.report.documents_stored, 1);
    let stored = store
        .get_document(&outcome.stored_urls[0])
        .unwrap()
        .unwrap();
    assert!(stored.rendered);
    assert_eq!(stored.title.as_deref(), Some("Rendered app"));
}

#[tokio::test]
async fn test_root_empty_after_rendering_fails_the_crawl() {
    let site = MockServer::start().await;
    let base = site.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("<html><body></body></html>".to_string()))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "html": "<html><body><div id=\"root\"></div></body></html>"
        })))
        .mount(&site)
        .await;

    let (_dir, store) = temp_store();
    let store = Arc::new(store);
    let crawler = crawler_config();
    let request =
        CrawlRequest::from_payload(&JobPayload::crawl(format!("{}/", base)), &crawler).unwrap();

    let result = pipeline(store.clone(), Some(render_service(&site)), &crawler)
        .run(&request, &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(JobError::RootFailed { .. })));
    assert_eq!(store.count_documents().unwrap(), 0);
}

#[tokio::test]
async fn test_embedding_failure_is_isolated_to_one_document() {
    let api = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_string_contains("poison"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"message": "input rejected"}
        })))
        .mount(&api)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"index": 0, "embedding": [0.25, 0.5, 0.75]}]
        })))
        .mount(&api)
        .await;

    let config = test_config(&format!(
        r#"
[embedding]
enabled = true
endpoint = "{}/v1/embeddings"
batch-size = 1
max-retries = 0
requests-per-second = 1000.0
"#,
        api.uri()
    ));
    let provider = HttpEmbeddingProvider::new(
        format!("{}/v1/embeddings", api.uri()),
        config.embedding.model.clone(),
        None,
        Duration::from_secs(5),
    )
    .unwrap();
    let stage = EmbeddingStage::new(Arc::new(provider), &config.embedding);

    let documents: Vec<_> = ["first page", "poison page", "third page"]
        .iter()
        .enumerate()
        .map(|(i, text)| crawlfleet::crawler::Document {
            url: format!("https://example.com/{}", i),
            title: None,
            description: None,
            text: text.to_string(),
            links: vec![],
            content_hash: crawlfleet::crawler::content_hash(text),
            rendered: false,
        })
        .collect();

    let results = stage.embed_documents(&documents).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].outcome.is_embedded());
    assert!(!results[1].outcome.is_embedded());
    assert!(results[2].outcome.is_embedded());
    assert_eq!(results[1].url, "https://example.com/1");
}
