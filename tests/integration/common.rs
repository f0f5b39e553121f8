use crawlfleet::config::{parse_config, Config};
use crawlfleet::storage::{open_store, SqliteStore};
use std::time::Duration;
use tempfile::TempDir;

/// Minimal worker config plus extra TOML tables
pub fn test_config(extra: &str) -> Config {
    let content = format!(
        r#"
{}

[broker]
url = "memory://"
reconnect-base-ms = 5
reconnect-cap-ms = 20
max-reconnect-attempts = 10

[store]
database-path = "./unused.db"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
"#,
        extra
    );
    parse_config(&content).expect("test config should be valid")
}

/// A store in a fresh temp directory; keep the `TempDir` alive for the test
pub fn temp_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir.path().join("fleet.db")).unwrap();
    (dir, store)
}

/// Polls `check` until it returns true or `timeout` passes
pub async fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Page body long enough to pass the substantially-empty check
pub fn article(title: &str, links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">link</a>"#, l))
        .collect();
    format!(
        r#"<html><head><title>{title}</title></head><body>
        <p>{title} explains how the fleet schedules crawls across many workers,
        and how each worker keeps its pages, documents and embeddings in order.</p>
        {anchors}
        </body></html>"#
    )
}
