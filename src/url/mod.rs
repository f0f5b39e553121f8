//! URL handling module
//!
//! This module provides URL normalization, origin comparison for the same-origin
//! crawl policy, and wildcard matching for render-required URL patterns.

mod matcher;
mod normalize;

pub use matcher::{matches_any, matches_pattern};
pub use normalize::normalize_url;

use url::Url;

/// Returns the origin key `scheme://host[:port]` of a URL
///
/// Default ports are omitted so `https://a.com` and `https://a.com:443` agree.
pub fn origin_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

/// Checks whether two URLs share scheme, host and port
///
/// # Examples
///
/// ```
/// use url::Url;
/// use crawlfleet::url::same_origin;
///
/// let root = Url::parse("https://example.com/").unwrap();
/// assert!(same_origin(&root, &Url::parse("https://EXAMPLE.com/a").unwrap()));
/// assert!(!same_origin(&root, &Url::parse("https://blog.example.com/").unwrap()));
/// assert!(!same_origin(&root, &Url::parse("http://example.com/").unwrap()));
/// ```
pub fn same_origin(a: &Url, b: &Url) -> bool {
    match (origin_key(a), origin_key(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_key_with_port() {
        let url = Url::parse("http://127.0.0.1:8080/page").unwrap();
        assert_eq!(origin_key(&url), Some("http://127.0.0.1:8080".to_string()));
    }

    #[test]
    fn test_origin_key_default_port() {
        let url = Url::parse("https://example.com:443/page").unwrap();
        assert_eq!(origin_key(&url), Some("https://example.com".to_string()));
    }

    #[test]
    fn test_different_ports_are_different_origins() {
        let a = Url::parse("http://127.0.0.1:8080/").unwrap();
        let b = Url::parse("http://127.0.0.1:9090/").unwrap();
        assert!(!same_origin(&a, &b));
    }
}
