//! Integration tests for crawlfleet
//!
//! HTTP collaborators are wiremock servers; the broker is the in-memory
//! implementation and the store is SQLite in a temp directory.

mod common;
mod crawl_tests;
mod worker_tests;
