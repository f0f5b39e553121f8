//! Crawl session bookkeeping
//!
//! This module tracks one crawl job's view of the site:
//! - The breadth-first frontier of URLs still to fetch
//! - The visited set (dispatched or redirected-to URLs)
//! - Content hashes already stored, for duplicate skipping
//!
//! All mutation happens on the pipeline's coordinator task.

use crate::url::{normalize_url, same_origin};
use std::collections::{HashSet, VecDeque};
use url::Url;

/// A URL waiting in the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,

    /// Link distance from the root (root is 0)
    pub depth: u32,
}

/// State of one crawl, dropped when the job finishes
#[derive(Debug)]
pub struct CrawlSession {
    root: Url,
    max_depth: u32,
    same_origin: bool,
    frontier: VecDeque<FrontierEntry>,
    /// Keys of URLs currently in `frontier`
    queued: HashSet<String>,
    visited: HashSet<String>,
    content_hashes: HashSet<String>,
    render_required: bool,
}

impl CrawlSession {
    /// Starts a session with `root` (already normalized) queued at depth 0
    pub fn new(root: Url, max_depth: u32, same_origin: bool) -> Self {
        let mut session = Self {
            root: root.clone(),
            max_depth,
            same_origin,
            frontier: VecDeque::new(),
            queued: HashSet::new(),
            visited: HashSet::new(),
            content_hashes: HashSet::new(),
            render_required: false,
        };
        session.queued.insert(root.to_string());
        session.frontier.push_back(FrontierEntry { url: root, depth: 0 });
        session
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Takes the next URL off the frontier and marks it visited
    pub fn next(&mut self) -> Option<FrontierEntry> {
        let entry = self.frontier.pop_front()?;
        let key = entry.url.to_string();
        self.queued.remove(&key);
        self.visited.insert(key);
        Some(entry)
    }

    /// Marks a URL reached by redirect as visited
    ///
    /// Returns false if it was already visited; the page is a duplicate. A URL
    /// still waiting in the frontier is removed from it.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        let key = url.to_string();
        if self.visited.contains(&key) {
            return false;
        }
        if self.queued.remove(&key) {
            self.frontier.retain(|e| e.url != *url);
        }
        self.visited.insert(key);
        true
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }

    pub fn is_queued(&self, url: &Url) -> bool {
        self.queued.contains(url.as_str())
    }

    /// Normalizes, filters and enqueues links found on a page at `parent_depth`
    ///
    /// Links are dropped when they fail to normalize, leave the root's origin
    /// (if same-origin is on), would exceed the depth limit, or are already
    /// visited or queued. Returns how many were enqueued.
    pub fn discover(&mut self, links: &[String], parent_depth: u32) -> usize {
        let depth = parent_depth + 1;
        if depth > self.max_depth {
            return 0;
        }

        let mut added = 0;
        for link in links {
            let Ok(url) = normalize_url(link) else {
                continue;
            };
            if self.same_origin && !same_origin(&self.root, &url) {
                continue;
            }

            let key = url.to_string();
            if self.visited.contains(&key) || self.queued.contains(&key) {
                continue;
            }

            self.queued.insert(key);
            self.frontier.push_back(FrontierEntry { url, depth });
            added += 1;
        }
        added
    }

    /// Remembers a stored content hash; false if it was already seen
    pub fn record_content_hash(&mut self, hash: &str) -> bool {
        self.content_hashes.insert(hash.to_string())
    }

    pub fn set_render_required(&mut self) {
        self.render_required = true;
    }

    pub fn render_required(&self) -> bool {
        self.render_required
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn visited_len(&self) -> usize {
        self.visited.len()
    }

    /// URLs known to the session, visited or queued
    pub fn discovered_len(&self) -> usize {
        self.visited.len() + self.queued.len()
    }

    /// Checks that no URL is both visited and queued and no entry is too deep
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(url) = self.queued.iter().find(|k| self.visited.contains(*k)) {
            return Err(format!("{} is both visited and queued", url));
        }
        if self.queued.len() != self.frontier.len() {
            return Err(format!(
                "frontier holds {} entries but {} are marked queued",
                self.frontier.len(),
                self.queued.len()
            ));
        }
        if let Some(entry) = self.frontier.iter().find(|e| e.depth > self.max_depth) {
            return Err(format!(
                "{} queued at depth {} beyond limit {}",
                entry.url, entry.depth, self.max_depth
            ));
        }
        Ok(())
    }
}
