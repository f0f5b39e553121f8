/// Checks if a URL matches a render-required wildcard pattern
///
/// `*` matches any run of characters (including none); every other character
/// matches itself. The pattern must match the whole URL string.
///
/// # Examples
///
/// ```
/// use crawlfleet::url::matches_pattern;
///
/// assert!(matches_pattern("*/app/*", "https://example.com/app/dashboard"));
/// assert!(matches_pattern("https://spa.example.com/*", "https://spa.example.com/"));
/// assert!(!matches_pattern("*/app/*", "https://example.com/docs"));
/// ```
pub fn matches_pattern(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    // Position of the last `*` seen and the candidate index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, c));
            p += 1;
        } else if p < pattern.len() && pattern[p] == candidate[c] {
            p += 1;
            c += 1;
        } else if let Some((star, tried)) = backtrack {
            p = star + 1;
            c = tried + 1;
            backtrack = Some((star, tried + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// Returns true if any of the patterns match the candidate
pub fn matches_any(patterns: &[String], candidate: &str) -> bool {
    patterns.iter().any(|p| matches_pattern(p, candidate))
}
