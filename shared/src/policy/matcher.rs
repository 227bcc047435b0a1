//! Path patterns used for guard exclusions and route registration.
//!
//! Supported forms:
//! - exact: `/favicon.ico`
//! - `:param` segments: `/tools/:site/dashboard`
//! - trailing wildcard: `/api/*` matches `/api` and everything below it

/// Strip the query string and fragment from a request target.
pub fn clean_path(request_path: &str) -> &str {
    let end = request_path
        .find(|c| c == '?' || c == '#')
        .unwrap_or(request_path.len());
    &request_path[..end]
}

pub fn path_matches(pattern: &str, request_path: &str) -> bool {
    let clean = clean_path(request_path);

    if pattern == clean {
        return true;
    }

    if let Some(base) = pattern.strip_suffix("/*") {
        return match clean.strip_prefix(base) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        };
    }

    // Segment-by-segment matching for `:param` wildcards.
    let pattern_segs: Vec<&str> = pattern.split('/').collect();
    let path_segs: Vec<&str> = clean.split('/').collect();

    if pattern_segs.len() != path_segs.len() {
        return false;
    }

    pattern_segs
        .iter()
        .zip(path_segs.iter())
        .all(|(r, p)| (r.starts_with(':') && !p.is_empty()) || r == p)
}

/// Ordered list of patterns that bypass the access guard.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    patterns: Vec<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// First matching pattern, if any.
    pub fn matching(&self, request_path: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|p| path_matches(p, request_path))
            .map(String::as_str)
    }

    pub fn is_excluded(&self, request_path: &str) -> bool {
        self.matching(request_path).is_some()
    }
}
