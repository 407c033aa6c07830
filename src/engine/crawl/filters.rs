// URL filtering and normalization for the crawl engine's BFS frontier.
// Pattern matching follows the original's post-fetch fnmatch exclude check,
// generalized to a glob-based include/exclude pair so both directions share
// one matcher type.

use crate::atoms::error::{EngineError, EngineResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use url::Url;

/// Builds a `GlobSet` from glob patterns. An empty pattern list yields an
/// empty set, which `GlobSet::is_match` always reports `false` for — callers
/// treat an empty include set as "no restriction" and an empty exclude set
/// as "nothing excluded".
pub fn build_matcher(patterns: &[String]) -> EngineResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| EngineError::invalid(format!("invalid glob pattern {pattern:?}: {e}")))?;
        builder.add(glob);
    }
    builder.build().map_err(|e| EngineError::invalid(format!("failed to build glob matcher: {e}")))
}

/// A URL passes the filter chain if it matches at least one include pattern
/// (or there are none) and matches no exclude pattern.
pub fn passes_filters(url: &str, include: &GlobSet, exclude: &GlobSet) -> bool {
    if !include.is_empty() && !include.is_match(url) {
        return false;
    }
    !exclude.is_match(url)
}

/// Resolves `href` against `base`, stripping the fragment. Returns `None`
/// for URLs this crawler never follows (non-http(s) schemes, unparseable
/// hrefs).
pub fn normalize_link(base: &Url, href: &str) -> Option<Url> {
    let mut resolved = base.join(href).ok()?;
    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved)
}

pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_include_allows_everything_exclude_still_applies() {
        let include = build_matcher(&[]).unwrap();
        let exclude = build_matcher(&["*/admin/*".to_string()]).unwrap();
        assert!(passes_filters("https://example.com/blog/post", &include, &exclude));
        assert!(!passes_filters("https://example.com/admin/login", &include, &exclude));
    }

    #[test]
    fn include_restricts_to_matching_paths() {
        let include = build_matcher(&["*/docs/*".to_string()]).unwrap();
        let exclude = build_matcher(&[]).unwrap();
        assert!(passes_filters("https://example.com/docs/start", &include, &exclude));
        assert!(!passes_filters("https://example.com/blog/post", &include, &exclude));
    }

    #[test]
    fn normalize_link_strips_fragment_and_rejects_non_http() {
        let base = Url::parse("https://example.com/a/b").unwrap();
        let resolved = normalize_link(&base, "/c?x=1#section").unwrap();
        assert_eq!(resolved.as_str(), "https://example.com/c?x=1");
        assert!(normalize_link(&base, "mailto:someone@example.com").is_none());
    }

    #[test]
    fn same_origin_checks_scheme_host_and_port() {
        let a = Url::parse("https://example.com/a").unwrap();
        let b = Url::parse("https://example.com/b").unwrap();
        let c = Url::parse("https://other.com/a").unwrap();
        assert!(same_origin(&a, &b));
        assert!(!same_origin(&a, &c));
    }
}
