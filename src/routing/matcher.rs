//! Longest-prefix path matching.
//!
//! Prefixes are literal path fragments bounded at segment boundaries:
//! `/api` matches `/api` and `/api/v1` but not `/api2`. Candidates arrive
//! pre-sorted by descending length (see the registry's `prefixes`), so the
//! first hit is the longest match.

/// Whether `prefix` matches `path` at a segment boundary.
///
/// A prefix ending in `/` (including the root prefix `/`) matches any path
/// that starts with it literally; otherwise the character after the prefix
/// must be `/` or the path must equal the prefix.
pub fn matches(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return !path.is_empty();
    }
    if path == prefix {
        return true;
    }
    if prefix.ends_with('/') {
        return path.starts_with(prefix);
    }
    path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/')
}

/// Find the first matching prefix and split off the residual path.
///
/// The residual keeps its leading `/` (restoring one when the prefix ate
/// it), so the upstream URL is always `target + residual`. An exact match
/// yields an empty residual.
pub fn split_path<I, S>(path: &str, prefixes: I) -> Option<(S, String)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for prefix in prefixes {
        if matches(path, prefix.as_ref()) {
            let residual = residual_after(path, prefix.as_ref());
            return Some((prefix, residual));
        }
    }
    None
}

fn residual_after(path: &str, prefix: &str) -> String {
    let rest = if prefix == "/" {
        path
    } else {
        &path[prefix.len()..]
    };
    if rest.is_empty() || rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{rest}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_path_matches() {
        assert!(matches("/api", "/api"));
    }

    #[test]
    fn nested_path_matches() {
        assert!(matches("/api/v1", "/api"));
    }

    #[test]
    fn segment_boundary_is_enforced() {
        assert!(!matches("/api2", "/api"));
        assert!(!matches("/apix/y", "/api"));
    }

    #[test]
    fn trailing_slash_prefix_matches_literally() {
        assert!(matches("/api/v1", "/api/"));
        assert!(!matches("/api", "/api/"));
    }

    #[test]
    fn root_prefix_matches_everything() {
        assert!(matches("/anything", "/"));
        assert!(matches("/", "/"));
        assert!(!matches("", "/"));
    }

    #[test]
    fn unrelated_paths_do_not_match() {
        assert!(!matches("/foo", "/bar"));
    }

    #[test]
    fn longest_prefix_wins() {
        // Registry order: longest first.
        let prefixes = ["/openai/v1", "/openai"];
        let (prefix, residual) = split_path("/openai/v1/chat", prefixes).unwrap();
        assert_eq!(prefix, "/openai/v1");
        assert_eq!(residual, "/chat");
    }

    #[test]
    fn residual_keeps_leading_slash() {
        let (_, residual) = split_path("/api/v1", ["/api"]).unwrap();
        assert_eq!(residual, "/v1");
    }

    #[test]
    fn residual_restored_after_trailing_slash_prefix() {
        let (_, residual) = split_path("/api/v1", ["/api/"]).unwrap();
        assert_eq!(residual, "/v1");
    }

    #[test]
    fn residual_of_exact_match_is_empty() {
        let (_, residual) = split_path("/api", ["/api"]).unwrap();
        assert_eq!(residual, "");
    }

    #[test]
    fn root_prefix_residual_is_whole_path() {
        let (_, residual) = split_path("/foo/bar", ["/"]).unwrap();
        assert_eq!(residual, "/foo/bar");
    }

    #[test]
    fn no_candidates_no_match() {
        assert!(split_path("/foo", Vec::<String>::new()).is_none());
    }
}
