use url::Url;

/// Query parameters added by campaign trackers. They never select a
/// different feed, so they are dropped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
];

/// Podcast-specific URL schemes that are aliases for plain HTTP.
const HTTP_ALIASES: &[&str] = &["feed", "itpc", "pcast", "podcast"];

/// Canonicalizes a podcast feed URL.
///
/// Normalization is total and idempotent: any input yields either a
/// canonical `http`/`https` URL or the empty string, and normalizing a
/// normalized URL returns it unchanged.
///
/// Steps:
/// - Trims surrounding whitespace
/// - Adds `http://` when no scheme is present (`example.com/feed`)
/// - Maps podcast schemes (`feed://`, `itpc://`, `pcast://`) to `http://`
/// - Lowercases scheme and host, drops default ports (handled by [`Url`])
/// - Drops the fragment and well-known tracking query parameters
/// - Removes trailing slashes from non-root paths
///
/// Returns an empty string for blank input, non-HTTP schemes, or anything
/// [`Url`] cannot parse. Callers must reject the empty string before using
/// it as a podcast key.
///
/// # Examples
///
/// ```
/// use podsync::util::normalize_url;
///
/// assert_eq!(
///     normalize_url(" HTTP://Example.COM:80/feed/ "),
///     "http://example.com/feed"
/// );
/// assert_eq!(normalize_url("file:///etc/passwd"), "");
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Some(mut url) = parse_with_scheme_fallback(trimmed) else {
        return String::new();
    };

    if HTTP_ALIASES.contains(&url.scheme()) {
        // set_scheme refuses to switch between special and non-special
        // schemes, so re-parse with the alias prefix replaced.
        let rest = &trimmed[trimmed.find(':').map_or(0, |i| i + 1)..];
        let rest = rest.trim_start_matches('/');
        let target = if rest.starts_with("http://") || rest.starts_with("https://") {
            rest.to_owned()
        } else {
            format!("http://{rest}")
        };
        match Url::parse(&target) {
            Ok(u) => url = u,
            Err(_) => return String::new(),
        }
    }

    match url.scheme() {
        "http" | "https" => {}
        _ => return String::new(),
    }

    if url.host_str().map_or(true, str::is_empty) {
        return String::new();
    }

    url.set_fragment(None);
    strip_tracking_params(&mut url);

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed_path = path.trim_end_matches('/').to_owned();
        let trimmed_path = if trimmed_path.is_empty() {
            "/".to_owned()
        } else {
            trimmed_path
        };
        url.set_path(&trimmed_path);
    }

    url.to_string()
}

fn parse_with_scheme_fallback(input: &str) -> Option<Url> {
    match Url::parse(input) {
        Ok(url) if is_bare_host(url.scheme(), input) => Url::parse(&format!("http://{input}")).ok(),
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("http://{input}")).ok()
        }
        Err(_) => None,
    }
}

/// `example.com/rss` has no scheme, but `example.com:8080/rss` and
/// `localhost:8080/rss` parse with the host in the scheme position.
fn is_bare_host(scheme: &str, input: &str) -> bool {
    if matches!(scheme, "http" | "https") || HTTP_ALIASES.contains(&scheme) {
        return false;
    }
    if scheme.contains('.') {
        return true;
    }
    input
        .get(scheme.len() + 1..)
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

/// Rewrites the query only when a tracking parameter is present, so that
/// untouched queries keep their original encoding.
fn strip_tracking_params(url: &mut Url) {
    let has_tracking = url
        .query_pairs()
        .any(|(k, _)| TRACKING_PARAMS.contains(&k.as_ref()));
    if !has_tracking {
        if url.query() == Some("") {
            url.set_query(None);
        }
        return;
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_plain_url_unchanged() {
        assert_eq!(
            normalize_url("https://example.com/feed.xml"),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_scheme_and_host_lowercased() {
        assert_eq!(
            normalize_url("HTTPS://Example.COM/Feed.xml"),
            "https://example.com/Feed.xml"
        );
    }

    #[test]
    fn test_default_port_dropped() {
        assert_eq!(
            normalize_url("http://example.com:80/rss"),
            "http://example.com/rss"
        );
        assert_eq!(
            normalize_url("https://example.com:443/rss"),
            "https://example.com/rss"
        );
        assert_eq!(
            normalize_url("http://example.com:8080/rss"),
            "http://example.com:8080/rss"
        );
    }

    #[test]
    fn test_trailing_slash_equivalence() {
        assert_eq!(
            normalize_url("http://example.com/podcast/"),
            normalize_url("http://example.com/podcast")
        );
        assert_eq!(normalize_url("http://example.com"), "http://example.com/");
        assert_eq!(normalize_url("http://example.com/"), "http://example.com/");
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(
            normalize_url("  \thttp://example.com/rss\n"),
            "http://example.com/rss"
        );
    }

    #[test]
    fn test_missing_scheme_gets_http() {
        assert_eq!(normalize_url("example.com/feed"), "http://example.com/feed");
    }

    #[test]
    fn test_missing_scheme_with_port() {
        assert_eq!(
            normalize_url("localhost:8080/feed"),
            "http://localhost:8080/feed"
        );
        assert_eq!(
            normalize_url("Example.com:8080/rss/"),
            "http://example.com:8080/rss"
        );
        assert_eq!(normalize_url("example.com:80/rss"), "http://example.com/rss");
        assert_eq!(normalize_url("mailto:someone@example.com"), "");
    }

    #[test]
    fn test_podcast_schemes_mapped() {
        assert_eq!(
            normalize_url("feed://example.com/rss"),
            "http://example.com/rss"
        );
        assert_eq!(
            normalize_url("itpc://example.com/rss"),
            "http://example.com/rss"
        );
    }

    #[test]
    fn test_fragment_and_tracking_dropped() {
        assert_eq!(
            normalize_url("http://example.com/rss?utm_source=x&id=5#top"),
            "http://example.com/rss?id=5"
        );
        assert_eq!(
            normalize_url("http://example.com/rss?utm_medium=email"),
            "http://example.com/rss"
        );
    }

    #[test]
    fn test_other_query_kept_verbatim() {
        assert_eq!(
            normalize_url("http://example.com/feed.php?cat=3&fmt=mp3"),
            "http://example.com/feed.php?cat=3&fmt=mp3"
        );
    }

    #[test]
    fn test_rejects_unusable_input() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("   "), "");
        assert_eq!(normalize_url("file:///etc/passwd"), "");
        assert_eq!(normalize_url("mailto:someone@example.com"), "");
        assert_eq!(normalize_url("http://"), "");
        assert_eq!(normalize_url("# a comment"), "");
    }

    #[test]
    fn test_idempotent_on_examples() {
        for raw in [
            "HTTP://Example.com:80/a/b/",
            "feed://example.com/rss?utm_source=x",
            "example.org",
            "https://example.com/p?q=a%20b",
        ] {
            let once = normalize_url(raw);
            assert_eq!(normalize_url(&once), once, "not idempotent for {raw}");
        }
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent(
            host in "[a-zA-Z][a-zA-Z0-9]{0,10}\\.(com|org|net)",
            path in "(/[a-zA-Z0-9_.-]{1,8}){0,3}/?",
            https in any::<bool>(),
        ) {
            let scheme = if https { "HTTPS" } else { "http" };
            let raw = format!("{scheme}://{host}{path}");
            let once = normalize_url(&raw);
            prop_assert!(!once.is_empty());
            prop_assert_eq!(normalize_url(&once), once);
        }
    }
}
