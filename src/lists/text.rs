use super::{ListEntry, SubscriptionList};
use crate::util::normalize_url;

/// Parses a newline-delimited URL list.
///
/// Blank lines, `#` comments and lines that do not normalize to a usable
/// URL are skipped without error.
pub fn parse_text(content: &str) -> SubscriptionList {
    let entries = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let url = normalize_url(line);
            if url.is_empty() {
                tracing::debug!(line = %line, "Skipping unusable line in text list");
                None
            } else {
                Some(ListEntry::new(url))
            }
        });
    SubscriptionList::from_entries(entries)
}

/// Renders one URL per line in the order given.
pub fn encode_text(entries: &[ListEntry]) -> String {
    entries
        .iter()
        .map(|e| e.url.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn urls(list: &SubscriptionList) -> Vec<String> {
        list.entries().iter().map(|e| e.url.clone()).collect()
    }

    #[test]
    fn test_parse_lines() {
        let list = parse_text("http://a.com/rss\r\nhttps://B.com/feed/\n");
        assert_eq!(urls(&list), vec!["http://a.com/rss", "https://b.com/feed"]);
    }

    #[test]
    fn test_blank_and_comment_lines_dropped() {
        let list = parse_text("\n   \n# my list\nhttp://a.com/rss\n\n");
        assert_eq!(urls(&list), vec!["http://a.com/rss"]);
    }

    #[test]
    fn test_unusable_lines_dropped_silently() {
        let list = parse_text("ftp://a.com/rss\nhttp://\nhttp://ok.com/rss");
        assert_eq!(urls(&list), vec!["http://ok.com/rss"]);
    }

    #[test]
    fn test_duplicates_coalesced() {
        let list = parse_text("http://a.com/rss\nhttp://A.com/rss/\n");
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_encode_one_per_line() {
        let entries = vec![
            ListEntry::new("http://a.com/rss"),
            ListEntry::new("http://b.com/rss"),
        ];
        assert_eq!(encode_text(&entries), "http://a.com/rss\nhttp://b.com/rss");
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode_text(&[]), "");
        assert!(parse_text("").is_empty());
    }

    proptest! {
        #[test]
        fn prop_text_round_trip(
            hosts in proptest::collection::btree_set("[a-z]{1,8}\\.(com|org)", 0..12),
        ) {
            let mut normalized: Vec<String> = hosts
                .iter()
                .map(|h| normalize_url(&format!("HTTP://{h}/rss/")))
                .collect();
            normalized.sort();
            let entries: Vec<ListEntry> =
                normalized.iter().cloned().map(ListEntry::new).collect();

            let parsed = parse_text(&encode_text(&entries));
            prop_assert_eq!(urls(&parsed), normalized);
        }
    }
}
