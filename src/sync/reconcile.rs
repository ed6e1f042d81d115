use std::collections::BTreeSet;

/// Actions needed to move a device's current subscription set to a declared
/// one. Both sets iterate in URL order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionDiff {
    pub to_subscribe: BTreeSet<String>,
    pub to_unsubscribe: BTreeSet<String>,
}

impl SubscriptionDiff {
    pub fn is_empty(&self) -> bool {
        self.to_subscribe.is_empty() && self.to_unsubscribe.is_empty()
    }
}

/// `declared − current` to subscribe, `current − declared` to unsubscribe.
///
/// Empty URLs (failed normalization) are never part of either side, so they
/// cannot cause an unsubscribe.
pub fn reconcile(declared: &BTreeSet<String>, current: &BTreeSet<String>) -> SubscriptionDiff {
    let to_subscribe = declared
        .difference(current)
        .filter(|url| !url.is_empty())
        .cloned()
        .collect();
    let to_unsubscribe = current
        .difference(declared)
        .filter(|url| !url.is_empty())
        .cloned()
        .collect();

    SubscriptionDiff {
        to_subscribe,
        to_unsubscribe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn set(urls: &[&str]) -> BTreeSet<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn test_overlapping_sets() {
        let diff = reconcile(&set(&["http://a/", "http://b/"]), &set(&["http://b/", "http://c/"]));
        assert_eq!(diff.to_subscribe, set(&["http://a/"]));
        assert_eq!(diff.to_unsubscribe, set(&["http://c/"]));
    }

    #[test]
    fn test_one_sided() {
        let urls = set(&["http://a/", "http://b/"]);
        let empty = BTreeSet::new();

        let diff = reconcile(&urls, &empty);
        assert_eq!(diff.to_subscribe, urls);
        assert!(diff.to_unsubscribe.is_empty());

        let diff = reconcile(&empty, &urls);
        assert!(diff.to_subscribe.is_empty());
        assert_eq!(diff.to_unsubscribe, urls);

        assert!(reconcile(&empty, &empty).is_empty());
    }

    #[test]
    fn test_empty_url_never_diffed() {
        let diff = reconcile(&set(&["", "http://a/"]), &set(&["http://a/"]));
        assert!(diff.is_empty());
    }

    #[test]
    fn test_deterministic_order() {
        let diff = reconcile(&set(&["http://z/", "http://a/", "http://m/"]), &BTreeSet::new());
        let ordered: Vec<&str> = diff.to_subscribe.iter().map(String::as_str).collect();
        assert_eq!(ordered, vec!["http://a/", "http://m/", "http://z/"]);
    }

    fn url_set() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set("http://[a-e]\\.com/[a-c]", 0..8)
    }

    proptest! {
        #[test]
        fn diff_is_set_difference(declared in url_set(), current in url_set()) {
            let diff = reconcile(&declared, &current);

            prop_assert!(diff.to_subscribe.is_disjoint(&current));
            prop_assert!(diff.to_unsubscribe.is_subset(&current));
            prop_assert_eq!(
                &diff.to_subscribe,
                &declared.difference(&current).cloned().collect::<BTreeSet<_>>()
            );
            prop_assert_eq!(
                &diff.to_unsubscribe,
                &current.difference(&declared).cloned().collect::<BTreeSet<_>>()
            );
        }

        #[test]
        fn applying_diff_reaches_fixpoint(declared in url_set(), current in url_set()) {
            let diff = reconcile(&declared, &current);

            let mut next = current.clone();
            next.extend(diff.to_subscribe.iter().cloned());
            for url in &diff.to_unsubscribe {
                next.remove(url);
            }

            prop_assert_eq!(&next, &declared);
            prop_assert!(reconcile(&declared, &next).is_empty());
        }
    }
}
