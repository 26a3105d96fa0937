//! Topic filter matching
//!
//! Standard publish/subscribe wildcard semantics: `+` matches exactly one
//! path segment, `#` matches all remaining segments when it is the final
//! pattern segment. Exact string equality short-circuits before the
//! segment walk.

/// Check whether `topic` matches the filter `pattern`
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == topic {
        return true;
    }

    // No wildcards means exact match only
    if !pattern.contains('+') && !pattern.contains('#') {
        return false;
    }

    let mut pattern_segments = pattern.split('/');
    let mut topic_segments = topic.split('/');

    loop {
        match (pattern_segments.next(), topic_segments.next()) {
            // `#` absorbs the remainder, but only as the final pattern segment
            (Some("#"), Some(_)) => return pattern_segments.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            // Segment counts disagree or a literal mismatch
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("smartalarm/commands", "smartalarm/commands"));
        assert!(!topic_matches("smartalarm/commands", "smartalarm/command"));
        assert!(!topic_matches("smartalarm/commands", "smartalarm/commands/x"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("smartalarm/+/temp", "smartalarm/gateway/temp"));
        assert!(!topic_matches("a/+", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/c"));
        assert!(topic_matches("+/+", "x/y"));
        assert!(!topic_matches("+", "x/y"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("smartalarm/#", "smartalarm/sensor/battery/outside"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("a/#", "a/b"));
        // `#` absorbs the remainder; with no remainder there is nothing to match
        assert!(!topic_matches("a/#", "a"));
        // `#` must be the final pattern segment
        assert!(!topic_matches("a/#/c", "a/b/c"));
    }

    #[test]
    fn test_wildcards_are_whole_segments_only() {
        assert!(!topic_matches("a/b+", "a/bc"));
        assert!(!topic_matches("a/b#", "a/b/c"));
    }

    #[test]
    fn test_mixed_wildcards() {
        assert!(topic_matches("+/sensor/#", "smartalarm/sensor/uvindex/outside"));
        assert!(!topic_matches("+/sensor/#", "smartalarm/gateway/uvindex"));
    }

    proptest! {
        #[test]
        fn prop_topic_always_matches_itself(topic in "[a-z0-9]{1,8}(/[a-z0-9]{1,8}){0,4}") {
            prop_assert!(topic_matches(&topic, &topic));
        }

        #[test]
        fn prop_plus_matches_any_single_segment(
            head in "[a-z]{1,6}",
            mid in "[a-z0-9]{1,8}",
            tail in "[a-z]{1,6}",
        ) {
            let pattern = format!("{head}/+/{tail}");
            let topic = format!("{head}/{mid}/{tail}");
            prop_assert!(topic_matches(&pattern, &topic));
        }

        #[test]
        fn prop_extra_segment_never_matches_without_hash(
            topic in "[a-z]{1,6}(/[a-z]{1,6}){0,3}",
            extra in "[a-z]{1,6}",
        ) {
            let longer = format!("{topic}/{extra}");
            prop_assert!(!topic_matches(&topic, &longer));
        }
    }
}
