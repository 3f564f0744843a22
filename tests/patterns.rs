#[macro_use]
extern crate proptest;

use proptest::prelude::{Strategy, prop};
use steploom::pattern::TopicPattern;

/// Generate dot-separated topic names.
///
/// Constraints:
/// - 1..=4 segments of lowercase letters
/// - No wildcard characters, so parsing always yields `Exact`
fn topic_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,6}(\\.[a-z]{1,6}){0,3}").unwrap()
}

proptest! {
    #[test]
    fn prop_any_matches_every_topic(topic in topic_strategy()) {
        let pattern = TopicPattern::parse("*").unwrap();
        prop_assert!(pattern.matches(&topic));
    }

    #[test]
    fn prop_exact_matches_only_itself(topic in topic_strategy(), other in topic_strategy()) {
        let pattern = TopicPattern::parse(&topic).unwrap();
        prop_assert!(pattern.matches(&topic));
        prop_assert_eq!(pattern.matches(&other), topic == other);
    }

    // The prefix form is defined as a raw string comparison; the pattern
    // minus the `*` must literally lead the topic.
    #[test]
    fn prop_prefix_agrees_with_starts_with(base in topic_strategy(), candidate in topic_strategy()) {
        let pattern = TopicPattern::parse(&format!("{base}.*")).unwrap();
        let expected = candidate.starts_with(&format!("{base}."));
        prop_assert_eq!(pattern.matches(&candidate), expected);
    }

    #[test]
    fn prop_prefix_matches_own_extensions(base in topic_strategy(), tail in topic_strategy()) {
        let pattern = TopicPattern::parse(&format!("{base}.*")).unwrap();
        let extended = format!("{base}.{tail}");
        prop_assert!(pattern.matches(&extended));
        // The bare base has no trailing dot, so it is not covered.
        prop_assert!(!pattern.matches(&base));
    }

    #[test]
    fn prop_display_round_trips(base in topic_strategy()) {
        for raw in [base.clone(), format!("{base}.*"), "*".to_owned()] {
            let pattern = TopicPattern::parse(&raw).unwrap();
            prop_assert_eq!(pattern.to_string(), raw.clone());
            let reparsed = TopicPattern::parse(&pattern.to_string()).unwrap();
            prop_assert_eq!(reparsed, pattern);
        }
    }
}

#[test]
fn wildcard_classification() {
    assert!(TopicPattern::parse("*").unwrap().is_wildcard());
    assert!(TopicPattern::parse("order.*").unwrap().is_wildcard());
    assert!(!TopicPattern::parse("order.created").unwrap().is_wildcard());
}

#[test]
fn star_outside_suffix_position_is_literal() {
    let pattern = TopicPattern::parse("or*der").unwrap();
    assert_eq!(pattern, TopicPattern::Exact("or*der".to_owned()));
    assert!(pattern.matches("or*der"));
    assert!(!pattern.matches("order"));

    // "*.x" is not a recognized wildcard form either.
    let pattern = TopicPattern::parse("*.created").unwrap();
    assert!(pattern.matches("*.created"));
    assert!(!pattern.matches("order.created"));
}

#[test]
fn empty_pattern_is_rejected() {
    assert!(TopicPattern::parse("").is_err());
}
