//! Total ordering of patterns by specificity.
//!
//! Patterns are compared segment by segment. At each depth a literal beats
//! `*`, `*` beats the end of a pattern, and the end of a pattern beats `#`.
//! For address `a.b.c` this yields `a.b.c` > `a.b.*` > `a.*.c` > `a.#` > `#`.

use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum SegmentRank {
    AnyWords = 0,
    End = 1,
    SingleWord = 2,
    Literal = 3,
}

/// Sort key of an [`AddressPattern`](crate::wildcard::AddressPattern).
///
/// Greater means more specific. Two distinct patterns never compare equal:
/// the pattern text breaks ties so the order is reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Specificity {
    ranks: Vec<SegmentRank>,
    pattern: String,
}

impl Specificity {
    pub(crate) fn new(ranks: Vec<SegmentRank>, pattern: String) -> Self {
        Self { ranks, pattern }
    }

    /// Number of literal segments before the first wildcard.
    pub fn literal_prefix(&self) -> usize {
        self.ranks
            .iter()
            .take_while(|r| **r == SegmentRank::Literal)
            .count()
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ranks
            .cmp(&other.ranks)
            .then_with(|| other.pattern.cmp(&self.pattern))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use crate::wildcard::AddressPattern;

    fn ranked(patterns: &[&str]) -> Vec<String> {
        let mut parsed: Vec<AddressPattern> = patterns
            .iter()
            .map(|p| AddressPattern::new(p).unwrap())
            .collect();
        parsed.sort_by_key(|p| std::cmp::Reverse(p.specificity()));
        parsed.into_iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_reference_order() {
        let order = ranked(&["#", "a.#", "a.*.c", "a.b.c", "a.b.*"]);
        assert_eq!(order, vec!["a.b.c", "a.b.*", "a.*.c", "a.#", "#"]);
    }

    #[test]
    fn test_exact_length_beats_trailing_any_words() {
        assert_eq!(ranked(&["a.*.#", "a.*"]), vec!["a.*", "a.*.#"]);
        assert_eq!(ranked(&["a.b.#", "a.b"]), vec!["a.b", "a.b.#"]);
    }

    #[test]
    fn test_longer_literal_prefix_wins() {
        assert_eq!(
            ranked(&["a.#", "a.b.c.#", "a.b.#"]),
            vec!["a.b.c.#", "a.b.#", "a.#"]
        );
        let p = AddressPattern::new("a.b.*.d").unwrap();
        assert_eq!(p.specificity().literal_prefix(), 2);
    }

    #[test]
    fn test_order_is_total_and_stable() {
        let first = ranked(&["x.*", "y.*", "#", "x.y"]);
        let second = ranked(&["x.y", "#", "y.*", "x.*"]);
        assert_eq!(first, second);
    }
}
