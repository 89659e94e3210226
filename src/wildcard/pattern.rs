//! Pattern parsing and matching.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::wildcard::specificity::{SegmentRank, Specificity};

/// Characters used to split addresses and to spell the two wildcards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WildcardSyntax {
    /// Segment separator.
    pub delimiter: char,

    /// Matches exactly one segment.
    pub single_word: char,

    /// Matches any number of trailing segments, including none.
    pub any_words: char,
}

impl Default for WildcardSyntax {
    fn default() -> Self {
        Self {
            delimiter: '.',
            single_word: '*',
            any_words: '#',
        }
    }
}

/// A pattern that could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatcherError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("pattern '{pattern}': '{wildcard}' is only allowed as the final segment")]
    MisplacedAnyWords { pattern: String, wildcard: char },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    SingleWord,
    AnyWords,
}

/// A validated, dot-segmented address template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddressPattern {
    raw: String,
    segments: Vec<Segment>,
    delimiter: char,
}

impl AddressPattern {
    /// Parse `raw` using the given wildcard characters.
    pub fn parse(raw: &str, syntax: &WildcardSyntax) -> Result<Self, MatcherError> {
        if raw.is_empty() {
            return Err(MatcherError::Empty);
        }

        let parts: Vec<&str> = raw.split(syntax.delimiter).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = if part.is_empty() {
                return Err(MatcherError::EmptySegment(raw.to_string()));
            } else if is_wildcard(part, syntax.any_words) {
                if index != last {
                    return Err(MatcherError::MisplacedAnyWords {
                        pattern: raw.to_string(),
                        wildcard: syntax.any_words,
                    });
                }
                Segment::AnyWords
            } else if is_wildcard(part, syntax.single_word) {
                Segment::SingleWord
            } else {
                Segment::Literal((*part).to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            delimiter: syntax.delimiter,
        })
    }

    /// Parse with the default `.`, `*`, `#` syntax.
    pub fn new(raw: &str) -> Result<Self, MatcherError> {
        Self::parse(raw, &WildcardSyntax::default())
    }

    /// The pattern exactly as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern contains no wildcard segment.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Returns true if `address` is covered by this pattern.
    pub fn matches(&self, address: &str) -> bool {
        let words: Vec<&str> = address.split(self.delimiter).collect();
        match_segments(&self.segments, &words)
    }

    /// Rank used to order several patterns matching the same address.
    pub fn specificity(&self) -> Specificity {
        let mut ranks: Vec<SegmentRank> = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(_) => SegmentRank::Literal,
                Segment::SingleWord => SegmentRank::SingleWord,
                Segment::AnyWords => SegmentRank::AnyWords,
            })
            .collect();
        if !matches!(self.segments.last(), Some(Segment::AnyWords)) {
            ranks.push(SegmentRank::End);
        }
        Specificity::new(ranks, self.raw.clone())
    }
}

impl fmt::Display for AddressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_wildcard(part: &str, wildcard: char) -> bool {
    let mut chars = part.chars();
    chars.next() == Some(wildcard) && chars.next().is_none()
}

fn match_segments(segments: &[Segment], words: &[&str]) -> bool {
    match segments.split_first() {
        None => words.is_empty(),
        // Parsing guarantees this is the final segment.
        Some((Segment::AnyWords, _)) => true,
        Some((Segment::SingleWord, rest)) => match words.split_first() {
            Some((_, tail)) => match_segments(rest, tail),
            None => false,
        },
        Some((Segment::Literal(literal), rest)) => match words.split_first() {
            Some((word, tail)) if *word == literal.as_str() => match_segments(rest, tail),
            _ => false,
        },
    }
}
