//! Message selector expressions.
//!
//! Grammar:
//! ```text
//! expr    := and ( OR and )*
//! and     := unary ( AND unary )*
//! unary   := NOT unary | primary
//! primary := '(' expr ')'
//!          | ident '=' literal
//!          | ident '<>' literal
//!          | ident IS [NOT] NULL
//! literal := 'quoted text' | number
//! ```
//! Keywords are case-insensitive. A comparison against a property the
//! message does not carry is false. Parentheses and `NOT` together may nest
//! at most [`MAX_DEPTH`] levels.

use std::collections::BTreeMap;

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while},
    character::complete::{char, digit1, multispace0, none_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{fold_many0, many0},
    sequence::{pair, preceded, terminated, tuple},
    Finish, IResult,
};
use thiserror::Error;

/// Deepest nesting of parentheses and `NOT` a filter may use.
pub const MAX_DEPTH: usize = 64;

const TOO_DEEP: &str = "nesting depth";
const RESERVED: [&str; 5] = ["AND", "OR", "NOT", "IS", "NULL"];

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter is empty")]
    Empty,

    #[error("syntax error at {position}, expected {expected}")]
    Syntax {
        position: usize,
        expected: &'static str,
    },

    #[error("filter nests deeper than {0} levels")]
    TooDeep(usize),
}

impl FilterError {
    fn from_nom(source: &str, e: VerboseError<&str>) -> Self {
        let mut expected = None;
        for (_, kind) in &e.errors {
            if let VerboseErrorKind::Context(c) = kind {
                if *c == TOO_DEEP {
                    return FilterError::TooDeep(MAX_DEPTH);
                }
                expected.get_or_insert(*c);
            }
        }
        let position = e
            .errors
            .first()
            .map(|(rest, _)| source.len() - rest.len())
            .unwrap_or(0);
        FilterError::Syntax {
            position,
            expected: expected.unwrap_or("end of filter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Equals(String, String),
    NotEquals(String, String),
    IsNull(String),
    IsNotNull(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, properties: &BTreeMap<String, String>) -> bool {
        match self {
            Expr::Equals(name, value) => properties.get(name) == Some(value),
            Expr::NotEquals(name, value) => properties.get(name).is_some_and(|v| v != value),
            Expr::IsNull(name) => !properties.contains_key(name),
            Expr::IsNotNull(name) => properties.contains_key(name),
            Expr::Not(inner) => !inner.eval(properties),
            Expr::And(l, r) => l.eval(properties) && r.eval(properties),
            Expr::Or(l, r) => l.eval(properties) || r.eval(properties),
        }
    }
}

/// A compiled selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    root: Expr,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        if source.trim().is_empty() {
            return Err(FilterError::Empty);
        }
        let (_, root) = all_consuming(terminated(|i| expr(i, 0), multispace0))(source)
            .finish()
            .map_err(|e| FilterError::from_nom(source, e))?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Parse an optional filter; a blank string means no filter.
    pub fn parse_optional(source: Option<&str>) -> Result<Option<Self>, FilterError> {
        match source.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Self::parse(s).map(Some),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, properties: &BTreeMap<String, String>) -> bool {
        self.root.eval(properties)
    }
}

// ============================================================================
// Expressions
// ============================================================================

fn expr(input: &str, depth: usize) -> Res<'_, Expr> {
    let (input, first) = and_expr(input, depth)?;
    let (input, rest) = many0(preceded(keyword("OR"), cut(|i| and_expr(i, depth))))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |l, r| Expr::Or(Box::new(l), Box::new(r)));
    Ok((input, folded))
}

fn and_expr(input: &str, depth: usize) -> Res<'_, Expr> {
    let (input, first) = unary(input, depth)?;
    let (input, rest) = many0(preceded(keyword("AND"), cut(|i| unary(i, depth))))(input)?;
    let folded = rest
        .into_iter()
        .fold(first, |l, r| Expr::And(Box::new(l), Box::new(r)));
    Ok((input, folded))
}

fn unary(input: &str, depth: usize) -> Res<'_, Expr> {
    alt((
        map(
            preceded(keyword("NOT"), cut(|i| nested(i, depth, unary))),
            |inner| Expr::Not(Box::new(inner)),
        ),
        |i| primary(i, depth),
    ))(input)
}

fn primary(input: &str, depth: usize) -> Res<'_, Expr> {
    let (input, _) = multispace0(input)?;
    alt((
        preceded(
            char('('),
            cut(terminated(
                |i| nested(i, depth, expr),
                context("')'", preceded(multispace0, char(')'))),
            )),
        ),
        comparison,
    ))(input)
}

/// Descend one level, refusing to go past [`MAX_DEPTH`].
fn nested<'a>(
    input: &'a str,
    depth: usize,
    inner: fn(&'a str, usize) -> Res<'a, Expr>,
) -> Res<'a, Expr> {
    if depth >= MAX_DEPTH {
        return Err(nom::Err::Failure(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context(TOO_DEEP))],
        }));
    }
    inner(input, depth + 1)
}

#[derive(Debug, Clone, Copy)]
enum Operator {
    Eq,
    Ne,
    IsNull,
    IsNotNull,
}

fn comparison(input: &str) -> Res<'_, Expr> {
    let (input, name) = context("identifier or '('", identifier)(input)?;
    let (input, op) = cut(context(
        "'=', '<>' or IS",
        preceded(
            multispace0,
            alt((
                value(Operator::Eq, char('=')),
                value(Operator::Ne, tag("<>")),
                value(
                    Operator::IsNotNull,
                    tuple((keyword("IS"), keyword("NOT"), keyword("NULL"))),
                ),
                value(Operator::IsNull, pair(keyword("IS"), keyword("NULL"))),
            )),
        ),
    ))(input)?;

    let name = name.to_string();
    match op {
        Operator::IsNull => Ok((input, Expr::IsNull(name))),
        Operator::IsNotNull => Ok((input, Expr::IsNotNull(name))),
        Operator::Eq => map(literal, move |v| Expr::Equals(name.clone(), v))(input),
        Operator::Ne => map(literal, move |v| Expr::NotEquals(name.clone(), v))(input),
    }
}

// ============================================================================
// Terminals
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

/// A case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(
        multispace0,
        terminated(tag_no_case(kw), not(satisfy(is_ident_char))),
    )
}

fn identifier(input: &str) -> Res<'_, &str> {
    verify(
        recognize(pair(
            satisfy(|c| c.is_alphabetic() || c == '_'),
            take_while(is_ident_char),
        )),
        |word: &str| !RESERVED.iter().any(|k| word.eq_ignore_ascii_case(k)),
    )(input)
}

fn literal(input: &str) -> Res<'_, String> {
    preceded(multispace0, cut(context("literal", alt((quoted, number)))))(input)
}

/// `'text'`, where `''` stands for one quote.
fn quoted(input: &str) -> Res<'_, String> {
    preceded(
        char('\''),
        cut(terminated(
            fold_many0(
                alt((value('\'', tag("''")), none_of("'"))),
                String::new,
                |mut text, c| {
                    text.push(c);
                    text
                },
            ),
            context("closing quote", char('\'')),
        )),
    )(input)
}

fn number(input: &str) -> Res<'_, String> {
    map(
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
        ))),
        str::to_string,
    )(input)
}
