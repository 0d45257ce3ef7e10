//! Tokenization of recipe text using `nom`.
//!
//! Recipes are line-oriented: physical lines are first joined into logical
//! lines (`\` continuations, `#` comments and blank lines dropped), then
//! each logical line is split into a keyword, `--flag=value` options, and a
//! body that is either a JSON string array or free text.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::{alpha1, char, multispace0, multispace1},
    combinator::{all_consuming, map, opt},
    multi::{many0, many1, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};
use strata_common::error::{Result, StrataError};

/// A logical recipe line and the physical line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based physical line number of the first line.
    pub number: usize,
    /// Joined text without continuation markers.
    pub text: String,
}

/// Body of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// JSON array form: `["uv", "run", "main.py"]`.
    Json(Vec<String>),
    /// Free text (shell form, or arguments to split further).
    Text(String),
}

/// One tokenized instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawInstruction {
    /// 1-based line number.
    pub line: usize,
    /// Upper-cased instruction keyword.
    pub keyword: String,
    /// `--name=value` options in source order (`value` empty for bare flags).
    pub flags: Vec<(String, String)>,
    /// Instruction body.
    pub body: Body,
    /// The logical line as written.
    pub text: String,
}

/// Joins physical lines into logical lines.
#[must_use]
pub fn logical_lines(input: &str) -> Vec<LogicalLine> {
    let mut out = Vec::new();
    let mut current: Option<LogicalLine> = None;

    for (idx, raw) in input.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (content, continues) = match trimmed.strip_suffix('\\') {
            Some(head) => (head.trim_end(), true),
            None => (trimmed, false),
        };

        let line = current.get_or_insert_with(|| LogicalLine {
            number: idx + 1,
            text: String::new(),
        });
        if !line.text.is_empty() && !content.is_empty() {
            line.text.push(' ');
        }
        line.text.push_str(content);

        if !continues {
            out.extend(current.take());
        }
    }
    out.extend(current.filter(|l| !l.text.is_empty()));
    out
}

/// Parses a double-quoted string literal with basic escape support.
fn string_literal(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((idx, '"')) => return Ok((&input[idx + 1..], result)),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, '/')) => result.push('/'),
                Some((_, c)) => {
                    result.push('\\');
                    result.push(c);
                }
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Char,
                    )));
                }
            },
            Some((_, c)) => result.push(c),
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parses a single-quoted string literal (no escapes).
fn single_quoted(input: &str) -> IResult<&str, String> {
    map(
        delimited(char('\''), nom::bytes::complete::take_till(|c: char| c == '\''), char('\'')),
        str::to_string,
    )
    .parse(input)
}

/// Parses a JSON array of strings.
fn json_array(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        pair(char('['), multispace0),
        separated_list0(
            delimited(multispace0, char(','), multispace0),
            string_literal,
        ),
        pair(multispace0, char(']')),
    )
    .parse(input)
}

const fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Parses `--name=value` or `--name`.
fn flag(input: &str) -> IResult<&str, (String, String)> {
    let (input, name) = preceded(tag("--"), take_while1(is_flag_char)).parse(input)?;
    let (input, value) = opt(preceded(char('='), take_till1(|c: char| c.is_whitespace()))).parse(input)?;
    Ok((input, (name.to_string(), value.unwrap_or_default().to_string())))
}

/// Parses the keyword, options, and leaves the remainder as body text.
fn instruction_head(input: &str) -> IResult<&str, (&str, Vec<(String, String)>)> {
    let (input, keyword) = alpha1(input)?;
    let (input, flags) = many0(preceded(multispace1, flag)).parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (keyword, flags)))
}

/// Splits text into words, honouring double and single quotes.
///
/// # Errors
///
/// Returns an error if a quote is left unterminated.
pub fn split_words(text: &str) -> std::result::Result<Vec<String>, String> {
    let bare = map(
        take_till1(|c: char| c.is_whitespace() || c == '"' || c == '\''),
        str::to_string,
    );
    let word = many1(alt((string_literal, single_quoted, bare))).map(|parts| parts.concat());
    let words = terminated(many0(preceded(multispace0, word)), multispace0);
    match all_consuming(words).parse(text) {
        Ok((_, words)) => Ok(words),
        Err(e) => Err(format!("unterminated quote in \"{text}\" ({e})")),
    }
}

/// Tokenizes recipe source into one [`RawInstruction`] per logical line.
///
/// # Errors
///
/// Returns an error naming the line if an instruction does not start with
/// a keyword.
pub fn tokenize(input: &str) -> Result<Vec<RawInstruction>> {
    logical_lines(input)
        .into_iter()
        .map(|logical| {
            let (rest, (keyword, flags)) =
                instruction_head(&logical.text).map_err(|e| StrataError::Parse {
                    line: logical.number,
                    message: format!("expected instruction keyword ({e})"),
                })?;

            let rest = rest.trim();
            let body = match all_consuming(terminated(json_array, multispace0)).parse(rest) {
                Ok((_, items)) => Body::Json(items),
                Err(_) => Body::Text(rest.to_string()),
            };

            Ok(RawInstruction {
                line: logical.number,
                keyword: keyword.to_ascii_uppercase(),
                flags,
                body,
                text: logical.text.clone(),
            })
        })
        .collect()
}
