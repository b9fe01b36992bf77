//! SQL lexer using nom.
//!
//! Splits canonical SQL into just enough token kinds for dialect rewriting:
//! literals and comments are kept opaque so nothing inside them is touched.

use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit0, digit1, multispace1, not_line_ending},
    combinator::{map, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    Whitespace(&'a str),
    Comment(&'a str),
    /// `'...'` including the quotes.
    StringLiteral(&'a str),
    /// `"..."` including the quotes.
    QuotedIdent(&'a str),
    /// `[...]`, inner text only.
    BracketIdent(&'a str),
    /// Canonical bind marker `?`.
    Placeholder,
    /// `#name`, name only.
    TempTable(&'a str),
    Word(&'a str),
    Number(&'a str),
    Symbol(char),
}

impl Token<'_> {
    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self, Token::Whitespace(_) | Token::Comment(_))
    }

    /// Case-insensitive keyword test.
    pub fn is_word(&self, keyword: &str) -> bool {
        matches!(self, Token::Word(w) if w.eq_ignore_ascii_case(keyword))
    }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Whitespace(s)
            | Token::Comment(s)
            | Token::StringLiteral(s)
            | Token::QuotedIdent(s)
            | Token::Word(s)
            | Token::Number(s) => f.write_str(s),
            Token::BracketIdent(s) => write!(f, "[{}]", s),
            Token::Placeholder => f.write_str("?"),
            Token::TempTable(s) => write!(f, "#{}", s),
            Token::Symbol(c) => write!(f, "{}", c),
        }
    }
}

/// Tokenize a complete statement.
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, String> {
    let mut tokens = Vec::new();
    let mut rest = input;

    while !rest.is_empty() {
        match parse_token(rest) {
            Ok((remaining, token)) => {
                if let Token::Symbol(quote @ ('\'' | '"')) = token {
                    return Err(format!(
                        "unterminated {} at offset {}",
                        if quote == '\'' { "string literal" } else { "quoted identifier" },
                        input.len() - rest.len()
                    ));
                }
                tokens.push(token);
                rest = remaining;
            }
            Err(e) => {
                return Err(format!(
                    "lexing failed at offset {}: {:?}",
                    input.len() - rest.len(),
                    e
                ));
            }
        }
    }

    Ok(tokens)
}

fn parse_token(input: &str) -> IResult<&str, Token<'_>> {
    alt((
        map(multispace1, Token::Whitespace),
        map(parse_comment, Token::Comment),
        map(parse_string_literal, Token::StringLiteral),
        map(parse_quoted_ident, Token::QuotedIdent),
        map(delimited(char('['), is_not("]"), char(']')), Token::BracketIdent),
        map(char('?'), |_| Token::Placeholder),
        map(preceded(char('#'), take_while1(is_ident_char)), Token::TempTable),
        map(parse_word, Token::Word),
        map(
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            Token::Number,
        ),
        map(anychar, Token::Symbol),
    ))(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// `-- ...` to end of line, or `/* ... */`.
fn parse_comment(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(tag("--"), not_line_ending)),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))(input)
}

/// `'...'` with `''` escapes.
fn parse_string_literal(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('\''),
        many0(alt((tag("''"), is_not("'")))),
        char('\''),
    )))(input)
}

/// `"..."` with `""` escapes.
fn parse_quoted_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('"'),
        many0(alt((tag("\"\""), is_not("\"")))),
        char('"'),
    )))(input)
}

fn parse_word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| is_ident_char(c) || c == '$'),
    ))(input)
}
