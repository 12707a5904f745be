//! Lexer: source text to a flat token stream.
//!
//! Built from small nom combinators, one per token family. The lexer never
//! fails: characters that start no known token become `Illegal` tokens and
//! the parser reports them. `#` starts a comment that runs to end of line.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::{consumed, value},
    multi::many0,
    sequence::preceded,
};

use crate::token::{Token, TokenKind, lookup_ident};

/// Consume whitespace and `#` line comments (both may repeat in any order).
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), preceded(char('#'), not_line_ending)),
        ))),
    )
    .parse(input)
}

/// Operators and delimiters. Two-character operators must come before their
/// one-character prefixes.
fn lex_symbol(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Eq, tag("==")),
        value(TokenKind::NotEq, tag("!=")),
        value(TokenKind::Assign, tag("=")),
        value(TokenKind::Plus, tag("+")),
        value(TokenKind::Minus, tag("-")),
        value(TokenKind::Bang, tag("!")),
        value(TokenKind::Asterisk, tag("*")),
        value(TokenKind::Slash, tag("/")),
        value(TokenKind::Lt, tag("<")),
        value(TokenKind::Gt, tag(">")),
        value(TokenKind::Comma, tag(",")),
        value(TokenKind::Semicolon, tag(";")),
        value(TokenKind::Colon, tag(":")),
        value(TokenKind::LParen, tag("(")),
        value(TokenKind::RParen, tag(")")),
        value(TokenKind::LBrace, tag("{")),
        value(TokenKind::RBrace, tag("}")),
        value(TokenKind::LBracket, tag("[")),
        value(TokenKind::RBracket, tag("]")),
    ))
    .parse(input)
}

fn lex_operator(input: &str) -> IResult<&str, Token> {
    let (rest, (text, kind)) = consumed(lex_symbol).parse(input)?;
    Ok((rest, Token::new(kind, text)))
}

fn lex_identifier(input: &str) -> IResult<&str, Token> {
    let (rest, word) =
        take_while1(|c: char| c.is_alphabetic() || c == '_').parse(input)?;
    Ok((rest, Token::new(lookup_ident(word), word)))
}

fn lex_number(input: &str) -> IResult<&str, Token> {
    let (rest, digits) = take_while1(|c: char| c.is_ascii_digit()).parse(input)?;
    Ok((rest, Token::new(TokenKind::Int, digits)))
}

/// Parse a double-quoted string literal with escape sequences. The token
/// literal holds the unescaped contents.
fn lex_string(input: &str) -> IResult<&str, Token> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut contents = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => {
                return Ok((chars.as_str(), Token::new(TokenKind::Str, contents)));
            }
            Some('\\') => {
                match chars.next() {
                    Some('n') => contents.push('\n'),
                    Some('t') => contents.push('\t'),
                    Some('r') => contents.push('\r'),
                    Some('\\') => contents.push('\\'),
                    Some('"') => contents.push('"'),
                    _ => {
                        // Unknown or dangling escape
                        return Err(nom::Err::Error(nom::error::Error::new(
                            remaining,
                            nom::error::ErrorKind::Char,
                        )));
                    }
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                contents.push(ch);
                remaining = chars.as_str();
            }
            None => {
                // Unterminated string
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

fn lex_token(input: &str) -> IResult<&str, Token> {
    alt((lex_string, lex_number, lex_identifier, lex_operator)).parse(input)
}

/// Tokenize the whole input. Always succeeds and always ends with an `Eof`
/// token; unknown characters are passed through as `Illegal` tokens.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut rest = input;

    loop {
        if let Ok((after, ())) = skip_trivia(rest) {
            rest = after;
        }
        if rest.is_empty() {
            break;
        }
        match lex_token(rest) {
            Ok((after, token)) => {
                tokens.push(token);
                rest = after;
            }
            Err(_) => {
                let mut chars = rest.chars();
                let Some(ch) = chars.next() else { break };
                tokens.push(Token::new(TokenKind::Illegal, ch.to_string()));
                rest = chars.as_str();
            }
        }
    }

    tokens.push(Token::eof());
    tokens
}
