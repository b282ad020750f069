use logos::Logos;
use thiserror::Error;

use crate::cmd::chain::{CommandChain, SyntaxError};

use self::token::Token;

pub use self::token::LexerError;

pub mod expand;
pub mod token;

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("{0}")]
    Lexer(#[from] LexerError),
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
}

/// Splits a line into words.
///
/// Spaces and tabs separate words unless quoted. Quote characters are
/// removed, and quoted and unquoted runs that touch are joined into one word.
/// Operators are returned as ordinary words. If a quote is left open the whole
/// line is rejected.
pub fn tokenize(line: &str) -> Result<Vec<String>, LexerError> {
    let line = line.trim_end_matches(['\n', '\r']);

    let mut tokens = Vec::new();
    let mut word = String::new();

    for token in Token::lexer(line) {
        match token? {
            Token::Blank => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            Token::Bare(seg) | Token::DoubleQuoted(seg) | Token::SingleQuoted(seg) => {
                word.push_str(seg);
            }
            Token::OpenDoubleQuote | Token::OpenSingleQuote => {
                return Err(LexerError::UnclosedQuote);
            }
        }
    }

    if !word.is_empty() {
        tokens.push(word);
    }

    Ok(tokens)
}

/// Tokenizes, expands variables and builds the chain for one input line.
///
/// Words that expand to nothing are dropped. Returns `Ok(None)` when no
/// words are left.
pub fn parse_command(line: &str) -> Result<Option<CommandChain>, CommandParseError> {
    let tokens = tokenize(line)?
        .iter()
        .map(|t| expand::expand(t))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();

    trace!(?tokens, "expanded tokens");

    if tokens.is_empty() {
        return Ok(None);
    }

    Ok(Some(CommandChain::build(tokens)?))
}
