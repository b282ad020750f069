use logos::{Lexer, Logos};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Default, Error)]
pub enum LexerError {
    #[default]
    #[error("unrecognised input")]
    Unrecognised,
    #[error("unclosed quote")]
    UnclosedQuote,
}

/// Raw lexemes of a command line. Quoted runs and bare runs that touch each
/// other are glued into a single word by [`super::tokenize`].
#[derive(Debug, PartialEq, Eq, Logos)]
#[logos(error = LexerError)]
pub enum Token<'a> {
    #[regex(r"[ \t]+")]
    Blank,
    #[regex(r#"[^ \t"']+"#)]
    Bare(&'a str),
    #[regex(r#""[^"]*""#, strip_quotes)]
    DoubleQuoted(&'a str),
    #[regex(r"'[^']*'", strip_quotes)]
    SingleQuoted(&'a str),
    #[regex(r#""[^"]*"#)]
    OpenDoubleQuote,
    #[regex(r"'[^']*")]
    OpenSingleQuote,
}

fn strip_quotes<'a>(lex: &mut Lexer<'a, Token<'a>>) -> &'a str {
    let slice = lex.slice();
    // both delimiters are single-byte ascii
    &slice[1..slice.len() - 1]
}
