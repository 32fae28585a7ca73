use std::fmt;

use crate::lexer::{LexError, LexErrorKind};

/// Byte offset into the template source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pos(pub usize);

impl Pos {
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Literal template text, or the interior of a string literal.
    Text,
    /// Identifier inside an expression.
    Name,
    /// Run of decimal digits.
    Number,
    /// Tag opening delimiter `{%`.
    TagOpen,
    /// Tag name directly after `{%`.
    TagName,
    /// Tag closing delimiter `%}`.
    TagClose,
    /// Print opening delimiter `{{`.
    PrintOpen,
    /// Print closing delimiter `}}`.
    PrintClose,
    ParensOpen,
    ParensClose,
    ArrayOpen,
    ArrayClose,
    HashOpen,
    HashClose,
    StringOpen,
    StringClose,
    /// One of `, ? : | .`.
    Punctuation,
    /// Arithmetic or comparison operator.
    Operator,
    /// Skipped whitespace, only produced when the syntax asks for it.
    Whitespace,
    /// Lexical error. Always the last token of a stream.
    Error(LexErrorKind),
    /// End of input. Always the last token of a stream.
    Eof,
}

impl TokenKind {
    /// Stable upper-case name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Name => "NAME",
            Self::Number => "NUMBER",
            Self::TagOpen => "TAG_OPEN",
            Self::TagName => "TAG_NAME",
            Self::TagClose => "TAG_CLOSE",
            Self::PrintOpen => "PRINT_OPEN",
            Self::PrintClose => "PRINT_CLOSE",
            Self::ParensOpen => "PARENS_OPEN",
            Self::ParensClose => "PARENS_CLOSE",
            Self::ArrayOpen => "ARRAY_OPEN",
            Self::ArrayClose => "ARRAY_CLOSE",
            Self::HashOpen => "HASH_OPEN",
            Self::HashClose => "HASH_CLOSE",
            Self::StringOpen => "STRING_OPEN",
            Self::StringClose => "STRING_CLOSE",
            Self::Punctuation => "PUNCTUATION",
            Self::Operator => "OPERATOR",
            Self::Whitespace => "WHITESPACE",
            Self::Error(_) => "ERROR",
            Self::Eof => "EOF",
        }
    }

    /// Whether a stream ends with this kind.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Error(_) | Self::Eof)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single token with its kind, raw lexeme, and source offset.
///
/// For [`TokenKind::Error`] the value holds the error message instead of
/// a lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub pos: Pos,
}

impl Token {
    #[must_use]
    pub fn new(kind: TokenKind, value: impl Into<String>, pos: Pos) -> Self {
        Self {
            kind,
            value: value.into(),
            pos,
        }
    }

    /// Whether this token has the given kind and exact value.
    #[must_use]
    pub fn is(&self, kind: TokenKind, value: &str) -> bool {
        self.kind == kind && self.value == value
    }

    /// The lexical error carried by an `Error` token.
    #[must_use]
    pub const fn lex_error(&self) -> Option<LexError> {
        match self.kind {
            TokenKind::Error(kind) => Some(LexError {
                kind,
                pos: self.pos,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} '{}' {}}}", self.kind, self.value, self.pos)
    }
}

/// Complete output of [`tokenize`](crate::tokenize).
///
/// Terminated by exactly one `Eof` or `Error` token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    /// Kinds of all tokens, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<TokenKind> {
        self.tokens.iter().map(|t| t.kind).collect()
    }

    /// The lexical error that halted the lexer, if any.
    #[must_use]
    pub fn error(&self) -> Option<LexError> {
        self.tokens.last().and_then(Token::lex_error)
    }

    /// Convert into a plain token list, failing on a lexical error.
    pub fn into_result(self) -> Result<Vec<Token>, LexError> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self.tokens),
        }
    }
}

impl FromIterator<Token> for TokenStream {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for TokenStream {
    type Item = Token;
    type IntoIter = std::vec::IntoIter<Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.into_iter()
    }
}

impl<'a> IntoIterator for &'a TokenStream {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}
