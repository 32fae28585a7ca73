//! Delimiter configuration for the lexer.

/// Classifies an invalid [`Syntax`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxError {
    /// A delimiter is the empty string.
    #[error("empty {0} delimiter")]
    EmptyDelimiter(&'static str),
    /// Tag and print openers cannot be told apart.
    #[error("tag and print delimiters must differ, both open with '{0}'")]
    AmbiguousOpen(String),
}

/// Structural delimiters and whitespace handling used by the lexer.
///
/// `Syntax::default()` is the Twig syntax: `{% … %}` for tags and
/// `{{ … }}` for prints. `{# … #}` is reserved for comments and never
/// lexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    tag_open: String,
    tag_close: String,
    print_open: String,
    print_close: String,
    emit_whitespace: bool,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            tag_open: "{%".to_string(),
            tag_close: "%}".to_string(),
            print_open: "{{".to_string(),
            print_close: "}}".to_string(),
            emit_whitespace: false,
        }
    }
}

impl Syntax {
    /// Build a syntax from `(open, close)` pairs for tags and prints.
    pub fn new(tag: (&str, &str), print: (&str, &str)) -> Result<Self, SyntaxError> {
        for (what, delim) in [
            ("tag open", tag.0),
            ("tag close", tag.1),
            ("print open", print.0),
            ("print close", print.1),
        ] {
            if delim.is_empty() {
                return Err(SyntaxError::EmptyDelimiter(what));
            }
        }
        if tag.0 == print.0 {
            return Err(SyntaxError::AmbiguousOpen(tag.0.to_string()));
        }
        Ok(Self {
            tag_open: tag.0.to_string(),
            tag_close: tag.1.to_string(),
            print_open: print.0.to_string(),
            print_close: print.1.to_string(),
            emit_whitespace: false,
        })
    }

    /// Emit skipped whitespace as [`TokenKind::Whitespace`](crate::TokenKind::Whitespace)
    /// tokens instead of dropping it.
    #[must_use]
    pub const fn with_whitespace_tokens(mut self, emit: bool) -> Self {
        self.emit_whitespace = emit;
        self
    }

    #[must_use]
    pub fn tag_open(&self) -> &str {
        &self.tag_open
    }

    #[must_use]
    pub fn tag_close(&self) -> &str {
        &self.tag_close
    }

    #[must_use]
    pub fn print_open(&self) -> &str {
        &self.print_open
    }

    #[must_use]
    pub fn print_close(&self) -> &str {
        &self.print_close
    }

    #[must_use]
    pub const fn emits_whitespace(&self) -> bool {
        self.emit_whitespace
    }
}
