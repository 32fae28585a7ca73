use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::iter::FusedIterator;
use std::sync::mpsc;
use std::thread;

use tracing::{debug, trace};

use crate::syntax::Syntax;
use crate::token::{Pos, Token, TokenKind, TokenStream};

/// Classifies a lexer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexErrorKind {
    /// String literal without a closing quote.
    UnterminatedString,
    /// Close delimiter reached with brackets still open.
    UnclosedBracket,
    /// Character that cannot start any expression token.
    UnexpectedCharacter(char),
    /// Input ended inside a tag or print statement.
    UnexpectedEof,
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedString => write!(f, "unterminated string"),
            Self::UnclosedBracket => write!(f, "unclosed parenthesis"),
            Self::UnexpectedCharacter(ch) => {
                write!(f, "unexpected character: {ch}")
            }
            Self::UnexpectedEof => write!(f, "unexpected end of template"),
        }
    }
}

/// Error produced during lexing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {pos}")]
pub struct LexError {
    pub kind: LexErrorKind,
    pub pos: Pos,
}

/// Tokenize a template with the default syntax.
///
/// Lexical errors do not abort the call: they end the stream with a
/// single [`TokenKind::Error`] token, see [`TokenStream::error`].
#[must_use]
pub fn tokenize(source: &str) -> TokenStream {
    Lexer::new(source).collect()
}

/// Tokenize a template with a custom syntax.
#[must_use]
pub fn tokenize_with(source: &str, syntax: &Syntax) -> TokenStream {
    Lexer::with_syntax(source, syntax).collect()
}

const CHANNEL_CAPACITY: usize = 64;

/// Run the lexer on its own thread and receive tokens through a bounded
/// channel.
///
/// The producer stops once the terminal token is sent or the receiver is
/// dropped.
#[must_use]
pub fn spawn(source: String, syntax: Syntax) -> mpsc::IntoIter<Token> {
    let (tx, rx) = mpsc::sync_channel(CHANNEL_CAPACITY);
    thread::spawn(move || {
        for token in Lexer::with_syntax(&source, &syntax) {
            if tx.send(token).is_err() {
                break;
            }
        }
    });
    rx.into_iter()
}

const OPERATOR_CHARS: &str = "+-*/%~=<>!";
const TWO_CHAR_OPERATORS: [&str; 7] = ["==", "!=", "<=", ">=", "**", "//", ".."];
const PUNCTUATION_CHARS: &str = ",?:|.";

/// States of the scanning machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Data,
    TagOpen,
    TagName,
    TagClose,
    PrintOpen,
    PrintClose,
    Expression,
    Operator,
    Punctuation,
    OpenBracket,
    CloseBracket,
    Number,
    Name,
    String,
}

/// Finite-state template scanner.
///
/// Iterating a `Lexer` runs the machine lazily, one state at a time, and
/// yields tokens in emission order. The last token is always `Eof` or
/// `Error`.
#[derive(Debug)]
pub struct Lexer<'a> {
    source: &'a str,
    syntax: Cow<'a, Syntax>,
    /// Start of the pending lexeme.
    pos: usize,
    /// Scan head.
    cursor: usize,
    /// Brackets opened and not yet closed in the current statement.
    nesting: usize,
    /// Whether the open statement is a print rather than a tag.
    in_print: bool,
    state: Option<State>,
    pending: VecDeque<Token>,
}

impl<'a> Lexer<'a> {
    #[must_use]
    pub fn new(source: &'a str) -> Self {
        Self::from_parts(source, Cow::Owned(Syntax::default()))
    }

    #[must_use]
    pub fn with_syntax(source: &'a str, syntax: &'a Syntax) -> Self {
        Self::from_parts(source, Cow::Borrowed(syntax))
    }

    const fn from_parts(source: &'a str, syntax: Cow<'a, Syntax>) -> Self {
        Self {
            source,
            syntax,
            pos: 0,
            cursor: 0,
            nesting: 0,
            in_print: false,
            state: Some(State::Data),
            pending: VecDeque::new(),
        }
    }

    /// The state the next [`step`](Self::step) will run, or `None` once
    /// the machine has halted.
    #[must_use]
    pub const fn state(&self) -> Option<State> {
        self.state
    }

    /// Run the current state once and return the state that follows.
    pub fn step(&mut self) -> Option<State> {
        let state = self.state?;
        let next = self.run(state);
        if next.is_none() {
            trace!(?state, pos = self.pos, "lexer halted");
        }
        self.state = next;
        next
    }

    fn run(&mut self, state: State) -> Option<State> {
        match state {
            State::Data => self.lex_data(),
            State::TagOpen => self.lex_tag_open(),
            State::TagName => self.lex_tag_name(),
            State::TagClose => self.lex_tag_close(),
            State::PrintOpen => self.lex_print_open(),
            State::PrintClose => self.lex_print_close(),
            State::Expression => self.lex_expression(),
            State::Operator => self.lex_operator(),
            State::Punctuation => self.lex_punctuation(),
            State::OpenBracket => self.lex_open_bracket(),
            State::CloseBracket => self.lex_close_bracket(),
            State::Number => self.lex_number(),
            State::Name => self.lex_name(),
            State::String => self.lex_string(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.cursor..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.current() {
            self.cursor += c.len_utf8();
        }
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.current() {
            if !pred(c) {
                break;
            }
            self.cursor += c.len_utf8();
        }
    }

    /// Queue `[pos, cursor)` as a token without skipping anything after it.
    fn push(&mut self, kind: TokenKind) {
        let value = &self.source[self.pos..self.cursor];
        self.pending
            .push_back(Token::new(kind, value, Pos(self.pos)));
        self.pos = self.cursor;
    }

    /// Queue `[pos, cursor)` as a token and skip the whitespace after it.
    ///
    /// Inside a statement any whitespace is skipped. Back in literal text
    /// only spaces and tabs are.
    fn emit(&mut self, kind: TokenKind) {
        self.push(kind);
        let in_statement = !matches!(
            kind,
            TokenKind::Text | TokenKind::TagClose | TokenKind::PrintClose | TokenKind::Eof
        );
        if in_statement {
            self.skip_whitespace(char::is_whitespace);
        } else {
            self.skip_whitespace(is_blank);
        }
    }

    fn skip_whitespace(&mut self, pred: fn(char) -> bool) {
        self.bump_while(pred);
        if self.cursor > self.pos {
            if self.syntax.emits_whitespace() {
                self.push(TokenKind::Whitespace);
            } else {
                self.pos = self.cursor;
            }
        }
    }

    fn fail(&mut self, kind: LexErrorKind, at: usize) -> Option<State> {
        debug!(error = %kind, pos = at, "lexical error");
        self.pending.push_back(Token::new(
            TokenKind::Error(kind),
            kind.to_string(),
            Pos(at),
        ));
        None
    }

    fn lex_data(&mut self) -> Option<State> {
        let rest = self.rest();
        let tag_open = self.syntax.tag_open();
        let print_open = self.syntax.print_open();
        let tag = rest
            .find(tag_open)
            .map(|at| (at, tag_open.len(), State::TagOpen));
        let print = rest
            .find(print_open)
            .map(|at| (at, print_open.len(), State::PrintOpen));

        // Leftmost wins; on a tie the longer delimiter does.
        let found = match (tag, print) {
            (Some(t), Some(p)) => Some(if p.0 < t.0 || (p.0 == t.0 && p.1 > t.1) {
                p
            } else {
                t
            }),
            (t, p) => t.or(p),
        };

        if let Some((at, _, next)) = found {
            self.cursor += at;
            if self.cursor > self.pos {
                self.emit(TokenKind::Text);
            }
            return Some(next);
        }

        self.cursor = self.source.len();
        if self.cursor > self.pos {
            self.emit(TokenKind::Text);
        }
        self.emit(TokenKind::Eof);
        None
    }

    fn lex_tag_open(&mut self) -> Option<State> {
        self.cursor += self.syntax.tag_open().len();
        self.in_print = false;
        self.emit(TokenKind::TagOpen);
        Some(State::TagName)
    }

    fn lex_tag_name(&mut self) -> Option<State> {
        self.bump_while(char::is_alphanumeric);
        self.emit(TokenKind::TagName);
        Some(State::Expression)
    }

    fn lex_tag_close(&mut self) -> Option<State> {
        if self.nesting > 0 {
            return self.fail(LexErrorKind::UnclosedBracket, self.cursor);
        }
        self.cursor += self.syntax.tag_close().len();
        self.emit(TokenKind::TagClose);
        Some(State::Data)
    }

    fn lex_print_open(&mut self) -> Option<State> {
        self.cursor += self.syntax.print_open().len();
        self.in_print = true;
        self.emit(TokenKind::PrintOpen);
        Some(State::Expression)
    }

    fn lex_print_close(&mut self) -> Option<State> {
        if self.nesting > 0 {
            return self.fail(LexErrorKind::UnclosedBracket, self.cursor);
        }
        self.cursor += self.syntax.print_close().len();
        self.emit(TokenKind::PrintClose);
        Some(State::Data)
    }

    fn lex_expression(&mut self) -> Option<State> {
        let rest = self.rest();
        // The open statement's own close delimiter is checked first.
        let mut closers = [
            (self.syntax.tag_close(), State::TagClose),
            (self.syntax.print_close(), State::PrintClose),
        ];
        if self.in_print {
            closers.swap(0, 1);
        }
        if let Some(&(_, close)) = closers.iter().find(|(delim, _)| rest.starts_with(delim)) {
            return Some(close);
        }

        let Some(c) = self.current() else {
            return self.fail(LexErrorKind::UnexpectedEof, self.cursor);
        };
        let next = match c {
            _ if OPERATOR_CHARS.contains(c) || rest.starts_with("..") => State::Operator,
            _ if PUNCTUATION_CHARS.contains(c) => State::Punctuation,
            '(' | '[' | '{' => State::OpenBracket,
            ')' | ']' | '}' => State::CloseBracket,
            '"' => State::String,
            _ if c.is_ascii_digit() => State::Number,
            _ if c.is_alphanumeric() || c == '_' => State::Name,
            _ => {
                return self.fail(LexErrorKind::UnexpectedCharacter(c), self.cursor);
            }
        };
        Some(next)
    }

    fn lex_operator(&mut self) -> Option<State> {
        let rest = self.rest();
        if TWO_CHAR_OPERATORS.iter().any(|op| rest.starts_with(op)) {
            self.cursor += 2;
        } else {
            self.bump();
        }
        self.emit(TokenKind::Operator);
        Some(State::Expression)
    }

    fn lex_punctuation(&mut self) -> Option<State> {
        self.bump();
        self.emit(TokenKind::Punctuation);
        Some(State::Expression)
    }

    fn lex_open_bracket(&mut self) -> Option<State> {
        let kind = match self.current() {
            Some('(') => TokenKind::ParensOpen,
            Some('[') => TokenKind::ArrayOpen,
            _ => TokenKind::HashOpen,
        };
        self.bump();
        self.emit(kind);
        self.nesting += 1;
        Some(State::Expression)
    }

    fn lex_close_bracket(&mut self) -> Option<State> {
        let kind = match self.current() {
            Some(')') => TokenKind::ParensClose,
            Some(']') => TokenKind::ArrayClose,
            _ => TokenKind::HashClose,
        };
        self.bump();
        self.emit(kind);
        self.nesting = self.nesting.saturating_sub(1);
        Some(State::Expression)
    }

    fn lex_number(&mut self) -> Option<State> {
        self.bump_while(|c| c.is_ascii_digit());
        self.emit(TokenKind::Number);
        Some(State::Expression)
    }

    fn lex_name(&mut self) -> Option<State> {
        self.bump_while(is_name_char);
        self.emit(TokenKind::Name);
        Some(State::Expression)
    }

    fn lex_string(&mut self) -> Option<State> {
        let open = self.cursor;
        self.bump();
        self.push(TokenKind::StringOpen);

        let Some(close) = self.rest().find('"') else {
            return self.fail(LexErrorKind::UnterminatedString, open);
        };
        self.cursor += close;
        self.push(TokenKind::Text);

        self.bump();
        self.emit(TokenKind::StringClose);
        Some(State::Expression)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(token);
            }
            self.state?;
            self.step();
        }
    }
}

impl FusedIterator for Lexer<'_> {}

const fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
