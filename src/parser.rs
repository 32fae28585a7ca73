use std::collections::VecDeque;
use std::fmt;
use std::mem;

use tracing::{debug, trace};

use crate::Error;
use crate::ast::{BlockMap, BlockNode, ModuleNode, Node, PrintNode, TextNode, Tree};
use crate::lexer::{self, Lexer};
use crate::syntax::Syntax;
use crate::tags::{TagRegistry, TagStart};
use crate::token::{Pos, Token, TokenKind};

/// Classifies a parser error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Token kind not in the expected set.
    UnexpectedToken {
        found: TokenKind,
        expected: Vec<TokenKind>,
    },
    /// Token kind matched, its value did not.
    UnexpectedValue { found: String, expected: String },
    /// Template ended before a closing tag.
    UnexpectedEof { expected: String },
    /// No handler registered for a tag name.
    UnknownTag(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedToken { found, expected } => {
                write!(f, "unexpected token {found}, expected ")?;
                match expected.as_slice() {
                    [one] => write!(f, "{one}"),
                    many => {
                        let names: Vec<_> = many.iter().map(|k| k.name()).collect();
                        write!(f, "one of {}", names.join(", "))
                    }
                }
            }
            Self::UnexpectedValue { found, expected } => {
                write!(f, "unexpected value '{found}', expected '{expected}'")
            }
            Self::UnexpectedEof { expected } => {
                write!(f, "unexpected end of template, expected '{expected}'")
            }
            Self::UnknownTag(name) => write!(f, "unknown tag '{name}'"),
        }
    }
}

/// Error produced during parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {}", token.pos)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// The offending token.
    pub token: Token,
}

/// Error for a token whose kind is not one of `expected`.
///
/// An `Error` token is reported as the lexical error it carries.
#[must_use]
pub fn unexpected_token(token: Token, expected: &[TokenKind]) -> Error {
    if let Some(err) = token.lex_error() {
        return err.into();
    }
    ParseError {
        kind: ParseErrorKind::UnexpectedToken {
            found: token.kind,
            expected: expected.to_vec(),
        },
        token,
    }
    .into()
}

/// Error for a token of the right kind but the wrong value.
#[must_use]
pub fn unexpected_value(token: Token, expected: &str) -> Error {
    ParseError {
        kind: ParseErrorKind::UnexpectedValue {
            found: token.value.clone(),
            expected: expected.to_string(),
        },
        token,
    }
    .into()
}

/// Parse a template with the default syntax and the built-in tags.
///
/// # Errors
///
/// Returns the first lexical or syntax error; nothing of the tree is
/// returned in that case.
pub fn parse(source: &str) -> Result<Tree, Error> {
    parse_with(source, &Syntax::default(), &TagRegistry::default())
}

/// Parse a template with a custom syntax and tag registry.
pub fn parse_with(source: &str, syntax: &Syntax, tags: &TagRegistry) -> Result<Tree, Error> {
    Parser::new(Lexer::with_syntax(source, syntax), tags).parse()
}

/// Parse a template while the lexer runs on its own thread.
///
/// Produces the same result as [`parse_with`].
pub fn parse_pipelined(source: String, syntax: Syntax, tags: &TagRegistry) -> Result<Tree, Error> {
    Parser::new(lexer::spawn(source, syntax), tags).parse()
}

/// Number of read tokens that can be pushed back.
pub const BACKTRACK_LIMIT: usize = 3;

const HISTORY_LEN: usize = BACKTRACK_LIMIT + 1;

/// Recursive-descent parser state: token cursor, block scopes, and the
/// tag registry handlers dispatch through.
pub struct Parser<'a> {
    tokens: Box<dyn Iterator<Item = Token> + 'a>,
    tags: &'a TagRegistry,
    /// Most recently read tokens, oldest first.
    read: VecDeque<Token>,
    /// Pushed-back tokens, next one last.
    unread: Vec<Token>,
    /// Repeated once the token source is exhausted.
    terminal: Option<Token>,
    end: Pos,
    blocks: Vec<BlockMap>,
}

impl<'a> Parser<'a> {
    pub fn new<I>(tokens: I, tags: &'a TagRegistry) -> Self
    where
        I: IntoIterator<Item = Token>,
        I::IntoIter: 'a,
    {
        Self {
            tokens: Box::new(tokens.into_iter()),
            tags,
            read: VecDeque::with_capacity(HISTORY_LEN + 1),
            unread: Vec::with_capacity(BACKTRACK_LIMIT),
            terminal: None,
            end: Pos(0),
            blocks: vec![BlockMap::new()],
        }
    }

    /// Parse the whole token stream into a [`Tree`].
    pub fn parse(mut self) -> Result<Tree, Error> {
        let mut root = ModuleNode::default();
        while let Some(node) = self.parse_node()? {
            root.append(node);
        }
        let blocks = mem::take(&mut self.blocks)
            .into_iter()
            .next()
            .unwrap_or_default();
        debug!(
            nodes = root.children.len(),
            blocks = blocks.len(),
            "template parsed"
        );
        Ok(Tree { root, blocks })
    }

    /// Parse one top-level construct: text, a print statement, or a tag.
    ///
    /// Returns `Ok(None)` at the end of the template.
    pub fn parse_node(&mut self) -> Result<Option<Node>, Error> {
        let token = self.next_non_space();
        match token.kind {
            TokenKind::Text => Ok(Some(Node::Text(TextNode {
                text: token.value,
                pos: token.pos,
            }))),
            TokenKind::PrintOpen => {
                let expr = self.parse_expr()?;
                self.expect(&[TokenKind::PrintClose])?;
                Ok(Some(Node::Print(PrintNode {
                    expr,
                    pos: token.pos,
                })))
            }
            TokenKind::TagOpen => self.parse_tag(token.pos).map(Some),
            TokenKind::Eof => Ok(None),
            _ => Err(unexpected_token(
                token,
                &[
                    TokenKind::Text,
                    TokenKind::PrintOpen,
                    TokenKind::TagOpen,
                    TokenKind::Eof,
                ],
            )),
        }
    }

    fn parse_tag(&mut self, pos: Pos) -> Result<Node, Error> {
        let name = self.expect(&[TokenKind::TagName])?;
        let tags = self.tags;
        let Some(handler) = tags.get(&name.value) else {
            return Err(ParseError {
                kind: ParseErrorKind::UnknownTag(name.value.clone()),
                token: name,
            }
            .into());
        };
        trace!(tag = %name.value, pos = pos.offset(), "dispatching tag");
        handler.parse(
            self,
            &TagStart {
                name: name.value,
                pos,
            },
        )
    }

    /// Parse nodes until one of the tags in `ends` opens.
    ///
    /// Returns the collected body and the name token of the end tag. The
    /// end tag's arguments and close delimiter are left to the caller.
    pub fn parse_until(&mut self, ends: &[&str]) -> Result<(Vec<Node>, Token), Error> {
        let mut body = Vec::new();
        loop {
            let token = self.next_non_space();
            match token.kind {
                TokenKind::TagOpen => {
                    let name = self.peek_non_space();
                    if name.kind == TokenKind::TagName && ends.contains(&name.value.as_str()) {
                        self.next_non_space();
                        return Ok((body, name));
                    }
                }
                TokenKind::Eof => {
                    return Err(ParseError {
                        kind: ParseErrorKind::UnexpectedEof {
                            expected: ends.join("' or '"),
                        },
                        token,
                    }
                    .into());
                }
                _ => {}
            }
            self.backup();
            if let Some(node) = self.parse_node()? {
                body.push(node);
            }
        }
    }

    /// Read the next token.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Token {
        let token = match self.unread.pop() {
            Some(token) => token,
            None => self.pull(),
        };
        self.read.push_back(token.clone());
        // One slot beyond the limit so a peek never costs backtrack depth.
        if self.read.len() > HISTORY_LEN {
            self.read.pop_front();
        }
        token
    }

    fn pull(&mut self) -> Token {
        if let Some(terminal) = &self.terminal {
            return terminal.clone();
        }
        let token = self
            .tokens
            .next()
            .unwrap_or_else(|| Token::new(TokenKind::Eof, "", self.end));
        if token.kind.is_terminal() {
            self.terminal = Some(token.clone());
        } else {
            self.end = Pos(token.pos.offset() + token.value.len());
        }
        token
    }

    /// Inspect the next token without consuming it.
    pub fn peek(&mut self) -> Token {
        let token = self.next();
        self.backup();
        token
    }

    /// Read the next token that is not whitespace.
    ///
    /// Skipped whitespace does not enter the backtrack history.
    pub fn next_non_space(&mut self) -> Token {
        loop {
            let token = self.next();
            if token.kind != TokenKind::Whitespace {
                return token;
            }
            self.read.pop_back();
        }
    }

    pub fn peek_non_space(&mut self) -> Token {
        let token = self.next_non_space();
        self.backup();
        token
    }

    /// Push the most recently read token back.
    ///
    /// The [`BACKTRACK_LIMIT`] most recently read tokens can always be
    /// pushed back, peeks in between included.
    ///
    /// # Panics
    ///
    /// Panics when no read token is left in the history.
    pub fn backup(&mut self) {
        let token = self.read.pop_back();
        assert!(token.is_some(), "backtrack history exhausted");
        self.unread.extend(token);
    }

    /// Push the `count` most recently read tokens back.
    pub fn backup_n(&mut self, count: usize) {
        for _ in 0..count {
            self.backup();
        }
    }

    /// Read the next non-space token, requiring one of `kinds`.
    pub fn expect(&mut self, kinds: &[TokenKind]) -> Result<Token, Error> {
        let token = self.next_non_space();
        if kinds.contains(&token.kind) {
            Ok(token)
        } else {
            Err(unexpected_token(token, kinds))
        }
    }

    /// Read the next non-space token, requiring an exact kind and value.
    pub fn expect_value(&mut self, kind: TokenKind, value: &str) -> Result<Token, Error> {
        let token = self.expect(&[kind])?;
        if token.value == value {
            Ok(token)
        } else {
            Err(unexpected_value(token, value))
        }
    }

    /// Consume the next non-space token if it has this kind and value.
    pub fn accept(&mut self, kind: TokenKind, value: &str) -> Option<Token> {
        let token = self.next_non_space();
        if token.is(kind, value) {
            Some(token)
        } else {
            self.backup();
            None
        }
    }

    /// Consume the next non-space token if it has this kind.
    pub fn accept_kind(&mut self, kind: TokenKind) -> Option<Token> {
        let token = self.next_non_space();
        if token.kind == kind {
            Some(token)
        } else {
            self.backup();
            None
        }
    }

    /// Open a new, empty block scope.
    pub fn push_block_stack(&mut self) {
        self.blocks.push(BlockMap::new());
    }

    /// Close the innermost block scope and return its blocks.
    ///
    /// The blocks are not merged into the enclosing scope. Popping the
    /// outermost scope leaves a fresh empty one in its place.
    pub fn pop_block_stack(&mut self) -> BlockMap {
        let blocks = self.blocks.pop().unwrap_or_default();
        if self.blocks.is_empty() {
            self.blocks.push(BlockMap::new());
        }
        blocks
    }

    /// Register a block in the innermost scope, replacing any block of the
    /// same name there.
    pub fn set_block(&mut self, name: impl Into<String>, block: BlockNode) {
        let name = name.into();
        trace!(block = %name, depth = self.blocks.len(), "block registered");
        if let Some(scope) = self.blocks.last_mut() {
            scope.insert(name, block);
        }
    }

    /// Blocks of the innermost scope.
    #[must_use]
    pub fn blocks(&self) -> &BlockMap {
        &self.blocks[self.blocks.len() - 1]
    }

    /// Number of open block scopes, the outermost included.
    #[must_use]
    pub fn block_depth(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::LexErrorKind;

    fn parser<'a>(source: &'a str, tags: &'a TagRegistry) -> Parser<'a> {
        Parser::new(Lexer::new(source), tags)
    }

    fn block(name: &str) -> BlockNode {
        BlockNode {
            name: name.to_string(),
            body: Vec::new(),
            pos: Pos(0),
        }
    }

    #[test]
    fn backtrack_three_replays_in_order() {
        let tags = TagRegistry::empty();
        let mut p = parser("{{ a }}", &tags);
        let first: Vec<Token> = (0..3).map(|_| p.next()).collect();
        p.backup_n(3);
        let again: Vec<Token> = (0..3).map(|_| p.next()).collect();
        assert_eq!(first, again);
        assert_eq!(p.next().kind, TokenKind::Eof);
    }

    #[test]
    fn peek_keeps_backtrack_depth() {
        let tags = TagRegistry::empty();
        let mut p = parser("{% a b c d %}", &tags);
        let first: Vec<Token> = (0..3).map(|_| p.next()).collect();
        assert_eq!(p.peek().value, "c");
        p.backup_n(3);
        let again: Vec<Token> = (0..3).map(|_| p.next()).collect();
        assert_eq!(first, again);
        assert_eq!(p.next().value, "c");
    }

    #[test]
    fn peek_non_space_keeps_backtrack_depth() {
        let tags = TagRegistry::empty();
        let syntax = Syntax::default().with_whitespace_tokens(true);
        let mut p = Parser::new(Lexer::with_syntax("{{a+b c}}", &syntax), &tags);
        p.next_non_space();
        p.next_non_space();
        let first: Vec<Token> = (0..3).map(|_| p.next_non_space()).collect();
        assert_eq!(first[2].value, "c");
        assert_eq!(p.peek_non_space().kind, TokenKind::PrintClose);
        p.backup_n(3);
        let again: Vec<Token> = (0..3).map(|_| p.next_non_space()).collect();
        assert_eq!(first, again);
        assert_eq!(p.next_non_space().kind, TokenKind::PrintClose);
    }

    #[test]
    #[should_panic(expected = "backtrack history exhausted")]
    fn backing_up_past_history_panics() {
        let tags = TagRegistry::empty();
        let mut p = parser("{{ a }}", &tags);
        p.next();
        p.backup_n(2);
    }

    #[test]
    fn peek_does_not_consume() {
        let tags = TagRegistry::empty();
        let mut p = parser("{{ a }}", &tags);
        assert_eq!(p.peek().kind, TokenKind::PrintOpen);
        assert_eq!(p.next().kind, TokenKind::PrintOpen);
        assert_eq!(p.peek_non_space().value, "a");
    }

    #[test]
    fn reads_past_the_end_repeat_eof() {
        let tags = TagRegistry::empty();
        let mut p = parser("x", &tags);
        assert_eq!(p.next().kind, TokenKind::Text);
        assert_eq!(p.next().kind, TokenKind::Eof);
        assert_eq!(p.next().kind, TokenKind::Eof);
        assert_eq!(p.next().pos, Pos(1));
    }

    #[test]
    fn exhausted_source_without_terminal_yields_eof() {
        let tags = TagRegistry::empty();
        let tokens = vec![Token::new(TokenKind::Text, "abc", Pos(0))];
        let mut p = Parser::new(tokens, &tags);
        assert_eq!(p.next().kind, TokenKind::Text);
        let eof = p.next();
        assert_eq!(eof.kind, TokenKind::Eof);
        assert_eq!(eof.pos, Pos(3));
    }

    #[test]
    fn non_space_skips_whitespace_tokens() {
        let tags = TagRegistry::empty();
        let syntax = Syntax::default().with_whitespace_tokens(true);
        let mut p = Parser::new(Lexer::with_syntax("{{  a }}", &syntax), &tags);
        assert_eq!(p.next().kind, TokenKind::PrintOpen);
        assert_eq!(p.peek().kind, TokenKind::Whitespace);
        let name = p.next_non_space();
        assert_eq!(name.value, "a");
        p.backup();
        assert_eq!(p.next().value, "a");
    }

    #[test]
    fn block_scopes_do_not_merge() {
        let tags = TagRegistry::empty();
        let mut p = parser("", &tags);
        p.push_block_stack();
        p.set_block("a", block("a"));
        assert_eq!(p.block_depth(), 2);
        let popped = p.pop_block_stack();
        assert_eq!(popped.len(), 1);
        assert!(popped.contains_key("a"));
        assert!(p.blocks().is_empty());
        assert_eq!(p.block_depth(), 1);
    }

    #[test]
    fn set_block_overwrites_in_scope() {
        let tags = TagRegistry::empty();
        let mut p = parser("", &tags);
        p.set_block("a", block("a"));
        let mut replacement = block("a");
        replacement.pos = Pos(9);
        p.set_block("a", replacement);
        assert_eq!(p.blocks().len(), 1);
        assert_eq!(p.blocks()["a"].pos, Pos(9));
    }

    #[test]
    fn popping_outermost_scope_keeps_one() {
        let tags = TagRegistry::empty();
        let mut p = parser("", &tags);
        p.set_block("a", block("a"));
        assert_eq!(p.pop_block_stack().len(), 1);
        assert_eq!(p.block_depth(), 1);
        assert!(p.blocks().is_empty());
    }

    #[test]
    fn expect_reports_kind_mismatch() {
        let tags = TagRegistry::empty();
        let mut p = parser("{{ a }}", &tags);
        let err = p.expect(&[TokenKind::TagOpen]).unwrap_err();
        let Error::Parse(err) = err else {
            panic!("expected a parse error");
        };
        assert_eq!(
            err.kind,
            ParseErrorKind::UnexpectedToken {
                found: TokenKind::PrintOpen,
                expected: vec![TokenKind::TagOpen],
            }
        );
        assert_eq!(
            err.to_string(),
            "unexpected token PRINT_OPEN, expected TAG_OPEN at offset 0"
        );
    }

    #[test]
    fn expect_value_reports_value_mismatch() {
        let tags = TagRegistry::empty();
        let mut p = parser("{% endif %}", &tags);
        p.next();
        let err = p.expect_value(TokenKind::TagName, "endblock").unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError {
                kind: ParseErrorKind::UnexpectedValue { .. },
                ..
            })
        ));
        assert!(err.to_string().contains("expected 'endblock'"));
    }

    #[test]
    fn error_token_surfaces_as_lex_error() {
        let tags = TagRegistry::empty();
        let mut p = parser("{{ \"open }}", &tags);
        let err = p.parse_node().unwrap_err();
        assert_eq!(
            err,
            Error::Lex(crate::LexError {
                kind: LexErrorKind::UnterminatedString,
                pos: Pos(3),
            })
        );
    }

    #[test]
    fn unknown_tag() {
        let tags = TagRegistry::empty();
        let err = parser("{% nope %}", &tags).parse().unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError {
                kind: ParseErrorKind::UnknownTag(ref name),
                ..
            }) if name == "nope"
        ));
    }
}
