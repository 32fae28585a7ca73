//! Lexer and parser for Twig-style templates.
//!
//! The lexer turns template source into a lazy stream of [`Token`]s.
//! The parser consumes that stream into a [`Tree`]: a module node plus
//! the named blocks declared at the top level. Tags are dispatched
//! through a [`TagRegistry`] that callers can extend.
//!
//! # Quick start
//!
//! ## Tokenize a template
//!
//! ```
//! use stick_syntax::{TokenKind, tokenize};
//!
//! let stream = tokenize("Hello {{ name }}!");
//! assert_eq!(
//!     stream.kinds(),
//!     [
//!         TokenKind::Text,
//!         TokenKind::PrintOpen,
//!         TokenKind::Name,
//!         TokenKind::PrintClose,
//!         TokenKind::Text,
//!         TokenKind::Eof,
//!     ]
//! );
//! ```
//!
//! ## Parse with a custom tag
//!
//! ```
//! use stick_syntax::{Node, TagNode, TagRegistry, TokenKind, Syntax, parse_with};
//!
//! let mut tags = TagRegistry::default();
//! tags.register_fn("spaceless", |parser, tag| {
//!     parser.expect(&[TokenKind::TagClose])?;
//!     let (body, _) = parser.parse_until(&["endspaceless"])?;
//!     parser.expect(&[TokenKind::TagClose])?;
//!     let mut node = TagNode::new(&tag.name, tag.pos);
//!     node.body = body;
//!     Ok(Node::Tag(node))
//! });
//!
//! let tree = parse_with(
//!     "{% spaceless %}<b> {{ x }} </b>{% endspaceless %}",
//!     &Syntax::default(),
//!     &tags,
//! )
//! .unwrap();
//! assert!(matches!(&tree.root.children[0], Node::Tag(t) if t.body.len() == 3));
//! ```

// Allow noisy pedantic lints that don't add value for
// a library crate.
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]

pub mod ast;
mod expr;
pub mod lexer;
pub mod parser;
pub mod syntax;
pub mod tags;
pub mod token;

pub use ast::{BlockMap, BlockNode, Expr, Node, TagNode, Tree};
pub use lexer::{LexError, LexErrorKind, Lexer, spawn, tokenize, tokenize_with};
pub use parser::{ParseError, ParseErrorKind, Parser, parse, parse_pipelined, parse_with};
pub use syntax::{Syntax, SyntaxError};
pub use tags::{TagHandler, TagRegistry, TagStart};
pub use token::{Pos, Token, TokenKind, TokenStream};

/// Unified error type covering both lexing and parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A lexer error.
    #[error("{0}")]
    Lex(#[from] LexError),
    /// A parser error.
    #[error("{0}")]
    Parse(#[from] ParseError),
}

impl Error {
    /// Byte offset the error points at.
    #[must_use]
    pub const fn pos(&self) -> Pos {
        match self {
            Self::Lex(err) => err.pos,
            Self::Parse(err) => err.token.pos,
        }
    }
}
