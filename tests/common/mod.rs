#![allow(dead_code)]

use stick_syntax::{Error, Node, Syntax, TagNode, TagRegistry, TokenKind, Tree, parse_with};

/// Parse with the built-in tags, panicking with the error on failure.
pub fn parse_ok(source: &str) -> Tree {
    stick_syntax::parse(source)
        .unwrap_or_else(|e| panic!("failed to parse: {e}\n--- source ---\n{source}"))
}

/// Parse expecting failure, returning the error.
pub fn parse_err(source: &str) -> Error {
    match stick_syntax::parse(source) {
        Ok(tree) => panic!("expected an error, got {tree:?}\n--- source ---\n{source}"),
        Err(e) => e,
    }
}

/// Registry with the built-ins plus a body-less `foo` tag producing a
/// generic tag node.
pub fn registry_with_foo() -> TagRegistry {
    let mut tags = TagRegistry::default();
    tags.register_fn("foo", |parser, tag| {
        parser.expect(&[TokenKind::TagClose])?;
        Ok(Node::Tag(TagNode::new(&tag.name, tag.pos)))
    });
    tags
}

pub fn parse_foo(source: &str) -> Result<Tree, Error> {
    parse_with(source, &Syntax::default(), &registry_with_foo())
}

/// Concatenated values of all tokens before the terminal one.
pub fn joined_values(source: &str, syntax: &Syntax) -> String {
    stick_syntax::tokenize_with(source, syntax)
        .iter()
        .filter(|t| !t.kind.is_terminal())
        .map(|t| t.value.as_str())
        .collect()
}
