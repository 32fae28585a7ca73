//! Tag dispatch: the registry of tag handlers and the built-in tags.

use std::collections::HashMap;
use std::fmt;

use tracing::trace;

use crate::Error;
use crate::ast::{
    BlockNode, BlockRef, DoNode, EmbedNode, Expr, ExtendsNode, ForNode, IfBranch, IfNode,
    IncludeNode, Node, PrintNode, SetNode, SetValue, UseNode,
};
use crate::parser::{Parser, unexpected_value};
use crate::token::{Pos, TokenKind};

/// The tag being parsed, as seen by its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagStart {
    pub name: String,
    /// Offset of the tag's open delimiter.
    pub pos: Pos,
}

/// Parses one tag.
///
/// A handler is called right after the tag name has been read. It must
/// consume the rest of the tag up to and including its close delimiter,
/// plus any body and end tag. Closures with the matching signature are
/// handlers.
pub trait TagHandler: Send + Sync {
    fn parse(&self, parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error>;
}

impl<F> TagHandler for F
where
    F: Fn(&mut Parser<'_>, &TagStart) -> Result<Node, Error> + Send + Sync,
{
    fn parse(&self, parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
        self(parser, tag)
    }
}

/// Tag name to handler map consulted by the parser.
///
/// `TagRegistry::default()` holds the built-in tags; `TagRegistry::empty()`
/// holds none.
pub struct TagRegistry {
    handlers: HashMap<String, Box<dyn TagHandler>>,
}

impl TagRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `name`, replacing any previous handler.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl TagHandler + 'static,
    ) -> &mut Self {
        let name = name.into();
        trace!(tag = %name, "tag handler registered");
        self.handlers.insert(name, Box::new(handler));
        self
    }

    /// Register a closure, with its argument types inferred.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&mut Parser<'_>, &TagStart) -> Result<Node, Error> + Send + Sync + 'static,
    {
        self.register(name, handler)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn TagHandler> {
        self.handlers.get(name).map(Box::as_ref)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered tag names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register("block", parse_block)
            .register("extends", parse_extends)
            .register("embed", parse_embed)
            .register("include", parse_include)
            .register("use", parse_use)
            .register("if", parse_if)
            .register("for", parse_for)
            .register("set", parse_set)
            .register("do", parse_do);
        registry
    }
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagRegistry")
            .field("tags", &self.names())
            .finish()
    }
}

fn close(parser: &mut Parser<'_>) -> Result<(), Error> {
    parser.expect(&[TokenKind::TagClose])?;
    Ok(())
}

/// Optional `with expr` then optional `only`.
fn parse_with_only(parser: &mut Parser<'_>) -> Result<(Option<Expr>, bool), Error> {
    let with = if parser.accept(TokenKind::Name, "with").is_some() {
        Some(parser.parse_expr()?)
    } else {
        None
    };
    let only = parser.accept(TokenKind::Name, "only").is_some();
    Ok((with, only))
}

/// `{% block name %}…{% endblock [name] %}` or `{% block name expr %}`.
fn parse_block(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let name = parser.expect(&[TokenKind::Name])?.value;
    let body = if parser.accept_kind(TokenKind::TagClose).is_some() {
        let (body, _) = parser.parse_until(&["endblock"])?;
        if let Some(end) = parser.accept_kind(TokenKind::Name) {
            if end.value != name {
                return Err(unexpected_value(end, &name));
            }
        }
        close(parser)?;
        body
    } else {
        let expr = parser.parse_expr()?;
        close(parser)?;
        vec![Node::Print(PrintNode {
            pos: expr.pos(),
            expr,
        })]
    };
    parser.set_block(
        name.clone(),
        BlockNode {
            name: name.clone(),
            body,
            pos: tag.pos,
        },
    );
    Ok(Node::BlockRef(BlockRef { name, pos: tag.pos }))
}

fn parse_extends(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let parent = parser.parse_expr()?;
    close(parser)?;
    Ok(Node::Extends(ExtendsNode {
        parent,
        pos: tag.pos,
    }))
}

/// Blocks declared inside the embed land in their own scope. Anything
/// else in the body is discarded.
fn parse_embed(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let template = parser.parse_expr()?;
    let (with, only) = parse_with_only(parser)?;
    close(parser)?;

    parser.push_block_stack();
    let body = parser.parse_until(&["endembed"]);
    let blocks = parser.pop_block_stack();
    body?;
    close(parser)?;

    Ok(Node::Embed(EmbedNode {
        template,
        with,
        only,
        blocks,
        pos: tag.pos,
    }))
}

fn parse_include(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let template = parser.parse_expr()?;
    let ignore_missing = parser.accept(TokenKind::Name, "ignore").is_some();
    if ignore_missing {
        parser.expect_value(TokenKind::Name, "missing")?;
    }
    let (with, only) = parse_with_only(parser)?;
    close(parser)?;
    Ok(Node::Include(IncludeNode {
        template,
        with,
        only,
        ignore_missing,
        pos: tag.pos,
    }))
}

/// `{% use tpl %}` or `{% use tpl with a as b, c as d %}`.
fn parse_use(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let template = parser.parse_expr()?;
    let mut aliases = Vec::new();
    if parser.accept(TokenKind::Name, "with").is_some() {
        loop {
            let block = parser.expect(&[TokenKind::Name])?.value;
            parser.expect_value(TokenKind::Name, "as")?;
            let alias = parser.expect(&[TokenKind::Name])?.value;
            aliases.push((block, alias));
            if parser.accept(TokenKind::Punctuation, ",").is_none() {
                break;
            }
        }
    }
    close(parser)?;
    Ok(Node::Use(UseNode {
        template,
        aliases,
        pos: tag.pos,
    }))
}

fn parse_if(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let mut branches = Vec::new();
    let mut else_body = None;
    let mut condition = parser.parse_expr()?;
    close(parser)?;
    loop {
        let (body, end) = parser.parse_until(&["elseif", "else", "endif"])?;
        branches.push(IfBranch { condition, body });
        match end.value.as_str() {
            "elseif" => {
                condition = parser.parse_expr()?;
                close(parser)?;
            }
            "else" => {
                close(parser)?;
                let (body, _) = parser.parse_until(&["endif"])?;
                else_body = Some(body);
                close(parser)?;
                break;
            }
            _ => {
                close(parser)?;
                break;
            }
        }
    }
    Ok(Node::If(IfNode {
        branches,
        else_body,
        pos: tag.pos,
    }))
}

/// `{% for [key,] value in iterable %}…[{% else %}…]{% endfor %}`.
fn parse_for(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let first = parser.expect(&[TokenKind::Name])?.value;
    let (key, value) = if parser.accept(TokenKind::Punctuation, ",").is_some() {
        let value = parser.expect(&[TokenKind::Name])?.value;
        (Some(first), value)
    } else {
        (None, first)
    };
    parser.expect_value(TokenKind::Name, "in")?;
    let iterable = parser.parse_expr()?;
    close(parser)?;

    let (body, end) = parser.parse_until(&["else", "endfor"])?;
    close(parser)?;
    let else_body = if end.value == "else" {
        let (body, _) = parser.parse_until(&["endfor"])?;
        close(parser)?;
        Some(body)
    } else {
        None
    };
    Ok(Node::For(ForNode {
        key,
        value,
        iterable,
        body,
        else_body,
        pos: tag.pos,
    }))
}

/// `{% set name = expr %}` or the capturing `{% set name %}…{% endset %}`.
fn parse_set(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let name = parser.expect(&[TokenKind::Name])?.value;
    let value = if parser.accept(TokenKind::Operator, "=").is_some() {
        let expr = parser.parse_expr()?;
        close(parser)?;
        SetValue::Expr(expr)
    } else {
        close(parser)?;
        let (body, _) = parser.parse_until(&["endset"])?;
        close(parser)?;
        SetValue::Capture(body)
    };
    Ok(Node::Set(SetNode {
        name,
        value,
        pos: tag.pos,
    }))
}

fn parse_do(parser: &mut Parser<'_>, tag: &TagStart) -> Result<Node, Error> {
    let expr = parser.parse_expr()?;
    close(parser)?;
    Ok(Node::Do(DoNode { expr, pos: tag.pos }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{TagNode, Tree};
    use crate::parser::{ParseError, ParseErrorKind, parse};

    fn only_node(tree: &Tree) -> &Node {
        assert_eq!(tree.root.children.len(), 1, "{:?}", tree.root.children);
        &tree.root.children[0]
    }

    #[test]
    fn default_registry_has_builtins() {
        let tags = TagRegistry::default();
        assert_eq!(
            tags.names(),
            ["block", "do", "embed", "extends", "for", "if", "include", "set", "use"]
        );
        assert!(TagRegistry::empty().names().is_empty());
        assert!(format!("{tags:?}").contains("\"embed\""));
    }

    #[test]
    fn register_replaces_handler() {
        let mut tags = TagRegistry::default();
        tags.register_fn("do", |parser, tag| {
            close(parser)?;
            Ok(Node::Tag(TagNode::new("custom-do", tag.pos)))
        });
        let mut parser = Parser::new(crate::lexer::Lexer::new("{% do %}"), &tags);
        let Some(Node::Tag(node)) = parser.parse_node().expect("parses") else {
            panic!("expected a tag node");
        };
        assert_eq!(node.name, "custom-do");
    }

    #[test]
    fn block_registers_body_and_leaves_ref() {
        let tree = parse("{% block title %}Hello{% endblock %}").expect("parses");
        assert_eq!(
            only_node(&tree),
            &Node::BlockRef(BlockRef {
                name: "title".to_string(),
                pos: Pos(0),
            })
        );
        let block = tree.block("title").expect("block registered");
        assert_eq!(block.body.len(), 1);
    }

    #[test]
    fn block_end_name_must_match() {
        assert!(parse("{% block a %}{% endblock a %}").is_ok());
        let err = parse("{% block a %}{% endblock b %}").unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError {
                kind: ParseErrorKind::UnexpectedValue { .. },
                ..
            })
        ));
    }

    #[test]
    fn block_shorthand_prints_expression() {
        let tree = parse("{% block title page.title %}").expect("parses");
        let block = tree.block("title").expect("block registered");
        assert!(matches!(block.body.as_slice(), [Node::Print(_)]));
    }

    #[test]
    fn nested_blocks_share_the_scope() {
        let tree =
            parse("{% block outer %}{% block inner %}x{% endblock %}{% endblock %}").expect("parses");
        assert!(tree.block("outer").is_some());
        assert!(tree.block("inner").is_some());
        let outer = tree.block("outer").expect("outer");
        assert!(matches!(outer.body.as_slice(), [Node::BlockRef(r)] if r.name == "inner"));
    }

    #[test]
    fn extends_parent() {
        let tree = parse("{% extends \"base.html\" %}").expect("parses");
        let Node::Extends(node) = only_node(&tree) else {
            panic!("expected extends");
        };
        assert!(matches!(&node.parent, Expr::String { value, .. } if value == "base.html"));
    }

    #[test]
    fn embed_keeps_blocks_in_own_scope() {
        let tree = parse(
            "{% embed \"card.html\" with {title: t} only %}\
             {% block body %}inner{% endblock %}\
             {% endembed %}{% block body %}outer{% endblock %}",
        )
        .expect("parses");
        let Node::Embed(embed) = &tree.root.children[0] else {
            panic!("expected embed");
        };
        assert!(embed.with.is_some());
        assert!(embed.only);
        let inner = &embed.blocks["body"];
        let outer = tree.block("body").expect("outer block");
        assert_ne!(inner.pos, outer.pos);
        assert_eq!(tree.blocks.len(), 1);
    }

    #[test]
    fn embed_without_blocks_does_not_touch_parent_scope() {
        let tree = parse("{% embed \"x\" %}{% endembed %}").expect("parses");
        assert!(tree.blocks.is_empty());
        let Node::Embed(embed) = only_node(&tree) else {
            panic!("expected embed");
        };
        assert!(embed.blocks.is_empty());
        assert!(!embed.only);
    }

    #[test]
    fn include_modifiers() {
        let tree = parse("{% include \"a\" ignore missing with vars only %}").expect("parses");
        let Node::Include(node) = only_node(&tree) else {
            panic!("expected include");
        };
        assert!(node.ignore_missing);
        assert!(matches!(&node.with, Some(Expr::Name { name, .. }) if name == "vars"));
        assert!(node.only);

        let tree = parse("{% include name %}").expect("parses");
        let Node::Include(node) = only_node(&tree) else {
            panic!("expected include");
        };
        assert!(!node.ignore_missing && node.with.is_none() && !node.only);
    }

    #[test]
    fn include_ignore_requires_missing() {
        assert!(parse("{% include \"a\" ignore %}").is_err());
    }

    #[test]
    fn use_aliases() {
        let tree = parse("{% use \"blocks.html\" with side as base_side, title as t %}")
            .expect("parses");
        let Node::Use(node) = only_node(&tree) else {
            panic!("expected use");
        };
        assert_eq!(
            node.aliases,
            [
                ("side".to_string(), "base_side".to_string()),
                ("title".to_string(), "t".to_string()),
            ]
        );
    }

    #[test]
    fn if_elseif_else() {
        let tree = parse("{% if a %}1{% elseif b %}2{% elseif c %}3{% else %}4{% endif %}")
            .expect("parses");
        let Node::If(node) = only_node(&tree) else {
            panic!("expected if");
        };
        assert_eq!(node.branches.len(), 3);
        assert_eq!(node.else_body.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn if_without_else() {
        let tree = parse("{% if a %}yes{% endif %}").expect("parses");
        let Node::If(node) = only_node(&tree) else {
            panic!("expected if");
        };
        assert_eq!(node.branches.len(), 1);
        assert!(node.else_body.is_none());
    }

    #[test]
    fn unclosed_if_reports_eof() {
        let err = parse("{% if a %}yes").unwrap_err();
        assert!(matches!(
            err,
            Error::Parse(ParseError {
                kind: ParseErrorKind::UnexpectedEof { .. },
                ..
            })
        ));
        assert!(err.to_string().contains("endif"));
    }

    #[test]
    fn for_key_value_and_else() {
        let tree = parse("{% for k, v in items %}{{ v }}{% else %}none{% endfor %}")
            .expect("parses");
        let Node::For(node) = only_node(&tree) else {
            panic!("expected for");
        };
        assert_eq!(node.key.as_deref(), Some("k"));
        assert_eq!(node.value, "v");
        assert_eq!(node.body.len(), 1);
        assert!(node.else_body.is_some());
    }

    #[test]
    fn for_requires_in() {
        let err = parse("{% for v of items %}{% endfor %}").unwrap_err();
        assert!(err.to_string().contains("expected 'in'"));
    }

    #[test]
    fn set_assign_and_capture() {
        let tree = parse("{% set x = 1 + 2 %}{% set y %}captured{% endset %}").expect("parses");
        let [Node::Set(assign), Node::Set(capture)] = tree.root.children.as_slice() else {
            panic!("expected two set nodes");
        };
        assert!(matches!(assign.value, SetValue::Expr(Expr::Binary { .. })));
        assert!(matches!(&capture.value, SetValue::Capture(body) if body.len() == 1));
    }

    #[test]
    fn do_expression() {
        let tree = parse("{% do items.push(1) %}").expect("parses");
        assert!(matches!(only_node(&tree), Node::Do(_)));
    }
}
