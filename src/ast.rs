use std::collections::HashMap;
use std::fmt;

use crate::token::{Pos, Token, TokenKind};

/// Blocks defined in one scope, keyed by name.
pub type BlockMap = HashMap<String, BlockNode>;

/// Parsed template: the root module plus its outermost block scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub root: ModuleNode,
    pub blocks: BlockMap,
}

impl Tree {
    /// Look up a block of the outermost scope.
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&BlockNode> {
        self.blocks.get(name)
    }
}

/// Root of a template. Only ever appears as [`Tree::root`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleNode {
    pub children: Vec<Node>,
    pub pos: Pos,
}

impl ModuleNode {
    pub fn append(&mut self, node: Node) {
        self.children.push(node);
    }
}

/// Statement-level node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(TextNode),
    Print(PrintNode),
    BlockRef(BlockRef),
    Extends(ExtendsNode),
    Embed(EmbedNode),
    Include(IncludeNode),
    Use(UseNode),
    If(IfNode),
    For(ForNode),
    Set(SetNode),
    Do(DoNode),
    /// Produced by externally registered tag handlers.
    Tag(TagNode),
}

impl Node {
    #[must_use]
    pub const fn pos(&self) -> Pos {
        match self {
            Self::Text(n) => n.pos,
            Self::Print(n) => n.pos,
            Self::BlockRef(n) => n.pos,
            Self::Extends(n) => n.pos,
            Self::Embed(n) => n.pos,
            Self::Include(n) => n.pos,
            Self::Use(n) => n.pos,
            Self::If(n) => n.pos,
            Self::For(n) => n.pos,
            Self::Set(n) => n.pos,
            Self::Do(n) => n.pos,
            Self::Tag(n) => n.pos,
        }
    }
}

/// Literal template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    pub text: String,
    pub pos: Pos,
}

/// `{{ expr }}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintNode {
    pub expr: Expr,
    pub pos: Pos,
}

/// A named, overridable section.
///
/// Owned by the block map of the scope it was declared in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockNode {
    pub name: String,
    pub body: Vec<Node>,
    pub pos: Pos,
}

/// Marks where a block was declared; the body lives in the scope's
/// [`BlockMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub name: String,
    pub pos: Pos,
}

/// `{% extends parent %}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendsNode {
    pub parent: Expr,
    pub pos: Pos,
}

/// `{% embed tpl with vars only %}…{% endembed %}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedNode {
    pub template: Expr,
    pub with: Option<Expr>,
    pub only: bool,
    /// Blocks overridden inside the embed, in their own scope.
    pub blocks: BlockMap,
    pub pos: Pos,
}

/// `{% include tpl ignore missing with vars only %}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeNode {
    pub template: Expr,
    pub with: Option<Expr>,
    pub only: bool,
    pub ignore_missing: bool,
    pub pos: Pos,
}

/// `{% use tpl with a as b %}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseNode {
    pub template: Expr,
    /// `(block, alias)` pairs.
    pub aliases: Vec<(String, String)>,
    pub pos: Pos,
}

/// One `if` / `elseif` arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfBranch {
    pub condition: Expr,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfNode {
    pub branches: Vec<IfBranch>,
    pub else_body: Option<Vec<Node>>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForNode {
    pub key: Option<String>,
    pub value: String,
    pub iterable: Expr,
    pub body: Vec<Node>,
    /// Rendered when the iterable is empty.
    pub else_body: Option<Vec<Node>>,
    pub pos: Pos,
}

/// Right-hand side of a `set` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetValue {
    /// `{% set x = expr %}`
    Expr(Expr),
    /// `{% set x %}…{% endset %}`
    Capture(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetNode {
    pub name: String,
    pub value: SetValue,
    pub pos: Pos,
}

/// `{% do expr %}`: evaluate and discard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoNode {
    pub expr: Expr,
    pub pos: Pos,
}

/// Generic tag for handlers registered outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagNode {
    pub name: String,
    pub args: Vec<Expr>,
    pub body: Vec<Node>,
    pub pos: Pos,
}

impl TagNode {
    #[must_use]
    pub fn new(name: impl Into<String>, pos: Pos) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            body: Vec::new(),
            pos,
        }
    }
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Name {
        name: String,
        pos: Pos,
    },
    /// Number literal, kept as written.
    Number {
        value: String,
        pos: Pos,
    },
    String {
        value: String,
        pos: Pos,
    },
    Bool {
        value: bool,
        pos: Pos,
    },
    Null {
        pos: Pos,
    },
    Array {
        items: Vec<Self>,
        pos: Pos,
    },
    Hash {
        entries: Vec<HashEntry>,
        pos: Pos,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Self>,
        pos: Pos,
    },
    Binary {
        op: BinaryOp,
        left: Box<Self>,
        right: Box<Self>,
        pos: Pos,
    },
    /// `condition ? then : otherwise`
    Conditional {
        condition: Box<Self>,
        then: Box<Self>,
        otherwise: Box<Self>,
        pos: Pos,
    },
    /// Function call `name(args)`.
    Call {
        name: String,
        args: Vec<Self>,
        pos: Pos,
    },
    /// `target.attr` or method call `target.attr(args)`.
    GetAttr {
        target: Box<Self>,
        attr: String,
        args: Option<Vec<Self>>,
        pos: Pos,
    },
    /// `target[key]`
    GetItem {
        target: Box<Self>,
        key: Box<Self>,
        pos: Pos,
    },
    /// `target|name(args)`
    Filter {
        target: Box<Self>,
        name: String,
        args: Vec<Self>,
        pos: Pos,
    },
}

impl Expr {
    #[must_use]
    pub const fn pos(&self) -> Pos {
        match self {
            Self::Name { pos, .. }
            | Self::Number { pos, .. }
            | Self::String { pos, .. }
            | Self::Bool { pos, .. }
            | Self::Null { pos }
            | Self::Array { pos, .. }
            | Self::Hash { pos, .. }
            | Self::Unary { pos, .. }
            | Self::Binary { pos, .. }
            | Self::Conditional { pos, .. }
            | Self::Call { pos, .. }
            | Self::GetAttr { pos, .. }
            | Self::GetItem { pos, .. }
            | Self::Filter { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashEntry {
    pub key: Expr,
    pub value: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

impl UnaryOp {
    /// Match a token that starts a unary expression.
    #[must_use]
    pub fn from_token(token: &Token) -> Option<Self> {
        match (token.kind, token.value.as_str()) {
            (TokenKind::Name, "not") => Some(Self::Not),
            (TokenKind::Operator, "-") => Some(Self::Neg),
            (TokenKind::Operator, "+") => Some(Self::Pos),
            _ => None,
        }
    }

    /// Binding power of the operand.
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Not => 50,
            Self::Neg | Self::Pos => 250,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Not => "not",
            Self::Neg => "-",
            Self::Pos => "+",
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
    Range,
    Add,
    Sub,
    Concat,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinaryOp {
    /// Match an operator token, or a word operator lexed as a name.
    #[must_use]
    pub fn from_token(token: &Token) -> Option<Self> {
        let op = match (token.kind, token.value.as_str()) {
            (TokenKind::Name, "or") => Self::Or,
            (TokenKind::Name, "and") => Self::And,
            (TokenKind::Name, "in") => Self::In,
            (TokenKind::Operator, "==") => Self::Eq,
            (TokenKind::Operator, "!=") => Self::NotEq,
            (TokenKind::Operator, "<") => Self::Lt,
            (TokenKind::Operator, ">") => Self::Gt,
            (TokenKind::Operator, "<=") => Self::LtEq,
            (TokenKind::Operator, ">=") => Self::GtEq,
            (TokenKind::Operator, "..") => Self::Range,
            (TokenKind::Operator, "+") => Self::Add,
            (TokenKind::Operator, "-") => Self::Sub,
            (TokenKind::Operator, "~") => Self::Concat,
            (TokenKind::Operator, "*") => Self::Mul,
            (TokenKind::Operator, "/") => Self::Div,
            (TokenKind::Operator, "//") => Self::FloorDiv,
            (TokenKind::Operator, "%") => Self::Mod,
            (TokenKind::Operator, "**") => Self::Pow,
            _ => return None,
        };
        Some(op)
    }

    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            Self::Or => 10,
            Self::And => 15,
            Self::Eq | Self::NotEq | Self::Lt | Self::Gt | Self::LtEq | Self::GtEq | Self::In => 20,
            Self::Range => 25,
            Self::Add | Self::Sub => 30,
            Self::Concat => 40,
            Self::Mul | Self::Div | Self::FloorDiv | Self::Mod => 60,
            Self::Pow => 200,
        }
    }

    #[must_use]
    pub const fn is_right_associative(self) -> bool {
        matches!(self, Self::Pow)
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "or",
            Self::And => "and",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::In => "in",
            Self::Range => "..",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Concat => "~",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
