//! Expression grammar, by precedence climbing over [`BinaryOp`].

use crate::Error;
use crate::ast::{BinaryOp, Expr, HashEntry, UnaryOp};
use crate::parser::{Parser, unexpected_token, unexpected_value};
use crate::token::{Pos, Token, TokenKind};

const PRIMARY_START: [TokenKind; 6] = [
    TokenKind::Name,
    TokenKind::Number,
    TokenKind::StringOpen,
    TokenKind::ParensOpen,
    TokenKind::ArrayOpen,
    TokenKind::HashOpen,
];

impl Parser<'_> {
    /// Parse one full expression, conditional included.
    pub fn parse_expr(&mut self) -> Result<Expr, Error> {
        let expr = self.parse_binary(0)?;
        self.parse_conditional(expr)
    }

    fn parse_conditional(&mut self, condition: Expr) -> Result<Expr, Error> {
        if self.accept(TokenKind::Punctuation, "?").is_none() {
            return Ok(condition);
        }
        let then = self.parse_expr()?;
        self.expect_value(TokenKind::Punctuation, ":")?;
        let otherwise = self.parse_expr()?;
        Ok(Expr::Conditional {
            pos: condition.pos(),
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, Error> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.peek_non_space();
            let Some(op) = BinaryOp::from_token(&token) else {
                break;
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.next_non_space();
            let next_min = if op.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let right = self.parse_binary(next_min)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos: token.pos,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        let token = self.peek_non_space();
        if let Some(op) = UnaryOp::from_token(&token) {
            self.next_non_space();
            let operand = self.parse_binary(op.precedence())?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
                pos: token.pos,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            let token = self.peek_non_space();
            expr = match token.kind {
                TokenKind::Punctuation if token.value == "." => {
                    self.next_non_space();
                    let attr = self.expect(&[TokenKind::Name, TokenKind::Number])?;
                    let args = if self.peek_non_space().kind == TokenKind::ParensOpen {
                        Some(self.parse_arguments()?)
                    } else {
                        None
                    };
                    Expr::GetAttr {
                        target: Box::new(expr),
                        attr: attr.value,
                        args,
                        pos: token.pos,
                    }
                }
                TokenKind::ArrayOpen => {
                    self.next_non_space();
                    let key = self.parse_expr()?;
                    self.expect(&[TokenKind::ArrayClose])?;
                    Expr::GetItem {
                        target: Box::new(expr),
                        key: Box::new(key),
                        pos: token.pos,
                    }
                }
                TokenKind::Punctuation if token.value == "|" => {
                    self.next_non_space();
                    let name = self.expect(&[TokenKind::Name])?;
                    let args = if self.peek_non_space().kind == TokenKind::ParensOpen {
                        self.parse_arguments()?
                    } else {
                        Vec::new()
                    };
                    Expr::Filter {
                        target: Box::new(expr),
                        name: name.value,
                        args,
                        pos: token.pos,
                    }
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let token = self.next_non_space();
        let pos = token.pos;
        match token.kind {
            TokenKind::Number => Ok(self.parse_number(token)),
            TokenKind::Name => match token.value.as_str() {
                "true" => Ok(Expr::Bool { value: true, pos }),
                "false" => Ok(Expr::Bool { value: false, pos }),
                "null" | "none" => Ok(Expr::Null { pos }),
                _ if self.peek_non_space().kind == TokenKind::ParensOpen => {
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call {
                        name: token.value,
                        args,
                        pos,
                    })
                }
                _ => Ok(Expr::Name {
                    name: token.value,
                    pos,
                }),
            },
            TokenKind::StringOpen => self.parse_string(pos),
            TokenKind::ParensOpen => {
                let inner = self.parse_expr()?;
                self.expect(&[TokenKind::ParensClose])?;
                Ok(inner)
            }
            TokenKind::ArrayOpen => {
                let items = self.parse_sequence(TokenKind::ArrayClose)?;
                Ok(Expr::Array { items, pos })
            }
            TokenKind::HashOpen => self.parse_hash(pos),
            _ => Err(unexpected_token(token, &PRIMARY_START)),
        }
    }

    /// Join `1`, `.`, `5` into `1.5` when the three tokens touch.
    fn parse_number(&mut self, int: Token) -> Expr {
        let end = int.pos.offset() + int.value.len();
        let dot = self.next();
        if dot.is(TokenKind::Punctuation, ".") && dot.pos.offset() == end {
            let fraction = self.next();
            if fraction.kind == TokenKind::Number && fraction.pos.offset() == end + 1 {
                return Expr::Number {
                    value: format!("{}.{}", int.value, fraction.value),
                    pos: int.pos,
                };
            }
            self.backup();
        }
        self.backup();
        Expr::Number {
            value: int.value,
            pos: int.pos,
        }
    }

    /// Rest of a string literal after its opening quote.
    fn parse_string(&mut self, pos: Pos) -> Result<Expr, Error> {
        let text = self.expect(&[TokenKind::Text])?;
        self.expect(&[TokenKind::StringClose])?;
        Ok(Expr::String {
            value: text.value,
            pos,
        })
    }

    /// Parenthesized, comma-separated argument list.
    pub fn parse_arguments(&mut self) -> Result<Vec<Expr>, Error> {
        self.expect(&[TokenKind::ParensOpen])?;
        self.parse_sequence(TokenKind::ParensClose)
    }

    /// Comma-separated expressions up to `close`; a trailing comma is
    /// allowed.
    fn parse_sequence(&mut self, close: TokenKind) -> Result<Vec<Expr>, Error> {
        let mut items = Vec::new();
        loop {
            if self.accept_kind(close).is_some() {
                return Ok(items);
            }
            items.push(self.parse_expr()?);
            let token = self.next_non_space();
            match token.kind {
                kind if kind == close => return Ok(items),
                TokenKind::Punctuation if token.value == "," => {}
                TokenKind::Punctuation => return Err(unexpected_value(token, ",")),
                _ => return Err(unexpected_token(token, &[TokenKind::Punctuation, close])),
            }
        }
    }

    fn parse_hash(&mut self, pos: Pos) -> Result<Expr, Error> {
        let mut entries = Vec::new();
        loop {
            if self.accept_kind(TokenKind::HashClose).is_some() {
                break;
            }
            let key = self.parse_hash_key()?;
            self.expect_value(TokenKind::Punctuation, ":")?;
            let value = self.parse_expr()?;
            entries.push(HashEntry { key, value });

            let token = self.next_non_space();
            match token.kind {
                TokenKind::HashClose => break,
                TokenKind::Punctuation if token.value == "," => {}
                TokenKind::Punctuation => return Err(unexpected_value(token, ",")),
                _ => {
                    return Err(unexpected_token(
                        token,
                        &[TokenKind::Punctuation, TokenKind::HashClose],
                    ));
                }
            }
        }
        Ok(Expr::Hash { entries, pos })
    }

    /// Bare names as keys are string keys.
    fn parse_hash_key(&mut self) -> Result<Expr, Error> {
        let token = self.next_non_space();
        match token.kind {
            TokenKind::Name => Ok(Expr::String {
                value: token.value,
                pos: token.pos,
            }),
            TokenKind::Number => Ok(self.parse_number(token)),
            TokenKind::StringOpen => self.parse_string(token.pos),
            TokenKind::ParensOpen => {
                let key = self.parse_expr()?;
                self.expect(&[TokenKind::ParensClose])?;
                Ok(key)
            }
            _ => Err(unexpected_token(
                token,
                &[
                    TokenKind::Name,
                    TokenKind::Number,
                    TokenKind::StringOpen,
                    TokenKind::ParensOpen,
                ],
            )),
        }
    }
}
