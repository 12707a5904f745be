//! Parser: token stream to AST.
//!
//! A Pratt parser: each expression parse starts from a prefix rule for the
//! current token and then folds infix/call/index rules while the next
//! token binds tighter than the enclosing context. Errors are collected so
//! one bad statement does not hide the rest; the parser resynchronizes at
//! the next `;`.

use crate::Error;
use crate::ast::{
    BlockStatement, Expression, InfixOp, PrefixOp, Program, Statement,
};
use crate::lexer::tokenize;
use crate::token::{Token, TokenKind};

/// Binding strength, weakest first. The discriminant order is the
/// precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,      // == !=
    LessGreater, // < >
    Sum,         // + -
    Product,     // * /
    Prefix,      // -x !x
    Call,        // f(x)
    Index,       // a[0]
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Precedence::Product,
        TokenKind::LParen => Precedence::Call,
        TokenKind::LBracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

/// Parse source text into a program. Convenience over `Parser::new`.
pub fn parse(source: &str) -> Result<Program, Error> {
    Parser::new(tokenize(source)).parse()
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> Result<Program, Error> {
        let mut statements = Vec::new();
        let mut errors = Vec::new();

        while self.cur_kind() != TokenKind::Eof {
            let pos_before = self.pos;
            match self.parse_statement() {
                Ok(statement) => statements.push(statement),
                Err(message) => {
                    errors.push(message);
                    self.synchronize();
                }
            }
            // Guarantee progress so an unrecognised token cannot loop forever
            if self.pos == pos_before {
                self.advance();
            }
        }

        if errors.is_empty() {
            Ok(Program { statements })
        } else {
            Err(Error::Parse(errors))
        }
    }

    // ─── Cursor helpers ──────────────────────────────────────────────────

    fn cur(&self) -> &Token {
        // tokenize always appends Eof, so the clamp can only ever land on it
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn cur_kind(&self) -> TokenKind {
        self.cur().kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    /// Consume the current token if it has the wanted kind, error otherwise.
    fn expect(&mut self, kind: TokenKind) -> Result<Token, String> {
        if self.cur_kind() == kind {
            let token = self.cur().clone();
            self.advance();
            Ok(token)
        } else {
            Err(format!(
                "expected next token to be {:?}, got '{}' instead",
                kind,
                self.cur().literal
            ))
        }
    }

    /// Skip ahead to just past the next `;` (or stop at EOF) after an error.
    fn synchronize(&mut self) {
        while self.cur_kind() != TokenKind::Eof {
            if self.cur_kind() == TokenKind::Semicolon {
                self.advance();
                return;
            }
            self.advance();
        }
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Statement, String> {
        match self.cur_kind() {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> Result<Statement, String> {
        self.expect(TokenKind::Let)?;
        let name = self.expect(TokenKind::Ident)?.literal;
        self.expect(TokenKind::Assign)?;
        let mut value = self.parse_expression(Precedence::Lowest)?;

        // Bind the variable name to a directly-assigned function literal so
        // the compiler can resolve recursive references to it.
        if let Expression::Function {
            name: fn_name, ..
        } = &mut value
            && fn_name.is_empty()
        {
            *fn_name = name.clone();
        }

        if self.cur_kind() == TokenKind::Semicolon {
            self.advance();
        }
        Ok(Statement::Let { name, value })
    }

    fn parse_return_statement(&mut self) -> Result<Statement, String> {
        self.expect(TokenKind::Return)?;
        let value = self.parse_expression(Precedence::Lowest)?;
        if self.cur_kind() == TokenKind::Semicolon {
            self.advance();
        }
        Ok(Statement::Return(value))
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, String> {
        let expr = self.parse_expression(Precedence::Lowest)?;
        if self.cur_kind() == TokenKind::Semicolon {
            self.advance();
        }
        Ok(Statement::Expression(expr))
    }

    fn parse_block_statement(&mut self) -> Result<BlockStatement, String> {
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while self.cur_kind() != TokenKind::RBrace && self.cur_kind() != TokenKind::Eof {
            statements.push(self.parse_statement()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(BlockStatement { statements })
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    fn parse_expression(&mut self, precedence: Precedence) -> Result<Expression, String> {
        let mut left = self.parse_prefix()?;

        while self.cur_kind() != TokenKind::Semicolon
            && precedence < precedence_of(self.cur_kind())
        {
            left = self.parse_infix(left)?;
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, String> {
        match self.cur_kind() {
            TokenKind::Ident => {
                let name = self.cur().literal.clone();
                self.advance();
                Ok(Expression::Identifier(name))
            }
            TokenKind::Int => {
                let literal = self.cur().literal.clone();
                self.advance();
                let value: i64 = literal
                    .parse()
                    .map_err(|_| format!("could not parse '{literal}' as integer"))?;
                Ok(Expression::Integer(value))
            }
            TokenKind::Str => {
                let value = self.cur().literal.clone();
                self.advance();
                Ok(Expression::Str(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::Boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::Boolean(false))
            }
            TokenKind::Bang => {
                self.advance();
                let right = self.parse_expression(Precedence::Prefix)?;
                Ok(Expression::Prefix {
                    op: PrefixOp::Bang,
                    right: Box::new(right),
                })
            }
            TokenKind::Minus => {
                self.advance();
                let right = self.parse_expression(Precedence::Prefix)?;
                Ok(Expression::Prefix {
                    op: PrefixOp::Minus,
                    right: Box::new(right),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Function => self.parse_function_literal(),
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_expression_list(TokenKind::RBracket)?;
                Ok(Expression::Array(elements))
            }
            TokenKind::LBrace => self.parse_hash_literal(),
            _ => Err(format!(
                "no expression can start with '{}'",
                self.cur().literal
            )),
        }
    }

    fn parse_if_expression(&mut self) -> Result<Expression, String> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect(TokenKind::RParen)?;
        let consequence = self.parse_block_statement()?;

        let alternative = if self.cur_kind() == TokenKind::Else {
            self.advance();
            Some(self.parse_block_statement()?)
        } else {
            None
        };

        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_function_literal(&mut self) -> Result<Expression, String> {
        self.expect(TokenKind::Function)?;
        self.expect(TokenKind::LParen)?;

        let mut parameters = Vec::new();
        if self.cur_kind() != TokenKind::RParen {
            parameters.push(self.expect(TokenKind::Ident)?.literal);
            while self.cur_kind() == TokenKind::Comma {
                self.advance();
                parameters.push(self.expect(TokenKind::Ident)?.literal);
            }
        }
        self.expect(TokenKind::RParen)?;

        let body = self.parse_block_statement()?;
        Ok(Expression::Function {
            parameters,
            body,
            name: String::new(),
        })
    }

    fn parse_hash_literal(&mut self) -> Result<Expression, String> {
        self.expect(TokenKind::LBrace)?;
        let mut pairs = Vec::new();

        while self.cur_kind() != TokenKind::RBrace {
            let key = self.parse_expression(Precedence::Lowest)?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expression(Precedence::Lowest)?;
            pairs.push((key, value));

            if self.cur_kind() != TokenKind::RBrace {
                self.expect(TokenKind::Comma)?;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expression::Hash(pairs))
    }

    /// Parse a comma-separated expression list up to (and consuming) `end`.
    fn parse_expression_list(&mut self, end: TokenKind) -> Result<Vec<Expression>, String> {
        let mut list = Vec::new();
        if self.cur_kind() != end {
            list.push(self.parse_expression(Precedence::Lowest)?);
            while self.cur_kind() == TokenKind::Comma {
                self.advance();
                list.push(self.parse_expression(Precedence::Lowest)?);
            }
        }
        self.expect(end)?;
        Ok(list)
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression, String> {
        match self.cur_kind() {
            TokenKind::LParen => {
                self.advance();
                let arguments = self.parse_expression_list(TokenKind::RParen)?;
                Ok(Expression::Call {
                    function: Box::new(left),
                    arguments,
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect(TokenKind::RBracket)?;
                Ok(Expression::Index {
                    left: Box::new(left),
                    index: Box::new(index),
                })
            }
            kind => {
                let op = match kind {
                    TokenKind::Plus => InfixOp::Add,
                    TokenKind::Minus => InfixOp::Sub,
                    TokenKind::Asterisk => InfixOp::Mul,
                    TokenKind::Slash => InfixOp::Div,
                    TokenKind::Lt => InfixOp::Lt,
                    TokenKind::Gt => InfixOp::Gt,
                    TokenKind::Eq => InfixOp::Eq,
                    TokenKind::NotEq => InfixOp::NotEq,
                    _ => {
                        return Err(format!(
                            "'{}' is not an infix operator",
                            self.cur().literal
                        ));
                    }
                };
                let precedence = precedence_of(kind);
                self.advance();
                let right = self.parse_expression(precedence)?;
                Ok(Expression::Infix {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }
}
