use std::fmt;

use crate::bytecode::compile_error::CompileError;
use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::token::Token;
use crate::lang::node::{FunctionPrototype, Node, StructPrototype};

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken { span: Option<Span> },
    ExpectedCharacter { character: String, span: Option<Span> },
    ExpectedExpression { span: Option<Span> },
    ExpectedArgumentList { span: Option<Span> },
    ExpectedFunctionName { span: Option<Span> },
    /// A construct parsed fine but failed the AST shape checks.
    InvalidConstruct(CompileError),
}

impl From<CompileError> for ParseError {
    fn from(error: CompileError) -> Self {
        ParseError::InvalidConstruct(error)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = |span: &Option<Span>| match span {
            Some(span) => format!(" at line {}, column {}", span.line, span.col),
            None => String::new(),
        };

        match self {
            ParseError::UnexpectedToken { span } => {
                write!(f, "unexpected token{}", location(span))
            }
            ParseError::ExpectedCharacter { character, span } => {
                write!(f, "expected '{}'{}", character, location(span))
            }
            ParseError::ExpectedExpression { span } => {
                write!(f, "expected an expression{}", location(span))
            }
            ParseError::ExpectedArgumentList { span } => {
                write!(f, "expected an argument list{}", location(span))
            }
            ParseError::ExpectedFunctionName { span } => {
                write!(f, "expected a function name{}", location(span))
            }
            ParseError::InvalidConstruct(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for ParseError {}

/// Recursive descent parser producing a list of statement nodes.
pub struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        // Comments carry no syntax.
        let tokens = tokens
            .into_iter()
            .filter(|t| !t.token.is_comment())
            .collect();

        Parser { tokens, index: 0 }
    }

    pub fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();

        while self.peek().is_some() {
            nodes.push(self.parse_statement()?);
        }

        Ok(nodes)
    }

    // ============================================================
    // Cursor
    // ============================================================

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|t| &t.token)
    }

    fn current_span(&self) -> Option<Span> {
        self.tokens
            .get(self.index)
            .or_else(|| self.tokens.last())
            .map(|t| t.span.clone())
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|t| t.token.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.peek() == Some(&expected) {
            self.index += 1;
            Ok(())
        } else {
            Err(ParseError::ExpectedCharacter {
                character: expected.to_string(),
                span: self.current_span(),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Identifier(name)) => {
                let name = name.clone();
                self.index += 1;
                Ok(name)
            }
            _ => Err(ParseError::UnexpectedToken {
                span: self.current_span(),
            }),
        }
    }

    // ============================================================
    // Statements
    // ============================================================

    fn parse_statement(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(Token::Func) => self.parse_function(),
            Some(Token::Struct) => self.parse_struct(),
            Some(Token::While) => self.parse_while(),
            Some(Token::Repeat) => self.parse_repeat_while(),
            Some(Token::For) => self.parse_for(),
            Some(Token::Do) => self.parse_do_times(),
            Some(Token::If) => self.parse_if(),
            Some(Token::Return) => self.parse_return(),
            Some(Token::Break) => {
                self.advance();
                Ok(Node::Break)
            }
            Some(Token::Continue) => {
                self.advance();
                Ok(Node::Continue)
            }
            Some(Token::Identifier(_)) => self.parse_identifier_statement(),
            _ => Err(ParseError::UnexpectedToken {
                span: self.current_span(),
            }),
        }
    }

    /// `{ statements }`
    fn parse_body(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::CurlyOpen)?;

        let mut nodes = Vec::new();
        while self.peek() != Some(&Token::CurlyClose) {
            if self.peek().is_none() {
                return Err(ParseError::ExpectedCharacter {
                    character: "}".to_string(),
                    span: self.current_span(),
                });
            }
            nodes.push(self.parse_statement()?);
        }

        self.expect(Token::CurlyClose)?;
        Ok(Node::body(nodes))
    }

    /// A statement starting with an identifier: an assignment, a shorthand
    /// assignment, or a call. Bare expressions are not statements.
    fn parse_identifier_statement(&mut self) -> Result<Node, ParseError> {
        let name = self.expect_identifier()?;

        if self.peek() == Some(&Token::ParensOpen) {
            return self.parse_call(name);
        }

        let target = self.parse_member_chain(Node::Variable(name))?;

        match self.peek() {
            Some(Token::Equals) => {
                self.advance();
                let value = self.parse_expression()?;
                Ok(Node::assignment(target, value)?)
            }

            Some(
                Token::ShorthandAdd
                | Token::ShorthandSub
                | Token::ShorthandMul
                | Token::ShorthandDiv
                | Token::ShorthandPow,
            ) => {
                let op = match self.advance() {
                    Some(Token::ShorthandAdd) => "+",
                    Some(Token::ShorthandSub) => "-",
                    Some(Token::ShorthandMul) => "*",
                    Some(Token::ShorthandDiv) => "/",
                    _ => "^",
                };

                // `a += e` is sugar for `a = a + e`
                let rhs = self.parse_expression()?;
                let value = Node::binary_op(op, target.clone(), Some(rhs))?;
                Ok(Node::assignment(target, value)?)
            }

            _ => Err(ParseError::UnexpectedToken {
                span: self.current_span(),
            }),
        }
    }

    fn parse_member_chain(&mut self, base: Node) -> Result<Node, ParseError> {
        let mut node = base;

        while self.peek() == Some(&Token::Dot) {
            self.advance();
            let member = self.expect_identifier()?;
            node = Node::StructMember {
                base: Box::new(node),
                member,
            };
        }

        Ok(node)
    }

    fn parse_call(&mut self, callee: String) -> Result<Node, ParseError> {
        self.expect(Token::ParensOpen)?;

        let mut arguments = Vec::new();
        if self.peek() != Some(&Token::ParensClose) {
            loop {
                arguments.push(self.parse_expression()?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        self.expect(Token::ParensClose)?;
        Ok(Node::Call { callee, arguments })
    }

    fn parse_function(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Func)?;

        let name = match self.peek() {
            Some(Token::Identifier(_)) => self.expect_identifier()?,
            _ => {
                return Err(ParseError::ExpectedFunctionName {
                    span: self.current_span(),
                });
            }
        };

        if self.peek() != Some(&Token::ParensOpen) {
            return Err(ParseError::ExpectedArgumentList {
                span: self.current_span(),
            });
        }
        self.advance();

        let mut arguments = Vec::new();
        if self.peek() != Some(&Token::ParensClose) {
            loop {
                arguments.push(self.expect_identifier()?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::ParensClose)?;

        let returns = if self.peek() == Some(&Token::Returns) {
            self.advance();
            true
        } else {
            false
        };

        let body = self.parse_body()?;

        Ok(Node::Function {
            prototype: FunctionPrototype {
                name,
                arguments,
                returns,
            },
            body: Box::new(body),
        })
    }

    fn parse_struct(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Struct)?;
        let name = self.expect_identifier()?;
        self.expect(Token::CurlyOpen)?;

        let mut members = Vec::new();
        if self.peek() != Some(&Token::CurlyClose) {
            loop {
                members.push(self.expect_identifier()?);
                if self.peek() == Some(&Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::CurlyClose)?;

        if members.is_empty() {
            return Err(ParseError::UnexpectedToken {
                span: self.current_span(),
            });
        }

        Ok(Node::Struct(StructPrototype { name, members }))
    }

    fn parse_while(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_body()?;
        Ok(Node::while_loop(condition, body)?)
    }

    fn parse_repeat_while(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Repeat)?;
        let body = self.parse_body()?;
        self.expect(Token::While)?;
        let condition = self.parse_expression()?;
        Ok(Node::repeat_while(condition, body)?)
    }

    /// `for i = 0, i < n, i += 1 { }`
    fn parse_for(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::For)?;

        let assignment = self.parse_identifier_statement()?;
        self.expect(Token::Comma)?;
        let condition = self.parse_expression()?;
        self.expect(Token::Comma)?;
        let interval = self.parse_identifier_statement()?;

        let body = self.parse_body()?;
        Ok(Node::for_loop(assignment, condition, interval, body)?)
    }

    fn parse_do_times(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::Do)?;
        let amount = self.parse_expression()?;
        self.expect(Token::Times)?;
        let body = self.parse_body()?;
        Ok(Node::do_times(amount, body)?)
    }

    fn parse_if(&mut self) -> Result<Node, ParseError> {
        self.expect(Token::If)?;
        let condition = self.parse_expression()?;
        let body = self.parse_body()?;

        let else_body = if self.peek() == Some(&Token::Else) {
            self.advance();
            if self.peek() == Some(&Token::If) {
                // `else if` nests as an else body with a single conditional
                Some(Node::body(vec![self.parse_if()?]))
            } else {
                Some(self.parse_body()?)
            }
        } else {
            None
        };

        Ok(Node::conditional(condition, body, else_body)?)
    }

    fn parse_return(&mut self) -> Result<Node, ParseError> {
        let return_line = self.current_span().map(|s| s.line);
        self.expect(Token::Return)?;

        // A value belongs to the return only when it starts on the same
        // line; otherwise it is the next statement.
        let has_value = match (self.peek(), self.current_span()) {
            (Some(token), Some(span)) => {
                Self::starts_expression(token) && Some(span.line) == return_line
            }
            _ => false,
        };

        if has_value {
            let value = self.parse_expression()?;
            Ok(Node::Return(Some(Box::new(value))))
        } else {
            Ok(Node::Return(None))
        }
    }

    fn starts_expression(token: &Token) -> bool {
        matches!(
            token,
            Token::Number(_)
                | Token::Identifier(_)
                | Token::True
                | Token::False
                | Token::ParensOpen
                | Token::BooleanNot
        ) || matches!(token, Token::Other(s) if s == "-")
    }

    // ============================================================
    // Expressions
    // ============================================================

    fn parse_expression(&mut self) -> Result<Node, ParseError> {
        let lhs = self.parse_unary()?;
        self.parse_binary_rhs(0, lhs)
    }

    fn operator_precedence(token: &Token) -> Option<(i32, &'static str)> {
        let entry = match token {
            Token::BooleanOr => (2, "||"),
            Token::BooleanAnd => (4, "&&"),
            Token::ComparatorEqual => (6, "=="),
            Token::NotEqual => (6, "!="),
            Token::ComparatorLessThan => (8, "<"),
            Token::ComparatorGreaterThan => (8, ">"),
            Token::ComparatorLessThanEqual => (8, "<="),
            Token::ComparatorGreaterThanEqual => (8, ">="),
            Token::Other(s) if s == "+" => (20, "+"),
            Token::Other(s) if s == "-" => (20, "-"),
            Token::Other(s) if s == "*" => (40, "*"),
            Token::Other(s) if s == "/" => (40, "/"),
            Token::Other(s) if s == "^" => (60, "^"),
            _ => return None,
        };

        Some(entry)
    }

    fn parse_binary_rhs(&mut self, min_precedence: i32, mut lhs: Node) -> Result<Node, ParseError> {
        while let Some((precedence, op)) = self.peek().and_then(Self::operator_precedence) {
            if precedence < min_precedence {
                break;
            }

            self.advance();

            let rhs = self.parse_unary()?;
            // `^` is right associative, everything else binds left.
            let next_min = if op == "^" { precedence } else { precedence + 1 };
            let rhs = self.parse_binary_rhs(next_min, rhs)?;

            lhs = if op == "&&" || op == "||" {
                Node::boolean_op(op, lhs, Some(rhs))?
            } else {
                Node::binary_op(op, lhs, Some(rhs))?
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(Token::BooleanNot) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::boolean_op("!", operand, None)?)
            }

            // Negation lowers as a subtraction from zero.
            Some(Token::Other(s)) if s == "-" => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Node::binary_op("-", Node::Number(0.0), Some(operand))?)
            }

            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.peek() {
            Some(Token::Number(value)) => {
                let value = *value;
                self.advance();
                Ok(Node::Number(value))
            }

            Some(Token::True) => {
                self.advance();
                Ok(Node::Boolean(true))
            }

            Some(Token::False) => {
                self.advance();
                Ok(Node::Boolean(false))
            }

            Some(Token::ParensOpen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::ParensClose)?;
                Ok(inner)
            }

            Some(Token::Identifier(_)) => {
                let name = self.expect_identifier()?;

                let base = if self.peek() == Some(&Token::ParensOpen) {
                    self.parse_call(name)?
                } else {
                    Node::Variable(name)
                };

                self.parse_member_chain(base)
            }

            _ => Err(ParseError::ExpectedExpression {
                span: self.current_span(),
            }),
        }
    }
}
