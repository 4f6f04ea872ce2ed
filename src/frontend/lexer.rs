use crate::frontend::token::Token;

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Byte offsets into the original source.
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexerError {}

/// Hand-rolled scanner for Cinder source text.
///
/// Whitespace is dropped; comments are kept as tokens so `--tokens` output
/// can show them. The arithmetic operators `+ - * / ^` are emitted as
/// `Token::Other`, which is also the fallback for unknown characters.
pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn error(&self, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            line: self.line,
            col: self.col,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();

            let Some(ch) = self.current() else {
                break;
            };

            let start = self.pos;
            let line = self.line;
            let col = self.col;

            let token = if ch == '/' && self.peek() == Some('/') {
                self.read_line_comment()
            } else if ch == '/' && self.peek() == Some('*') {
                self.read_block_comment()?
            } else if ch.is_ascii_digit() || (ch == '.' && self.peek().is_some_and(|c| c.is_ascii_digit())) {
                self.read_number()?
            } else if ch.is_alphabetic() || ch == '_' {
                self.read_word()
            } else {
                self.read_operator(ch)
            };

            tokens.push(Spanned {
                token,
                span: Span {
                    start,
                    end: self.pos,
                    line,
                    col,
                },
            });
        }

        Ok(tokens)
    }

    fn read_line_comment(&mut self) -> Token {
        self.advance();
        self.advance();

        let mut text = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.advance();
        }

        Token::Comment(text.trim().to_string())
    }

    fn read_block_comment(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance();
        self.advance();

        let mut text = String::new();
        loop {
            match self.current() {
                Some('*') if self.peek() == Some('/') => {
                    self.advance();
                    self.advance();
                    return Ok(Token::Comment(text.trim().to_string()));
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
                None => {
                    return Err(LexerError {
                        message: "unterminated block comment".to_string(),
                        line: start_line,
                        col: start_col,
                    });
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let mut text = String::new();

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() || ch == '.' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        // Exponent notation: 3e2, 3.0e-1
        if self.current() == Some('e') {
            let exponent_start = match self.peek() {
                Some(c) if c.is_ascii_digit() => true,
                Some('-') | Some('+') => self.peek_at(2).is_some_and(|c| c.is_ascii_digit()),
                _ => false,
            };

            if exponent_start {
                text.push('e');
                self.advance();
                if let Some(sign @ ('-' | '+')) = self.current() {
                    text.push(sign);
                    self.advance();
                }
                while let Some(ch) = self.current() {
                    if ch.is_ascii_digit() {
                        text.push(ch);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        match text.parse::<f64>() {
            Ok(value) => Ok(Token::Number(value)),
            Err(_) => Err(self.error(format!("invalid number literal: {}", text))),
        }
    }

    fn read_word(&mut self) -> Token {
        let mut word = String::new();

        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match Token::keyword(&word) {
            Some(token) => token,
            None => Token::Identifier(word),
        }
    }

    fn read_operator(&mut self, ch: char) -> Token {
        // Two-character operators first
        if let Some(next) = self.peek() {
            let token = match (ch, next) {
                ('=', '=') => Some(Token::ComparatorEqual),
                ('!', '=') => Some(Token::NotEqual),
                ('&', '&') => Some(Token::BooleanAnd),
                ('|', '|') => Some(Token::BooleanOr),
                ('>', '=') => Some(Token::ComparatorGreaterThanEqual),
                ('<', '=') => Some(Token::ComparatorLessThanEqual),
                ('+', '=') => Some(Token::ShorthandAdd),
                ('-', '=') => Some(Token::ShorthandSub),
                ('*', '=') => Some(Token::ShorthandMul),
                ('/', '=') => Some(Token::ShorthandDiv),
                ('^', '=') => Some(Token::ShorthandPow),
                _ => None,
            };

            if let Some(token) = token {
                self.advance();
                self.advance();
                return token;
            }
        }

        self.advance();

        match ch {
            '(' => Token::ParensOpen,
            ')' => Token::ParensClose,
            '{' => Token::CurlyOpen,
            '}' => Token::CurlyClose,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '=' => Token::Equals,
            '!' => Token::BooleanNot,
            '>' => Token::ComparatorGreaterThan,
            '<' => Token::ComparatorLessThan,
            _ => Token::Other(ch.to_string()),
        }
    }
}
