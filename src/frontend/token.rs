use std::fmt;

/// A single lexical token of a Cinder source file.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Numeric literal, always lexed as a 64-bit float.
    Number(f64),
    /// Variable, function or struct name.
    Identifier(String),

    /// Comment text, kept so tooling can inspect it. The parser drops these.
    Comment(String),

    ParensOpen,
    ParensClose,
    CurlyOpen,
    CurlyClose,
    Comma,
    Dot,

    /// `=`
    Equals,

    // Comparators
    ComparatorEqual,
    NotEqual,
    ComparatorGreaterThan,
    ComparatorLessThan,
    ComparatorGreaterThanEqual,
    ComparatorLessThanEqual,

    // Boolean operators
    BooleanAnd,
    BooleanOr,
    BooleanNot,

    // Shorthand operators, e.g. `a += 1`
    ShorthandAdd,
    ShorthandSub,
    ShorthandMul,
    ShorthandDiv,
    ShorthandPow,

    // Keywords
    Func,
    While,
    For,
    If,
    Else,
    True,
    False,
    Continue,
    Break,
    Do,
    Times,
    Repeat,
    Return,
    Returns,
    Struct,

    /// Fallback for everything without a dedicated token, including the
    /// arithmetic operators `+ - * / ^`.
    Other(String),
}

impl Token {
    /// Keyword lookup for the lexer.
    pub fn keyword(word: &str) -> Option<Token> {
        let token = match word {
            "func" => Token::Func,
            "while" => Token::While,
            "for" => Token::For,
            "if" => Token::If,
            "else" => Token::Else,
            "true" => Token::True,
            "false" => Token::False,
            "continue" => Token::Continue,
            "break" => Token::Break,
            "do" => Token::Do,
            "times" => Token::Times,
            "repeat" => Token::Repeat,
            "return" => Token::Return,
            "returns" => Token::Returns,
            "struct" => Token::Struct,
            _ => return None,
        };

        Some(token)
    }

    pub fn is_comment(&self) -> bool {
        matches!(self, Token::Comment(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Comment(text) => write!(f, "// {}", text),
            Token::ParensOpen => write!(f, "("),
            Token::ParensClose => write!(f, ")"),
            Token::CurlyOpen => write!(f, "{{"),
            Token::CurlyClose => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Equals => write!(f, "="),
            Token::ComparatorEqual => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::ComparatorGreaterThan => write!(f, ">"),
            Token::ComparatorLessThan => write!(f, "<"),
            Token::ComparatorGreaterThanEqual => write!(f, ">="),
            Token::ComparatorLessThanEqual => write!(f, "<="),
            Token::BooleanAnd => write!(f, "&&"),
            Token::BooleanOr => write!(f, "||"),
            Token::BooleanNot => write!(f, "!"),
            Token::ShorthandAdd => write!(f, "+="),
            Token::ShorthandSub => write!(f, "-="),
            Token::ShorthandMul => write!(f, "*="),
            Token::ShorthandDiv => write!(f, "/="),
            Token::ShorthandPow => write!(f, "^="),
            Token::Func => write!(f, "func"),
            Token::While => write!(f, "while"),
            Token::For => write!(f, "for"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Continue => write!(f, "continue"),
            Token::Break => write!(f, "break"),
            Token::Do => write!(f, "do"),
            Token::Times => write!(f, "times"),
            Token::Repeat => write!(f, "repeat"),
            Token::Return => write!(f, "return"),
            Token::Returns => write!(f, "returns"),
            Token::Struct => write!(f, "struct"),
            Token::Other(s) => write!(f, "{}", s),
        }
    }
}
