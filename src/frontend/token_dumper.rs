use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints a nicer value for some tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        for s in tokens {
            self.print_one(s);
        }
    }

    fn print_one(&self, s: &Spanned) {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            println!(
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                line, col, colr, kind, s.token, reset
            );
        } else {
            // Pretty: show comments and operators as they appear in source
            match &s.token {
                Token::Comment(c) => {
                    println!(
                        "[{:02}:{:02}] {}{:<8} COMMENT: {}{}",
                        line, col, colr, kind, c, reset
                    );
                }
                _ => {
                    println!(
                        "[{:02}:{:02}] {}{:<8} {}{}",
                        line, col, colr, kind, s.token, reset
                    );
                }
            }
        }
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) => "COMMENT",

            // literals
            Number(_) => "NUMBER",
            True | False => "BOOL",

            // names
            Identifier(_) => "IDENT",

            // structure
            ParensOpen | ParensClose => "PAREN",
            CurlyOpen | CurlyClose => "BRACE",
            Comma | Dot => "PUNCT",

            // ops / comparisons
            Equals | ShorthandAdd | ShorthandSub | ShorthandMul | ShorthandDiv | ShorthandPow => {
                "ASSIGN"
            }
            ComparatorEqual | NotEqual | ComparatorGreaterThan | ComparatorLessThan
            | ComparatorGreaterThanEqual | ComparatorLessThanEqual => "CMP",
            BooleanAnd | BooleanOr | BooleanNot => "BOOL_OP",
            Other(_) => "OP",

            // everything else = keyword
            _ => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Comment(_) => Self::DIM,
            Number(_) | True | False => Self::CYN,
            Identifier(_) => Self::YEL,
            Equals | ShorthandAdd | ShorthandSub | ShorthandMul | ShorthandDiv | ShorthandPow
            | ComparatorEqual | NotEqual | ComparatorGreaterThan | ComparatorLessThan
            | ComparatorGreaterThanEqual | ComparatorLessThanEqual | BooleanAnd | BooleanOr
            | BooleanNot | Other(_) => Self::MAG,
            _ => Self::RESET,
        }
    }
}
