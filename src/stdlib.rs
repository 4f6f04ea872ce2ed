//! Standard library, written in Cinder itself and compiled ahead of every
//! user program by the runner.

const ARITHMETIC: &str = r#"
func abs(x) returns {
    if x < 0 {
        return -x
    }
    return x
}

func min(a, b) returns {
    if a < b {
        return a
    }
    return b
}

func max(a, b) returns {
    if a > b {
        return a
    }
    return b
}

func clamp(x, lower, upper) returns {
    return min(max(x, lower), upper)
}

func sign(x) returns {
    if x > 0 {
        return 1
    }
    if x < 0 {
        return -1
    }
    return 0
}
"#;

const GEOMETRY: &str = r#"
func rectangleArea(width, height) returns {
    return width * height
}

func triangleArea(base, height) returns {
    return base * height / 2
}

func squareArea(side) returns {
    return side ^ 2
}

func rectanglePerimeter(width, height) returns {
    return 2 * (width + height)
}

func cubeVolume(side) returns {
    return side ^ 3
}
"#;

pub const SOURCES: [&str; 2] = [ARITHMETIC, GEOMETRY];

pub fn full_source() -> String {
    SOURCES.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;
    use crate::frontend::parser::Parser;

    #[test]
    fn test_stdlib_sources_parse() {
        for source in SOURCES {
            let tokens = Lexer::new(source).tokenize().expect("stdlib must lex");
            Parser::new(tokens).parse().expect("stdlib must parse");
        }
    }
}
