//! Call-argument literals.
//!
//! Probe definitions store their call arguments as a short tuple
//! expression such as `(5,)` or `('orders', 2.5, True)`. Only literal
//! values are accepted: integers, floats, quoted strings, `True`,
//! `False` and `None`, wrapped in `( )` or `[ ]` and separated by
//! commas. Anything else (names, calls, operators, nested groups) is
//! rejected with [`ProbeError::Configuration`].
//!
//! This is a strict subset of Python literal syntax. Values written for
//! a Python-style evaluator may need rewriting:
//!
//! - A one-element parenthesised group needs its trailing comma: `(5,)`.
//! - String escapes are limited to `\\`, `\'`, `\"`, `\n`, `\r`, `\t`
//!   and `\0`. Hex and unicode escapes (`\x41`, `\u00e9`) are rejected;
//!   write the character itself instead.
//! - Adjacent string literals are not concatenated (`'a' 'b'` is an error).
//! - String prefixes (`r''`, `b''`, `f''`), complex numbers and hex or
//!   octal integers are not literals here.

use std::fmt;

use serde::Serialize;

use crate::probe::error::ProbeError;

/// A single typed literal passed positionally to a probe function.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProbeLiteral {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ProbeLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeLiteral::Null => write!(f, "None"),
            ProbeLiteral::Bool(true) => write!(f, "True"),
            ProbeLiteral::Bool(false) => write!(f, "False"),
            ProbeLiteral::Int(value) => write!(f, "{}", value),
            // Debug output always carries a '.' or an exponent.
            ProbeLiteral::Float(value) => write!(f, "{:?}", value),
            ProbeLiteral::Text(value) => {
                write!(f, "'")?;
                for c in value.chars() {
                    match c {
                        '\\' => write!(f, "\\\\")?,
                        '\'' => write!(f, "\\'")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        '\t' => write!(f, "\\t")?,
                        '\0' => write!(f, "\\0")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "'")
            }
        }
    }
}

/// Parse a stored argument expression into an ordered list of literals.
///
/// An empty (or all-whitespace) expression is the empty tuple.
pub fn parse_arguments(expression: &str) -> Result<Vec<ProbeLiteral>, ProbeError> {
    if expression.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut parser = Parser::new(expression);
    let items = parser.parse_sequence()?;
    parser.skip_whitespace();
    if parser.peek().is_some() {
        return Err(parser.error("unexpected input after the closing bracket"));
    }
    Ok(items)
}

/// Render literals back into the expression syntax accepted by
/// [`parse_arguments`].
pub fn format_arguments(arguments: &[ProbeLiteral]) -> String {
    match arguments {
        [] => "()".to_string(),
        [single] => format!("({},)", single),
        many => {
            let parts: Vec<String> = many.iter().map(ToString::to_string).collect();
            format!("({})", parts.join(", "))
        }
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl fmt::Display) -> ProbeError {
        ProbeError::configuration(self.source, format!("{} (at offset {})", message, self.pos))
    }

    fn parse_sequence(&mut self) -> Result<Vec<ProbeLiteral>, ProbeError> {
        self.skip_whitespace();
        let close = match self.bump() {
            Some('(') => ')',
            Some('[') => ']',
            _ => return Err(self.error("expected a tuple such as (1, 'a')")),
        };

        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            self.skip_whitespace();
            if self.peek() == Some(close) {
                self.pos += 1;
                break;
            }

            items.push(self.parse_literal()?);
            trailing_comma = false;

            self.skip_whitespace();
            match self.bump() {
                Some(',') => trailing_comma = true,
                Some(c) if c == close => break,
                Some(c) => return Err(self.error(format!("unexpected {:?}", c))),
                None => return Err(self.error(format!("missing closing {:?}", close))),
            }
        }

        // `(5)` is a parenthesised value, not a tuple.
        if close == ')' && items.len() == 1 && !trailing_comma {
            return Err(self.error("a single argument needs a trailing comma, e.g. (5,)"));
        }

        Ok(items)
    }

    fn parse_literal(&mut self) -> Result<ProbeLiteral, ProbeError> {
        match self.peek() {
            Some(quote @ ('\'' | '"')) => {
                self.pos += 1;
                self.parse_string(quote)
            }
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.parse_keyword(),
            Some(c) => Err(self.error(format!("unexpected {:?}", c))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<ProbeLiteral, ProbeError> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(ProbeLiteral::Text(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('0') => '\0',
                        Some(c @ ('\\' | '\'' | '"')) => c,
                        Some(c) => return Err(self.error(format!("unsupported escape \\{}", c))),
                        None => return Err(self.error("unterminated string")),
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<ProbeLiteral, ProbeError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        let digits = raw.replace('_', "");

        if digits.contains(['.', 'e', 'E']) {
            match digits.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(ProbeLiteral::Float(value)),
                _ => Err(self.error(format!("{} is not a valid number", raw))),
            }
        } else {
            digits
                .parse::<i64>()
                .map(ProbeLiteral::Int)
                .map_err(|_| self.error(format!("{} is not a valid integer", raw)))
        }
    }

    fn parse_keyword(&mut self) -> Result<ProbeLiteral, ProbeError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(ProbeLiteral::Bool(true)),
            "False" => Ok(ProbeLiteral::Bool(false)),
            "None" => Ok(ProbeLiteral::Null),
            _ => Err(self.error(format!("{} is not a literal", word))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_rejected(expression: &str) {
        match parse_arguments(expression) {
            Err(ProbeError::Configuration { expression: e, .. }) => assert_eq!(e, expression),
            other => panic!("expected configuration error for {:?}, got {:?}", expression, other),
        }
    }

    #[test]
    fn empty_expression_is_empty_tuple() {
        assert!(parse_arguments("").unwrap().is_empty());
        assert!(parse_arguments("   ").unwrap().is_empty());
        assert!(parse_arguments("()").unwrap().is_empty());
        assert!(parse_arguments("[ ]").unwrap().is_empty());
    }

    #[test]
    fn single_integer_with_trailing_comma() {
        assert_eq!(parse_arguments("(5,)").unwrap(), vec![ProbeLiteral::Int(5)]);
    }

    #[test]
    fn mixed_literals_keep_their_order() {
        let parsed = parse_arguments("('orders', -3, 2.5, True, False, None)").unwrap();
        assert_eq!(
            parsed,
            vec![
                ProbeLiteral::Text("orders".into()),
                ProbeLiteral::Int(-3),
                ProbeLiteral::Float(2.5),
                ProbeLiteral::Bool(true),
                ProbeLiteral::Bool(false),
                ProbeLiteral::Null,
            ]
        );
    }

    #[test]
    fn list_brackets_and_trailing_comma_are_accepted() {
        assert_eq!(
            parse_arguments("[1, \"two\",]").unwrap(),
            vec![ProbeLiteral::Int(1), ProbeLiteral::Text("two".into())]
        );
        assert_eq!(parse_arguments("[7]").unwrap(), vec![ProbeLiteral::Int(7)]);
    }

    #[test]
    fn exponent_and_underscore_numbers() {
        assert_eq!(
            parse_arguments("(1e3, 1_000, .5)").unwrap(),
            vec![
                ProbeLiteral::Float(1000.0),
                ProbeLiteral::Int(1000),
                ProbeLiteral::Float(0.5),
            ]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            parse_arguments(r"('it\'s', 'a\\b\n',)").unwrap(),
            vec![
                ProbeLiteral::Text("it's".into()),
                ProbeLiteral::Text("a\\b\n".into()),
            ]
        );
    }

    #[test]
    fn parenthesised_value_is_not_a_tuple() {
        assert_rejected("(5)");
    }

    #[test]
    fn non_literals_are_rejected() {
        assert_rejected("(__import__('os'),)");
        assert_rejected("(1 + 2,)");
        assert_rejected("((1, 2),)");
        assert_rejected("5");
        assert_rejected("(true,)");
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert_rejected("(1, 2");
        assert_rejected("('open,)");
        assert_rejected("(1,) extra");
        assert_rejected("(,)");
        assert_rejected("(99999999999999999999,)");
        assert_rejected("(1e999,)");
        assert_rejected("(0x10,)");
    }

    #[test]
    fn python_only_string_forms_are_rejected() {
        assert_rejected(r"('\x41',)");
        assert_rejected(r"('\u00e9',)");
        assert_rejected("('a' 'b',)");
        assert_rejected("(r'raw',)");
        assert_rejected("(b'bytes',)");
    }

    #[test]
    fn format_arguments_uses_tuple_syntax() {
        assert_eq!(format_arguments(&[]), "()");
        assert_eq!(format_arguments(&[ProbeLiteral::Int(5)]), "(5,)");
        assert_eq!(
            format_arguments(&[
                ProbeLiteral::Text("it's".into()),
                ProbeLiteral::Float(2.0),
                ProbeLiteral::Null,
            ]),
            r"('it\'s', 2.0, None)"
        );
    }

    fn literal() -> impl Strategy<Value = ProbeLiteral> {
        prop_oneof![
            Just(ProbeLiteral::Null),
            any::<bool>().prop_map(ProbeLiteral::Bool),
            any::<i64>().prop_map(ProbeLiteral::Int),
            (-1.0e12f64..1.0e12).prop_map(ProbeLiteral::Float),
            "[a-zA-Z0-9 '\"\\\\_,()-]{0,12}".prop_map(ProbeLiteral::Text),
        ]
    }

    proptest! {
        #[test]
        fn formatted_arguments_parse_back(arguments in prop::collection::vec(literal(), 0..6)) {
            let expression = format_arguments(&arguments);
            prop_assert_eq!(parse_arguments(&expression).unwrap(), arguments);
        }
    }
}
