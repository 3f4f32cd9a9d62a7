//! Character-level parser for formatter strings.

use super::error::ScriptError;
use super::functions;
use super::syntax::{Argument, FunctionCall, SyntaxTree};
use super::types::Value;

/// Parses a formatter such as `"{title} - {%upper(uploader)}"`.
pub fn parse(text: &str) -> Result<SyntaxTree, ScriptError> {
    Parser::new(text, false).parse_formatter()
}

/// Parses a custom function body, where `$0`, `$1`, ... are allowed.
pub fn parse_function_body(text: &str) -> Result<SyntaxTree, ScriptError> {
    Parser::new(text, true).parse_formatter()
}

/// Lower snake case, starting with a letter.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|ch| ch.is_ascii_lowercase())
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    allow_function_args: bool,
    /// Number of enclosing function-call argument lists.
    call_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, allow_function_args: bool) -> Self {
        Parser {
            source,
            chars: source.chars().collect(),
            pos: 0,
            allow_function_args,
            call_depth: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.source, self.pos, message)
    }

    fn error_at(&self, pos: usize, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.source, pos, message)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ScriptError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(ch) => Err(self.error(format!("expected '{expected}' but found '{ch}'"))),
            None => Err(self.error(format!("expected '{expected}' but reached the end"))),
        }
    }

    fn parse_formatter(mut self) -> Result<SyntaxTree, ScriptError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut expressions = 0usize;

        while let Some(ch) = self.peek() {
            match ch {
                '\\' if matches!(self.peek_at(1), Some('{' | '}')) => {
                    literal.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                }
                '{' => {
                    if !literal.is_empty() {
                        parts.push(Argument::Literal(Value::String(std::mem::take(&mut literal))));
                    }
                    self.pos += 1;
                    self.skip_whitespace();
                    if self.peek() == Some('}') {
                        return Err(self.error("empty expression"));
                    }
                    let start = self.pos;
                    let argument = self.parse_argument()?;
                    if let Argument::Lambda(name) = &argument {
                        return Err(self.error_at(
                            start,
                            format!("lambda %{name} can only be passed as a function argument"),
                        ));
                    }
                    self.expect('}')?;
                    parts.push(argument);
                    expressions += 1;
                }
                '}' => return Err(self.error("unmatched '}', escape it as '\\}'")),
                other => {
                    literal.push(other);
                    self.pos += 1;
                }
            }
        }
        if !literal.is_empty() || parts.is_empty() {
            parts.push(Argument::Literal(Value::String(literal)));
        }
        Ok(SyntaxTree {
            single_expression: parts.len() == 1 && expressions == 1,
            parts,
        })
    }

    fn parse_argument(&mut self) -> Result<Argument, ScriptError> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of expression")),
            Some('%') => self.parse_function(),
            Some('$') => self.parse_function_arg(),
            Some('\'' | '"') => self.parse_string(),
            Some('[') => self.parse_array(),
            Some('{') => self.parse_map(),
            Some('+') => Err(self.error("numbers cannot have a leading '+'")),
            Some(ch) if ch.is_ascii_digit() || ch == '-' => self.parse_number(),
            Some(ch) if ch.is_alphabetic() || ch == '_' => self.parse_identifier(),
            Some(ch) => Err(self.error(format!("unexpected character '{ch}'"))),
        }
    }

    fn parse_value_argument(&mut self) -> Result<Argument, ScriptError> {
        let start = self.pos;
        let argument = self.parse_argument()?;
        if let Argument::Lambda(name) = &argument {
            return Err(self.error_at(
                start,
                format!("lambda %{name} can only be passed as a function argument"),
            ));
        }
        Ok(argument)
    }

    fn read_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&keep) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn is_delimiter(ch: Option<char>) -> bool {
        match ch {
            None => true,
            Some(ch) => ch.is_whitespace() || matches!(ch, ',' | ')' | ']' | '}' | ':'),
        }
    }

    fn parse_number(&mut self) -> Result<Argument, ScriptError> {
        let start = self.pos;
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.pos += 1;
        }
        let whole = self.read_while(|ch| ch.is_ascii_digit());
        if whole.is_empty() {
            return Err(self.error_at(start, "invalid number"));
        }
        text.push_str(&whole);
        let mut is_float = false;
        if self.peek() == Some('.') {
            self.pos += 1;
            let fraction = self.read_while(|ch| ch.is_ascii_digit());
            if fraction.is_empty() {
                return Err(self.error("invalid number, expected digits after '.'"));
            }
            text.push('.');
            text.push_str(&fraction);
            is_float = true;
        }
        if !Self::is_delimiter(self.peek()) {
            return Err(self.error("invalid number"));
        }
        let value = if is_float {
            text.parse::<f64>().map(Value::Float).ok()
        } else {
            text.parse::<i64>().map(Value::Integer).ok()
        };
        value
            .map(Argument::Literal)
            .ok_or_else(|| self.error_at(start, format!("number '{text}' is out of range")))
    }

    fn parse_string(&mut self) -> Result<Argument, ScriptError> {
        let start = self.pos;
        let quote = self.chars[self.pos];
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let delimiter_len = if triple { 3 } else { 1 };
        self.pos += delimiter_len;
        let content_start = self.pos;
        loop {
            match self.peek() {
                None => return Err(self.error_at(start, "unterminated string")),
                Some(ch) if ch == quote => {
                    let closes = !triple
                        || (self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote));
                    if closes {
                        let text: String = self.chars[content_start..self.pos].iter().collect();
                        self.pos += delimiter_len;
                        return Ok(Argument::Literal(Value::String(text)));
                    }
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn parse_array(&mut self) -> Result<Argument, ScriptError> {
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.pos += 1;
            return Ok(Argument::Array(items));
        }
        loop {
            items.push(self.parse_value_argument()?);
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    return Ok(Argument::Array(items));
                }
                _ => return Err(self.error("expected ',' or ']' in array")),
            }
        }
    }

    fn parse_map(&mut self) -> Result<Argument, ScriptError> {
        self.pos += 1;
        let mut pairs = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some('}') {
            self.pos += 1;
            return Ok(Argument::Map(pairs));
        }
        loop {
            self.skip_whitespace();
            let key_start = self.pos;
            let key = self.parse_value_argument()?;
            if let Argument::Array(_) | Argument::Map(_) = key {
                return Err(ScriptError::KeyNotHashable {
                    key: self.chars[key_start..self.pos].iter().collect(),
                });
            }
            self.expect(':')?;
            let value = self.parse_value_argument()?;
            pairs.push((key, value));
            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    return Ok(Argument::Map(pairs));
                }
                _ => return Err(self.error("expected ',' or '}' in map")),
            }
        }
    }

    fn parse_identifier(&mut self) -> Result<Argument, ScriptError> {
        let start = self.pos;
        let name = self.read_while(|ch| ch.is_alphanumeric() || ch == '_');
        match name.as_str() {
            "True" | "False" => {
                if self.call_depth == 0 {
                    return Err(self.error_at(
                        start,
                        "booleans can only be used as function arguments, use %bool(True) instead",
                    ));
                }
                Ok(Argument::Literal(Value::Boolean(name == "True")))
            }
            _ if is_valid_name(&name) => Ok(Argument::Variable(name)),
            _ => Err(self.error_at(
                start,
                format!("invalid variable name '{name}', must be lower snake case"),
            )),
        }
    }

    fn parse_function_arg(&mut self) -> Result<Argument, ScriptError> {
        if !self.allow_function_args {
            return Err(self.error("function arguments ($0, $1, ...) are only allowed in custom function definitions"));
        }
        self.pos += 1;
        let digits = self.read_while(|ch| ch.is_ascii_digit());
        digits
            .parse::<usize>()
            .map(Argument::FunctionArg)
            .map_err(|_| self.error("expected a number after '$'"))
    }

    fn parse_function(&mut self) -> Result<Argument, ScriptError> {
        let start = self.pos;
        self.pos += 1;
        let name = self.read_while(|ch| ch.is_alphanumeric() || ch == '_');
        if !is_valid_name(&name) {
            return Err(self.error_at(start, format!("invalid function name '%{name}'")));
        }
        if self.peek() != Some('(') {
            return Ok(Argument::Lambda(name));
        }
        self.pos += 1;
        self.call_depth += 1;
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.pos += 1;
        } else {
            loop {
                args.push(self.parse_argument()?);
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => self.pos += 1,
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.error(format!("expected ',' or ')' in call to %{name}"))),
                }
            }
        }
        self.call_depth -= 1;
        if let Some(spec) = functions::lookup(&name) {
            spec.check_arguments(&args)?;
        }
        Ok(Argument::Call(FunctionCall { name, args }))
    }
}
