//! Parsed form of a formatter string.

use std::collections::BTreeSet;
use std::fmt;

use super::functions;
use super::types::{TypeSet, Value};

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// A constant. Scalars from the source text, or values folded during
    /// partial resolution (which may be arrays or maps).
    Literal(Value),
    Array(Vec<Argument>),
    Map(Vec<(Argument, Argument)>),
    Variable(String),
    Call(FunctionCall),
    /// `%name` passed without parentheses, to be applied by the callee.
    Lambda(String),
    /// `$n` inside a custom function body.
    FunctionArg(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Argument>,
}

impl Argument {
    pub fn is_literal(&self) -> bool {
        matches!(self, Argument::Literal(_))
    }

    /// Output type known before evaluation.
    pub fn static_type(&self) -> TypeSet {
        match self {
            Argument::Literal(value) => value.type_set(),
            Argument::Array(_) => TypeSet::ARRAY,
            Argument::Map(_) => TypeSet::MAP,
            Argument::Call(call) => match functions::lookup(&call.name) {
                Some(spec) => spec.output_type(&call.args),
                None => TypeSet::ANY,
            },
            Argument::Variable(_) | Argument::Lambda(_) | Argument::FunctionArg(_) => {
                TypeSet::ANY
            }
        }
    }

    fn visit<'a>(&'a self, visitor: &mut impl FnMut(&'a Argument)) {
        visitor(self);
        match self {
            Argument::Array(items) => items.iter().for_each(|item| item.visit(visitor)),
            Argument::Map(pairs) => pairs.iter().for_each(|(key, value)| {
                key.visit(visitor);
                value.visit(visitor);
            }),
            Argument::Call(call) => call.args.iter().for_each(|arg| arg.visit(visitor)),
            _ => {}
        }
    }

    /// Replaces `$n` nodes with the supplied argument trees.
    pub fn substitute(&self, args: &[Argument]) -> Argument {
        match self {
            Argument::FunctionArg(index) => args
                .get(*index)
                .cloned()
                .unwrap_or(Argument::FunctionArg(*index)),
            Argument::Array(items) => {
                Argument::Array(items.iter().map(|item| item.substitute(args)).collect())
            }
            Argument::Map(pairs) => Argument::Map(
                pairs
                    .iter()
                    .map(|(key, value)| (key.substitute(args), value.substitute(args)))
                    .collect(),
            ),
            Argument::Call(call) => Argument::Call(FunctionCall {
                name: call.name.clone(),
                args: call.args.iter().map(|arg| arg.substitute(args)).collect(),
            }),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Literal(value) => write_literal(value, f),
            Argument::Array(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Argument::Map(pairs) => {
                f.write_str("{")?;
                for (index, (key, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            Argument::Variable(name) => f.write_str(name),
            Argument::Call(call) => {
                write!(f, "%{}(", call.name)?;
                for (index, arg) in call.args.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Argument::Lambda(name) => write!(f, "%{name}"),
            Argument::FunctionArg(index) => write!(f, "${index}"),
        }
    }
}

fn write_literal(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::String(text) => write_quoted(text, f),
        Value::Integer(number) => write!(f, "{number}"),
        Value::Float(_) => f.write_str(&value.to_display_string()),
        Value::Boolean(flag) => write!(f, "%bool({})", if *flag { "True" } else { "False" }),
        Value::Array(items) => {
            f.write_str("[")?;
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write_literal(item, f)?;
            }
            f.write_str("]")
        }
        Value::Map(map) => {
            f.write_str("{")?;
            for (index, (key, item)) in map.iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write_literal(key, f)?;
                f.write_str(": ")?;
                write_literal(item, f)?;
            }
            f.write_str("}")
        }
    }
}

fn write_quoted(text: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !text.contains('"') {
        write!(f, "\"{text}\"")
    } else if !text.contains('\'') {
        write!(f, "'{text}'")
    } else if !text.contains("'''") && !text.ends_with('\'') {
        write!(f, "'''{text}'''")
    } else {
        write!(f, "\"\"\"{text}\"\"\"")
    }
}

/// A parsed formatter: literal text interleaved with `{expression}` parts.
///
/// A tree made of exactly one expression keeps the expression's type when
/// evaluated; anything else evaluates to the concatenation of each part's
/// string form.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxTree {
    pub(crate) parts: Vec<Argument>,
    /// Whether the single part came from an `{expression}` rather than text.
    pub(crate) single_expression: bool,
}

impl SyntaxTree {
    pub fn from_value(value: Value) -> Self {
        let single_expression = !matches!(value, Value::String(_));
        SyntaxTree {
            parts: vec![Argument::Literal(value)],
            single_expression,
        }
    }

    pub(crate) fn from_parts(parts: Vec<Argument>) -> Self {
        let single_expression =
            parts.len() == 1 && !matches!(parts[0], Argument::Literal(Value::String(_)));
        SyntaxTree {
            parts,
            single_expression,
        }
    }

    pub fn parts(&self) -> &[Argument] {
        &self.parts
    }

    /// The constant this tree evaluates to, if it contains no variables or calls.
    pub fn as_literal(&self) -> Option<Value> {
        match self.parts.as_slice() {
            [Argument::Literal(value)] => Some(value.clone()),
            parts if parts.iter().all(Argument::is_literal) => {
                let mut out = String::new();
                for part in parts {
                    if let Argument::Literal(value) = part {
                        out.push_str(&value.to_display_string());
                    }
                }
                Some(Value::String(out))
            }
            _ => None,
        }
    }

    pub fn static_type(&self) -> TypeSet {
        match self.parts.as_slice() {
            [single] => single.static_type(),
            _ => TypeSet::STRING,
        }
    }

    fn visit<'a>(&'a self, mut visitor: impl FnMut(&'a Argument)) {
        for part in &self.parts {
            part.visit(&mut visitor);
        }
    }

    /// Variables referenced directly by this tree.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(|arg| {
            if let Argument::Variable(name) = arg {
                names.insert(name.clone());
            }
        });
        names
    }

    /// Custom (non built-in) functions called or passed as lambdas.
    pub fn custom_functions(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.visit(|arg| match arg {
            Argument::Call(call) if functions::lookup(&call.name).is_none() => {
                names.insert(call.name.clone());
            }
            Argument::Lambda(name) if functions::lookup(name).is_none() => {
                names.insert(name.clone());
            }
            _ => {}
        });
        names
    }

    /// Every custom function call with its argument count.
    pub(crate) fn custom_calls(&self) -> Vec<(String, usize)> {
        let mut calls = Vec::new();
        self.visit(|arg| {
            if let Argument::Call(call) = arg
                && functions::lookup(&call.name).is_none()
            {
                calls.push((call.name.clone(), call.args.len()));
            }
        });
        calls
    }

    /// Lambdas naming a custom function, paired with the arity the receiving
    /// built-in will apply them with.
    pub(crate) fn custom_lambdas(&self) -> Vec<(String, String, usize)> {
        let mut lambdas = Vec::new();
        self.visit(|arg| {
            if let Argument::Call(call) = arg
                && let Some(spec) = functions::lookup(&call.name)
            {
                for (index, inner) in call.args.iter().enumerate() {
                    if let Argument::Lambda(name) = inner
                        && functions::lookup(name).is_none()
                        && let Some(arity) = spec.lambda_arity(index)
                    {
                        lambdas.push((call.name.clone(), name.clone(), arity));
                    }
                }
            }
        });
        lambdas
    }

    pub(crate) fn max_function_arg(&self) -> Option<usize> {
        let mut max = None;
        self.visit(|arg| {
            if let Argument::FunctionArg(index) = arg {
                max = Some(max.map_or(*index, |current: usize| current.max(*index)));
            }
        });
        max
    }

    pub(crate) fn function_args(&self) -> BTreeSet<usize> {
        let mut indices = BTreeSet::new();
        self.visit(|arg| {
            if let Argument::FunctionArg(index) = arg {
                indices.insert(*index);
            }
        });
        indices
    }

    pub(crate) fn substitute(&self, args: &[Argument]) -> SyntaxTree {
        SyntaxTree {
            parts: self.parts.iter().map(|part| part.substitute(args)).collect(),
            single_expression: self.single_expression,
        }
    }
}

impl fmt::Display for SyntaxTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                Argument::Literal(Value::String(text)) if !self.single_expression => {
                    f.write_str(&text.replace('{', "\\{").replace('}', "\\}"))?
                }
                expression => write!(f, "{{{expression}}}")?,
            }
        }
        Ok(())
    }
}
