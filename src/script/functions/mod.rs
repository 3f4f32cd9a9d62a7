//! Built-in function table.
//!
//! Each function declares its parameters and output type so calls can be
//! checked when a formatter is parsed, and again against concrete values
//! when it is evaluated.

mod array;
mod assertions;
mod boolean;
mod date;
mod json;
mod logging;
mod map;
mod numeric;
mod pattern;
mod string;

use std::collections::HashMap;
use std::sync::OnceLock;

use super::error::ScriptError;
use super::syntax::Argument;
use super::types::{ScriptMap, TypeSet, Value};

pub(crate) type Evaluate = fn(&mut Call<'_>) -> Result<Value, ScriptError>;

#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    Value(TypeSet),
    /// A function reference applied with this many arguments.
    Lambda(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamKind,
    pub optional: bool,
}

pub(crate) const fn arg(name: &'static str, types: TypeSet) -> Param {
    Param {
        name,
        kind: ParamKind::Value(types),
        optional: false,
    }
}

pub(crate) const fn opt(name: &'static str, types: TypeSet) -> Param {
    Param {
        name,
        kind: ParamKind::Value(types),
        optional: true,
    }
}

pub(crate) const fn lambda(name: &'static str, arity: usize) -> Param {
    Param {
        name,
        kind: ParamKind::Lambda(arity),
        optional: false,
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Output {
    Fixed(TypeSet),
    /// Integer when every operand is an integer, otherwise numeric.
    Arithmetic,
    /// Union of the types of the listed arguments.
    UnionOf(&'static [usize]),
    /// Union of the value positions of an `%elif` chain.
    Conditional,
}

#[derive(Debug)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [Param],
    pub variadic: Option<Param>,
    pub output: Output,
    pub(crate) evaluate: Evaluate,
    /// Pure functions may be constant-folded during partial resolution.
    pub pure: bool,
}

impl FunctionSpec {
    pub(crate) const fn new(
        name: &'static str,
        params: &'static [Param],
        output: Output,
        evaluate: Evaluate,
    ) -> Self {
        FunctionSpec {
            name,
            params,
            variadic: None,
            output,
            evaluate,
            pure: true,
        }
    }

    pub(crate) const fn variadic(self, param: Param) -> Self {
        FunctionSpec {
            variadic: Some(param),
            ..self
        }
    }

    pub(crate) const fn impure(self) -> Self {
        FunctionSpec {
            pure: false,
            ..self
        }
    }

    fn is_conditional_chain(&self) -> bool {
        matches!(self.output, Output::Conditional)
    }

    pub fn min_args(&self) -> usize {
        self.params.iter().filter(|param| !param.optional).count()
    }

    pub fn max_args(&self) -> Option<usize> {
        match self.variadic {
            Some(_) => None,
            None => Some(self.params.len()),
        }
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        if self.is_conditional_chain() {
            return count >= 3 && count % 2 == 1;
        }
        count >= self.min_args() && self.max_args().is_none_or(|max| count <= max)
    }

    pub fn param(&self, index: usize, count: usize) -> Option<&Param> {
        if self.is_conditional_chain() {
            // condition, value, condition, value, ..., default
            let is_condition = index % 2 == 0 && index + 1 < count;
            return Some(if is_condition { &self.params[0] } else { &self.params[1] });
        }
        self.params.get(index).or(self.variadic.as_ref())
    }

    pub fn lambda_arity(&self, index: usize) -> Option<usize> {
        match self.params.get(index).or(self.variadic.as_ref())?.kind {
            ParamKind::Lambda(arity) => Some(arity),
            ParamKind::Value(_) => None,
        }
    }

    pub fn signature(&self) -> String {
        let describe = |param: &Param| {
            let kind = match param.kind {
                ParamKind::Value(types) => types.to_string(),
                ParamKind::Lambda(arity) => format!("Lambda[{arity}]"),
            };
            if param.optional {
                format!("{}: Optional[{kind}]", param.name)
            } else {
                format!("{}: {kind}", param.name)
            }
        };
        let mut params: Vec<String> = self.params.iter().map(describe).collect();
        if let Some(variadic) = &self.variadic {
            params.push(format!("...{}", describe(variadic)));
        }
        format!("%{}({})", self.name, params.join(", "))
    }

    pub fn output_type(&self, args: &[Argument]) -> TypeSet {
        let union = |indices: &mut dyn Iterator<Item = usize>| {
            indices
                .filter_map(|index| args.get(index))
                .fold(TypeSet::NONE, |acc, arg| acc.union(arg.static_type()))
        };
        match self.output {
            Output::Fixed(types) => types,
            Output::UnionOf(indices) => union(&mut indices.iter().copied()),
            Output::Conditional => {
                let last = args.len().saturating_sub(1);
                union(&mut (0..args.len()).filter(|index| index % 2 == 1 || *index == last))
            }
            Output::Arithmetic => {
                let types = args
                    .iter()
                    .fold(TypeSet::NONE, |acc, arg| acc.union(arg.static_type()));
                if types.is_any() {
                    TypeSet::ANY
                } else if types == TypeSet::INTEGER {
                    TypeSet::INTEGER
                } else {
                    TypeSet::NUMERIC
                }
            }
        }
    }

    fn incompatible(&self, received: Vec<String>) -> ScriptError {
        ScriptError::IncompatibleFunctionArguments {
            name: self.name.to_string(),
            expected: self.signature(),
            received: format!("%{}({})", self.name, received.join(", ")),
        }
    }

    /// Parse-time check of a call's arguments against the declared parameters.
    pub(crate) fn check_arguments(&self, args: &[Argument]) -> Result<(), ScriptError> {
        let received = || {
            args.iter()
                .map(|arg| match arg {
                    Argument::Lambda(name) => format!("%{name}"),
                    other => other.static_type().to_string(),
                })
                .collect::<Vec<_>>()
        };
        if !self.accepts_arity(args.len()) {
            return Err(self.incompatible(received()));
        }
        for (index, arg) in args.iter().enumerate() {
            let Some(param) = self.param(index, args.len()) else {
                return Err(self.incompatible(received()));
            };
            let compatible = match (param.kind, arg) {
                (ParamKind::Lambda(arity), Argument::Lambda(name)) => {
                    lookup(name).is_none_or(|spec| spec.accepts_arity(arity))
                }
                (ParamKind::Lambda(_), Argument::FunctionArg(_)) => true,
                (ParamKind::Lambda(_), _) | (ParamKind::Value(_), Argument::Lambda(_)) => false,
                (ParamKind::Value(types), other) => types.accepts(other.static_type()),
            };
            if !compatible {
                return Err(self.incompatible(received()));
            }
        }
        Ok(())
    }

    /// Evaluation-time check against concrete values.
    pub(crate) fn check_values(&self, args: &[CallArg]) -> Result<(), ScriptError> {
        let received = || {
            args.iter()
                .map(|arg| match arg {
                    CallArg::Lambda(name) => format!("%{name}"),
                    CallArg::Value(value) => value.type_name().to_string(),
                })
                .collect::<Vec<_>>()
        };
        if !self.accepts_arity(args.len()) {
            return Err(self.incompatible(received()));
        }
        for (index, arg) in args.iter().enumerate() {
            let compatible = match (self.param(index, args.len()).map(|param| param.kind), arg) {
                (Some(ParamKind::Value(types)), CallArg::Value(value)) => {
                    types.accepts(value.type_set())
                }
                (Some(ParamKind::Lambda(arity)), CallArg::Lambda(name)) => {
                    lookup(name).is_none_or(|spec| spec.accepts_arity(arity))
                }
                _ => false,
            };
            if !compatible {
                return Err(self.incompatible(received()));
            }
        }
        Ok(())
    }
}

fn registry() -> &'static HashMap<&'static str, &'static FunctionSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static FunctionSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        [
            numeric::FUNCTIONS,
            string::FUNCTIONS,
            boolean::FUNCTIONS,
            array::FUNCTIONS,
            map::FUNCTIONS,
            pattern::FUNCTIONS,
            date::FUNCTIONS,
            json::FUNCTIONS,
            logging::FUNCTIONS,
            assertions::FUNCTIONS,
        ]
        .into_iter()
        .flatten()
        .map(|spec| (spec.name, spec))
        .collect()
    })
}

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    registry().get(name).copied()
}

/// Names of every built-in, sorted.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<_> = registry().keys().copied().collect();
    names.sort_unstable();
    names
}

/// An evaluated argument handed to a built-in.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Value(Value),
    Lambda(String),
}

/// Applies a function (built-in or custom) to already evaluated values.
pub(crate) trait Invoke {
    fn invoke(&mut self, function: &str, args: Vec<Value>) -> Result<Value, ScriptError>;
}

/// Arguments of one built-in invocation, with typed accessors.
pub(crate) struct Call<'a> {
    pub(crate) spec: &'static FunctionSpec,
    pub(crate) args: Vec<CallArg>,
    pub(crate) invoker: &'a mut dyn Invoke,
}

impl Call<'_> {
    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::runtime(self.spec.name, message)
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        match self.args.get(index)? {
            CallArg::Value(value) => Some(value),
            CallArg::Lambda(_) => None,
        }
    }

    pub fn value(&self, index: usize) -> Result<&Value, ScriptError> {
        self.get(index)
            .ok_or_else(|| self.error(format!("missing argument {index}")))
    }

    fn mistyped(&self, index: usize, expected: &str) -> ScriptError {
        let received = self.get(index).map_or("nothing", Value::type_name);
        self.error(format!(
            "argument {index} should be {expected}, received {received}"
        ))
    }

    pub fn int(&self, index: usize) -> Result<i64, ScriptError> {
        match self.value(index)? {
            Value::Integer(value) => Ok(*value),
            _ => Err(self.mistyped(index, "Integer")),
        }
    }

    pub fn number(&self, index: usize) -> Result<f64, ScriptError> {
        self.value(index)?
            .as_f64()
            .ok_or_else(|| self.mistyped(index, "Numeric"))
    }

    pub fn str(&self, index: usize) -> Result<&str, ScriptError> {
        self.value(index)?
            .as_str()
            .ok_or_else(|| self.mistyped(index, "String"))
    }

    pub fn boolean(&self, index: usize) -> Result<bool, ScriptError> {
        match self.value(index)? {
            Value::Boolean(value) => Ok(*value),
            _ => Err(self.mistyped(index, "Boolean")),
        }
    }

    pub fn array(&self, index: usize) -> Result<&[Value], ScriptError> {
        match self.value(index)? {
            Value::Array(values) => Ok(values),
            _ => Err(self.mistyped(index, "Array")),
        }
    }

    pub fn map(&self, index: usize) -> Result<&ScriptMap, ScriptError> {
        match self.value(index)? {
            Value::Map(map) => Ok(map),
            _ => Err(self.mistyped(index, "Map")),
        }
    }

    pub fn lambda(&self, index: usize) -> Result<String, ScriptError> {
        match self.args.get(index) {
            Some(CallArg::Lambda(name)) => Ok(name.clone()),
            _ => Err(self.error(format!("argument {index} should be a lambda"))),
        }
    }

    pub fn values_from(&self, start: usize) -> impl Iterator<Item = &Value> {
        self.args.iter().skip(start).filter_map(|arg| match arg {
            CallArg::Value(value) => Some(value),
            CallArg::Lambda(_) => None,
        })
    }

    pub fn apply(&mut self, function: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.invoker.invoke(function, args)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use crate::script::{Script, ScriptError, Value, parse};

    fn run(definitions: &[(&str, &str)], text: &str) -> Result<Value, ScriptError> {
        let mut script = Script::new();
        script.add(definitions.iter().copied())?;
        script.resolve_formatter(&parse(text)?, &BTreeMap::new())
    }

    /// Evaluates a formatter with no variables bound.
    pub(crate) fn eval(text: &str) -> Value {
        eval_with(&[], text)
    }

    /// Evaluates a formatter next to the given custom functions.
    pub(crate) fn eval_with(definitions: &[(&str, &str)], text: &str) -> Value {
        run(definitions, text).unwrap_or_else(|err| panic!("{text}: {err}"))
    }

    pub(crate) fn eval_err(text: &str) -> String {
        match run(&[], text) {
            Ok(value) => panic!("{text} evaluated to {value:?}"),
            Err(err) => err.to_string(),
        }
    }
}
