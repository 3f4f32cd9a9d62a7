//! Tree evaluation and partial reduction.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::ScriptError;
use super::functions::{self, Call, CallArg, Invoke};
use super::syntax::{Argument, FunctionCall, SyntaxTree};
use super::types::{ScriptMap, Value};

/// Source of variable values and custom function bodies during evaluation.
pub(crate) trait Environment {
    fn variable(&mut self, name: &str) -> Result<Value, ScriptError>;
    fn function(&self, name: &str) -> Option<Arc<SyntaxTree>>;
}

/// Looks variables up in a fixed map only.
pub(crate) struct ValuesEnv<'a> {
    pub values: &'a BTreeMap<String, Value>,
    pub functions: &'a BTreeMap<String, Arc<SyntaxTree>>,
}

impl Environment for ValuesEnv<'_> {
    fn variable(&mut self, name: &str) -> Result<Value, ScriptError> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::VariableDoesNotExist {
                name: name.to_string(),
            })
    }

    fn function(&self, name: &str) -> Option<Arc<SyntaxTree>> {
        self.functions.get(name).cloned()
    }
}

pub(crate) fn function_arity(body: &SyntaxTree) -> usize {
    body.max_function_arg().map_or(0, |max| max + 1)
}

pub(crate) struct Evaluator<'e> {
    env: &'e mut dyn Environment,
}

impl<'e> Evaluator<'e> {
    pub fn new(env: &'e mut dyn Environment) -> Self {
        Evaluator { env }
    }

    pub fn tree(&mut self, tree: &SyntaxTree) -> Result<Value, ScriptError> {
        match tree.parts.as_slice() {
            [single] => self.eval(single),
            parts => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.eval(part)?.to_display_string());
                }
                Ok(Value::String(out))
            }
        }
    }

    pub fn eval(&mut self, argument: &Argument) -> Result<Value, ScriptError> {
        match argument {
            Argument::Literal(value) => Ok(value.clone()),
            Argument::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Argument::Map(pairs) => {
                let mut map = ScriptMap::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    map.insert(key, value)?;
                }
                Ok(Value::Map(map))
            }
            Argument::Variable(name) => self.env.variable(name),
            Argument::Call(call) => self.call(call),
            Argument::Lambda(name) => Err(ScriptError::runtime(
                name,
                "a lambda can only be passed as a function argument",
            )),
            Argument::FunctionArg(index) => Err(ScriptError::runtime(
                "custom function",
                format!("argument ${index} was not supplied"),
            )),
        }
    }

    fn condition(&mut self, call: &FunctionCall, index: usize) -> Result<bool, ScriptError> {
        match self.eval(&call.args[index])? {
            Value::Boolean(flag) => Ok(flag),
            other => Err(ScriptError::IncompatibleFunctionArguments {
                name: call.name.clone(),
                expected: functions::lookup(&call.name)
                    .map(|spec| spec.signature())
                    .unwrap_or_default(),
                received: format!("%{}({}, ...)", call.name, other.type_name()),
            }),
        }
    }

    fn call(&mut self, call: &FunctionCall) -> Result<Value, ScriptError> {
        let Some(spec) = functions::lookup(&call.name) else {
            return self.custom(call);
        };
        if !spec.accepts_arity(call.args.len()) {
            return Err(ScriptError::IncompatibleFunctionArguments {
                name: call.name.clone(),
                expected: spec.signature(),
                received: format!("{} arguments", call.args.len()),
            });
        }
        // Only the taken branch of a conditional is evaluated.
        match spec.name {
            "if" => {
                let branch = if self.condition(call, 0)? { 1 } else { 2 };
                return self.eval(&call.args[branch]);
            }
            "elif" => {
                let last = call.args.len() - 1;
                let mut index = 0;
                while index < last {
                    if self.condition(call, index)? {
                        return self.eval(&call.args[index + 1]);
                    }
                    index += 2;
                }
                return self.eval(&call.args[last]);
            }
            _ => {}
        }
        let mut args = Vec::with_capacity(call.args.len());
        for (index, argument) in call.args.iter().enumerate() {
            match (spec.lambda_arity(index), argument) {
                (Some(_), Argument::Lambda(name)) => args.push(CallArg::Lambda(name.clone())),
                _ => args.push(CallArg::Value(self.eval(argument)?)),
            }
        }
        spec.check_values(&args)?;
        (spec.evaluate)(&mut Call {
            spec,
            args,
            invoker: self,
        })
    }

    /// Expands a custom function call by substituting the caller's argument
    /// expressions for `$n`.
    fn custom(&mut self, call: &FunctionCall) -> Result<Value, ScriptError> {
        let body = self
            .env
            .function(&call.name)
            .ok_or_else(|| ScriptError::FunctionDoesNotExist {
                name: call.name.clone(),
            })?;
        let arity = function_arity(&body);
        if call.args.len() != arity {
            return Err(ScriptError::IncompatibleFunctionArguments {
                name: call.name.clone(),
                expected: format!("%{}({arity} arguments)", call.name),
                received: format!("%{}({} arguments)", call.name, call.args.len()),
            });
        }
        self.tree(&body.substitute(&call.args))
    }
}

impl Invoke for Evaluator<'_> {
    fn invoke(&mut self, function: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
        self.call(&FunctionCall {
            name: function.to_string(),
            args: args.into_iter().map(Argument::Literal).collect(),
        })
    }
}

/// Rewrites trees against a set of known values, folding everything that
/// can be computed without the unknown names.
///
/// Reduction never fails: anything that errors when folded is left in place
/// so the error surfaces only if full resolution actually reaches it.
pub(crate) struct Reducer<'r> {
    pub values: &'r BTreeMap<String, Value>,
    pub functions: &'r BTreeMap<String, Arc<SyntaxTree>>,
}

impl Reducer<'_> {
    pub fn tree(&self, tree: &SyntaxTree) -> SyntaxTree {
        let reduced: Vec<Argument> = tree.parts.iter().map(|part| self.reduce(part)).collect();
        if reduced.len() == 1 {
            return SyntaxTree {
                parts: reduced,
                single_expression: tree.single_expression,
            };
        }
        let mut parts: Vec<Argument> = Vec::with_capacity(reduced.len());
        for part in reduced {
            match (parts.last_mut(), part) {
                (Some(Argument::Literal(Value::String(previous))), Argument::Literal(value)) => {
                    previous.push_str(&value.to_display_string());
                }
                (_, Argument::Literal(value)) => {
                    parts.push(Argument::Literal(Value::String(value.to_display_string())));
                }
                (_, other) => parts.push(other),
            }
        }
        SyntaxTree::from_parts(parts)
    }

    fn evaluate(&self, argument: &Argument) -> Option<Value> {
        let mut env = ValuesEnv {
            values: self.values,
            functions: self.functions,
        };
        Evaluator::new(&mut env).eval(argument).ok()
    }

    pub fn reduce(&self, argument: &Argument) -> Argument {
        match argument {
            Argument::Literal(_) | Argument::Lambda(_) | Argument::FunctionArg(_) => {
                argument.clone()
            }
            Argument::Variable(name) => match self.values.get(name) {
                Some(value) => Argument::Literal(value.clone()),
                None => argument.clone(),
            },
            Argument::Array(items) => {
                let items: Vec<Argument> = items.iter().map(|item| self.reduce(item)).collect();
                let folded = Argument::Array(items);
                self.fold_if_literal(folded)
            }
            Argument::Map(pairs) => {
                let pairs = pairs
                    .iter()
                    .map(|(key, value)| (self.reduce(key), self.reduce(value)))
                    .collect();
                self.fold_if_literal(Argument::Map(pairs))
            }
            Argument::Call(call) => self.reduce_call(call),
        }
    }

    fn fold_if_literal(&self, argument: Argument) -> Argument {
        let all_literal = match &argument {
            Argument::Array(items) => items.iter().all(Argument::is_literal),
            Argument::Map(pairs) => pairs
                .iter()
                .all(|(key, value)| key.is_literal() && value.is_literal()),
            _ => false,
        };
        if all_literal && let Some(value) = self.evaluate(&argument) {
            return Argument::Literal(value);
        }
        argument
    }

    fn reduce_call(&self, call: &FunctionCall) -> Argument {
        let spec = functions::lookup(&call.name);
        if let Some(spec) = spec
            && matches!(spec.name, "if" | "elif")
            && spec.accepts_arity(call.args.len())
        {
            let last = call.args.len() - 1;
            let mut index = 0;
            let mut remaining = Vec::new();
            while index < last {
                match self.reduce(&call.args[index]) {
                    Argument::Literal(Value::Boolean(true)) if remaining.is_empty() => {
                        return self.reduce(&call.args[index + 1]);
                    }
                    Argument::Literal(Value::Boolean(false)) if remaining.is_empty() => {}
                    condition => {
                        remaining.push(condition);
                        remaining.push(self.reduce(&call.args[index + 1]));
                    }
                }
                index += 2;
            }
            if remaining.is_empty() {
                return self.reduce(&call.args[last]);
            }
            remaining.push(self.reduce(&call.args[last]));
            let name = if remaining.len() == 3 { "if" } else { "elif" };
            return Argument::Call(FunctionCall {
                name: name.to_string(),
                args: remaining,
            });
        }

        let args: Vec<Argument> = call.args.iter().map(|arg| self.reduce(arg)).collect();
        let reduced = Argument::Call(FunctionCall {
            name: call.name.clone(),
            args,
        });
        let Argument::Call(reduced_call) = &reduced else {
            return reduced;
        };
        let foldable_args = reduced_call.args.iter().all(|arg| match arg {
            Argument::Literal(_) => true,
            Argument::Lambda(name) => functions::lookup(name).is_some_and(|spec| spec.pure),
            _ => false,
        });
        if !foldable_args {
            return reduced;
        }
        match spec {
            Some(spec) if spec.pure => self.evaluate(&reduced).map_or(reduced, Argument::Literal),
            Some(_) => reduced,
            None => {
                let Some(body) = self.functions.get(&call.name) else {
                    return reduced;
                };
                if function_arity(body) != reduced_call.args.len() {
                    return reduced;
                }
                self.tree(&body.substitute(&reduced_call.args))
                    .as_literal()
                    .map_or(reduced, Argument::Literal)
            }
        }
    }
}
