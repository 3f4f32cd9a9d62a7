#![forbid(unsafe_code)]

//! The formatter language embedded in every string field of a config.
//!
//! A [`Script`] holds named variable definitions, custom functions (`%name`)
//! and already bound values. Definitions are parsed and checked for missing
//! references and cycles when added; values are produced by [`Script::resolve`]
//! (fixed point over everything resolvable) or lazily, one formatter at a time,
//! with [`Script::resolve_formatter`].

mod error;
mod eval;
pub mod functions;
mod parser;
mod syntax;
mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use error::ScriptError;
pub use parser::{is_valid_name, parse, parse_function_body};
pub use syntax::{Argument, FunctionCall, SyntaxTree};
pub use types::{ScriptMap, TypeSet, Value};

use eval::{Environment, Evaluator, Reducer, ValuesEnv, function_arity};

/// Outcome of [`Script::resolve`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Every bound or resolved value.
    pub values: BTreeMap<String, Value>,
    /// Definitions that depend on unresolvable names, reduced as far as possible.
    pub partial: BTreeMap<String, SyntaxTree>,
}

#[derive(Debug, Clone, Default)]
pub struct Script {
    definitions: BTreeMap<String, SyntaxTree>,
    functions: BTreeMap<String, Arc<SyntaxTree>>,
    values: BTreeMap<String, Value>,
    /// Names promised to be bound later.
    declared: BTreeSet<String>,
}

/// Depth-first search for a directed cycle. Returns the cycle path with the
/// first node repeated at the end.
pub fn find_cycle<F>(nodes: impl IntoIterator<Item = String>, edges: F) -> Option<Vec<String>>
where
    F: Fn(&str) -> Vec<String>,
{
    fn visit<F: Fn(&str) -> Vec<String>>(
        node: &str,
        edges: &F,
        done: &mut BTreeSet<String>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(position) = stack.iter().position(|entry| entry == node) {
            let mut cycle = stack[position..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        stack.push(node.to_string());
        for next in edges(node) {
            if let Some(cycle) = visit(&next, edges, done, stack) {
                return Some(cycle);
            }
        }
        stack.pop();
        done.insert(node.to_string());
        None
    }

    let mut done = BTreeSet::new();
    for node in nodes {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(&node, &edges, &mut done, &mut stack) {
            return Some(cycle);
        }
    }
    None
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and adds variable definitions (`name`) and custom functions
    /// (`%name`). Nothing is added if any definition fails validation.
    pub fn add<K, V>(&mut self, definitions: impl IntoIterator<Item = (K, V)>) -> Result<(), ScriptError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut staged = self.clone();
        for (name, text) in definitions {
            let name = name.as_ref();
            let text = text.as_ref();
            match name.strip_prefix('%') {
                Some(function) => staged.stage_function(function, parse_function_body(text)?)?,
                None => staged.stage_variable(name, parse(text)?)?,
            }
        }
        staged.validate()?;
        *self = staged;
        Ok(())
    }

    /// Same as [`Script::add`] for trees that were already parsed.
    pub fn add_parsed(
        &mut self,
        definitions: impl IntoIterator<Item = (String, SyntaxTree)>,
    ) -> Result<(), ScriptError> {
        let mut staged = self.clone();
        for (name, tree) in definitions {
            match name.strip_prefix('%') {
                Some(function) => staged.stage_function(function, tree)?,
                None => staged.stage_variable(&name, tree)?,
            }
        }
        staged.validate()?;
        *self = staged;
        Ok(())
    }

    fn stage_variable(&mut self, name: &str, tree: SyntaxTree) -> Result<(), ScriptError> {
        if !is_valid_name(name) {
            return Err(ScriptError::syntax(
                name,
                0,
                format!("invalid variable name '{name}', must be lower snake case"),
            ));
        }
        self.values.remove(name);
        self.definitions.insert(name.to_string(), tree);
        Ok(())
    }

    fn stage_function(&mut self, name: &str, body: SyntaxTree) -> Result<(), ScriptError> {
        if !is_valid_name(name) {
            return Err(ScriptError::syntax(
                name,
                0,
                format!("invalid custom function name '%{name}'"),
            ));
        }
        if functions::lookup(name).is_some() {
            return Err(ScriptError::syntax(
                name,
                0,
                format!("'%{name}' is a built-in function and cannot be redefined"),
            ));
        }
        let indices = body.function_args();
        if indices.iter().copied().ne(0..indices.len()) {
            return Err(ScriptError::syntax(
                &body.to_string(),
                0,
                format!("arguments of custom function '%{name}' must be numbered $0, $1, ... without gaps"),
            ));
        }
        self.functions.insert(name.to_string(), Arc::new(body));
        Ok(())
    }

    /// Promises that `names` will be bound before they are resolved.
    pub fn declare<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.declared.extend(names.into_iter().map(Into::into));
    }

    /// Binds concrete values, replacing any definition of the same name.
    pub fn bind<S: Into<String>>(&mut self, values: impl IntoIterator<Item = (S, Value)>) {
        for (name, value) in values {
            let name = name.into();
            self.definitions.remove(&name);
            self.values.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn definition(&self, name: &str) -> Option<&SyntaxTree> {
        self.definitions.get(name)
    }

    pub fn definitions(&self) -> &BTreeMap<String, SyntaxTree> {
        &self.definitions
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.values.contains_key(name)
            || self.definitions.contains_key(name)
            || self.declared.contains(name)
    }

    fn trees(&self) -> impl Iterator<Item = &SyntaxTree> {
        self.definitions
            .values()
            .chain(self.functions.values().map(|body| body.as_ref()))
    }

    fn validate(&self) -> Result<(), ScriptError> {
        for tree in self.trees() {
            self.validate_functions_in(tree)?;
        }
        self.check_function_cycles()?;
        for tree in self.trees() {
            self.validate_variables_in(tree)?;
        }
        self.check_variable_cycles()
    }

    /// Checks that a tree only references known names. Used for formatters
    /// that are not stored as definitions.
    pub fn validate_tree(&self, tree: &SyntaxTree) -> Result<(), ScriptError> {
        self.validate_functions_in(tree)?;
        self.validate_variables_in(tree)
    }

    fn validate_functions_in(&self, tree: &SyntaxTree) -> Result<(), ScriptError> {
        for name in tree.custom_functions() {
            if !self.functions.contains_key(&name) {
                return Err(ScriptError::FunctionDoesNotExist { name });
            }
        }
        for (name, count) in tree.custom_calls() {
            let arity = self.functions.get(&name).map_or(0, |body| function_arity(body));
            if arity != count {
                return Err(ScriptError::IncompatibleFunctionArguments {
                    expected: format!("%{name}({arity} arguments)"),
                    received: format!("%{name}({count} arguments)"),
                    name,
                });
            }
        }
        for (builtin, name, expected) in tree.custom_lambdas() {
            let arity = self.functions.get(&name).map_or(0, |body| function_arity(body));
            if arity != expected {
                return Err(ScriptError::IncompatibleFunctionArguments {
                    name: builtin,
                    expected: format!("a lambda taking {expected} arguments"),
                    received: format!("%{name} taking {arity} arguments"),
                });
            }
        }
        Ok(())
    }

    fn validate_variables_in(&self, tree: &SyntaxTree) -> Result<(), ScriptError> {
        for name in tree.variables() {
            if !self.is_known(&name) {
                return Err(ScriptError::VariableDoesNotExist { name });
            }
        }
        Ok(())
    }

    fn check_function_cycles(&self) -> Result<(), ScriptError> {
        // Functions that call no other custom function cannot be part of a cycle.
        let callers = |name: &str| -> Vec<String> {
            self.functions
                .get(name)
                .map(|body| {
                    body.custom_functions()
                        .into_iter()
                        .filter(|callee| {
                            self.functions
                                .get(callee)
                                .is_some_and(|body| !body.custom_functions().is_empty())
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        let nodes = self
            .functions
            .iter()
            .filter(|(_, body)| !body.custom_functions().is_empty())
            .map(|(name, _)| name.clone());
        match find_cycle(nodes, callers) {
            Some(cycle) => {
                let path: Vec<String> = cycle.iter().map(|name| format!("%{name}")).collect();
                Err(ScriptError::cycle("custom functions", &path))
            }
            None => Ok(()),
        }
    }

    /// Variables a tree needs, including those used inside the bodies of
    /// custom functions it calls.
    fn dependencies(&self, tree: &SyntaxTree) -> BTreeSet<String> {
        let mut names = tree.variables();
        let mut pending: Vec<String> = tree.custom_functions().into_iter().collect();
        let mut seen = BTreeSet::new();
        while let Some(function) = pending.pop() {
            if !seen.insert(function.clone()) {
                continue;
            }
            if let Some(body) = self.functions.get(&function) {
                names.extend(body.variables());
                pending.extend(body.custom_functions());
            }
        }
        names
    }

    fn check_variable_cycles(&self) -> Result<(), ScriptError> {
        let edges = |name: &str| -> Vec<String> {
            self.definitions
                .get(name)
                .map(|tree| {
                    self.dependencies(tree)
                        .into_iter()
                        .filter(|dep| self.definitions.contains_key(dep))
                        .collect()
                })
                .unwrap_or_default()
        };
        match find_cycle(self.definitions.keys().cloned(), edges) {
            Some(cycle) => Err(ScriptError::cycle("variables", &cycle)),
            None => Ok(()),
        }
    }

    /// Names that must be bound (rather than defined) for `tree` to resolve.
    pub fn unresolved_dependencies(&self, tree: &SyntaxTree) -> BTreeSet<String> {
        let mut missing = BTreeSet::new();
        let mut pending: Vec<String> = self.dependencies(tree).into_iter().collect();
        let mut seen = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !seen.insert(name.clone()) || self.values.contains_key(&name) {
                continue;
            }
            match self.definitions.get(&name) {
                Some(definition) => pending.extend(self.dependencies(definition)),
                None => {
                    missing.insert(name);
                }
            }
        }
        missing
    }

    /// Resolves every definition whose dependencies are available.
    ///
    /// Names in `unresolvable`, together with declared but unbound names, are
    /// treated as supplied later: definitions depending on them come back
    /// reduced in [`Resolution::partial`] instead of failing.
    pub fn resolve(&self, unresolvable: &BTreeSet<String>) -> Result<Resolution, ScriptError> {
        let blocked: BTreeSet<&str> = unresolvable
            .iter()
            .chain(self.declared.iter())
            .map(String::as_str)
            .filter(|name| !self.values.contains_key(*name))
            .collect();

        let mut values = self.values.clone();
        let mut pending: BTreeMap<&str, BTreeSet<String>> = self
            .definitions
            .iter()
            .filter(|(name, _)| !values.contains_key(*name) && !blocked.contains(name.as_str()))
            .map(|(name, tree)| (name.as_str(), self.dependencies(tree)))
            .collect();

        loop {
            let ready: Vec<&str> = pending
                .iter()
                .filter(|(_, deps)| deps.iter().all(|dep| values.contains_key(dep)))
                .map(|(name, _)| *name)
                .collect();
            if ready.is_empty() {
                break;
            }
            for name in ready {
                let value = {
                    let mut env = ValuesEnv {
                        values: &values,
                        functions: &self.functions,
                    };
                    Evaluator::new(&mut env).tree(&self.definitions[name])?
                };
                values.insert(name.to_string(), value);
                pending.remove(name);
            }
        }

        let reducer = Reducer {
            values: &values,
            functions: &self.functions,
        };
        let partial = pending
            .keys()
            .map(|name| (name.to_string(), reducer.tree(&self.definitions[*name])))
            .collect();
        Ok(Resolution { values, partial })
    }

    /// Resolves and keeps the result: resolved definitions become bound
    /// values and partially resolved ones are replaced by their reduced form.
    pub fn resolve_in_place(&mut self, unresolvable: &BTreeSet<String>) -> Result<(), ScriptError> {
        let Resolution { values, partial } = self.resolve(unresolvable)?;
        for name in values.keys() {
            self.definitions.remove(name);
        }
        self.values = values;
        self.definitions.extend(partial);
        Ok(())
    }

    /// Reduces a single formatter against the currently resolvable values.
    pub fn partial_formatter(
        &self,
        tree: &SyntaxTree,
        unresolvable: &BTreeSet<String>,
    ) -> Result<SyntaxTree, ScriptError> {
        let resolution = self.resolve(unresolvable)?;
        let reducer = Reducer {
            values: &resolution.values,
            functions: &self.functions,
        };
        Ok(reducer.tree(tree))
    }

    /// Evaluates one formatter, resolving only the definitions it reaches.
    /// `overlay` values take precedence over everything in the script.
    pub fn resolve_formatter(
        &self,
        tree: &SyntaxTree,
        overlay: &BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        let mut env = LazyEnv {
            script: self,
            overlay,
            memo: BTreeMap::new(),
            visiting: Vec::new(),
        };
        Evaluator::new(&mut env).tree(tree)
    }

    /// Convenience for resolving a single variable lazily.
    pub fn resolve_variable(
        &self,
        name: &str,
        overlay: &BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        let tree = SyntaxTree::from_parts(vec![Argument::Variable(name.to_string())]);
        self.resolve_formatter(&tree, overlay)
    }
}

struct LazyEnv<'s> {
    script: &'s Script,
    overlay: &'s BTreeMap<String, Value>,
    memo: BTreeMap<String, Value>,
    visiting: Vec<String>,
}

impl Environment for LazyEnv<'_> {
    fn variable(&mut self, name: &str) -> Result<Value, ScriptError> {
        let script = self.script;
        if let Some(value) = self
            .overlay
            .get(name)
            .or_else(|| script.values.get(name))
            .or_else(|| self.memo.get(name))
        {
            return Ok(value.clone());
        }
        let Some(tree) = script.definitions.get(name) else {
            return Err(ScriptError::VariableDoesNotExist {
                name: name.to_string(),
            });
        };
        if let Some(position) = self.visiting.iter().position(|entry| entry == name) {
            let mut cycle = self.visiting[position..].to_vec();
            cycle.push(name.to_string());
            return Err(ScriptError::cycle("variables", &cycle));
        }
        self.visiting.push(name.to_string());
        let value = Evaluator::new(self).tree(tree);
        self.visiting.pop();
        let value = value?;
        self.memo.insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn function(&self, name: &str) -> Option<Arc<SyntaxTree>> {
        self.script.functions.get(name).cloned()
    }
}
