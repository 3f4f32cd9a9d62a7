use thiserror::Error;

/// Errors raised while parsing, validating or resolving scripts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("Invalid syntax: {message}\n{excerpt}")]
    InvalidSyntax { message: String, excerpt: String },

    #[error("Variable '{name}' does not exist")]
    VariableDoesNotExist { name: String },

    #[error("Function '%{name}' does not exist")]
    FunctionDoesNotExist { name: String },

    #[error("Cycle detected within these {kind}: {path}")]
    CycleDetected { kind: &'static str, path: String },

    #[error("Incompatible arguments passed to function %{name}\nExpected: {expected}\nReceived: {received}")]
    IncompatibleFunctionArguments {
        name: String,
        expected: String,
        received: String,
    },

    #[error("Tried to get a key that does not exist: {key}")]
    KeyDoesNotExist { key: String },

    #[error("Tried to use a non-hashable value as a map key: {key}")]
    KeyNotHashable { key: String },

    #[error("Runtime error in %{function}: {message}")]
    FunctionRuntime { function: String, message: String },

    /// Raised by `%throw` and the assert family.
    #[error("{message}")]
    UserThrown { message: String },
}

impl ScriptError {
    /// Builds a syntax error with a caret pointing at `position` (a char index).
    pub(crate) fn syntax(source: &str, position: usize, message: impl Into<String>) -> Self {
        ScriptError::InvalidSyntax {
            message: message.into(),
            excerpt: excerpt(source, position),
        }
    }

    pub(crate) fn runtime(function: &str, message: impl Into<String>) -> Self {
        ScriptError::FunctionRuntime {
            function: function.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn cycle<S: AsRef<str>>(kind: &'static str, path: &[S]) -> Self {
        ScriptError::CycleDetected {
            kind,
            path: path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" -> "),
        }
    }
}

fn excerpt(source: &str, position: usize) -> String {
    let mut line_start = 0usize;
    let mut column = position;
    for (index, ch) in source.chars().enumerate() {
        if index >= position {
            break;
        }
        if ch == '\n' {
            line_start = index + 1;
            column = position - line_start;
        }
    }
    let line: String = source
        .chars()
        .skip(line_start)
        .take_while(|ch| *ch != '\n')
        .collect();
    format!("  {line}\n  {}^", " ".repeat(column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_points_at_offending_column() {
        let err = ScriptError::syntax("ab\n{%upper(}", 10, "unexpected '}'");
        let rendered = err.to_string();
        assert!(rendered.contains("  {%upper(}\n"), "{rendered}");
        assert!(rendered.ends_with("         ^"), "{rendered}");
    }

    #[test]
    fn cycle_path_formatting() {
        let err = ScriptError::cycle("variables", &["a", "b", "a"]);
        assert_eq!(
            err.to_string(),
            "Cycle detected within these variables: a -> b -> a"
        );
    }
}
