//! Validation of YAML documents into typed option objects.
//!
//! Every option object implements [`Validator`]: it is built from a dotted
//! `name` plus a YAML value and reports problems as a [`ValidationError`]
//! carrying that name.

mod formatter;
mod strict_dict;

use std::collections::BTreeMap;
use std::fmt;

use serde_yaml::Value as Yaml;

pub use formatter::{
    DictFormatter, OverridesBooleanFormatter, OverridesIntegerFormatter,
    OverridesStringFormatter, StringFormatter,
};
pub use strict_dict::StrictDict;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    path: String,
    message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation error in {}: {}", self.path, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// How much of a value must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Full,
    /// Missing required keys are tolerated; everything present is checked.
    Partial,
}

pub trait Validator: Sized {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self>;

    fn validate(name: &str, value: &Yaml) -> ValidationResult<Self> {
        Self::validate_in(Mode::Full, name, value)
    }

    /// Accepts an incomplete value, as written in a parent preset.
    fn partial_validate(name: &str, value: &Yaml) -> ValidationResult<()> {
        Self::validate_in(Mode::Partial, name, value).map(drop)
    }
}

/// `parent.child`, or just `child` at the root.
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

pub(crate) fn type_name(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "boolean",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "list",
        Yaml::Mapping(_) => "object",
        Yaml::Tagged(_) => "tagged value",
    }
}

/// Text form of a YAML scalar, `None` for collections.
pub fn scalar_to_string(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(text) => Some(text.clone()),
        Yaml::Number(number) => Some(number.to_string()),
        Yaml::Bool(true) => Some("True".to_string()),
        Yaml::Bool(false) => Some("False".to_string()),
        Yaml::Tagged(tagged) => scalar_to_string(&tagged.value),
        _ => None,
    }
}

fn wrong_type(name: &str, expected: &str, value: &Yaml) -> ValidationError {
    ValidationError::new(
        name,
        format!("should be of type {expected}, got {}", type_name(value)),
    )
}

impl Validator for String {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        scalar_to_string(value).ok_or_else(|| wrong_type(name, "string", value))
    }
}

impl Validator for bool {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        match value {
            Yaml::Bool(flag) => Ok(*flag),
            Yaml::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Yaml::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(wrong_type(name, "boolean", other)),
        }
    }
}

impl Validator for i64 {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        match value {
            Yaml::Number(number) if number.is_i64() => number
                .as_i64()
                .ok_or_else(|| wrong_type(name, "integer", value)),
            Yaml::String(text) => text.trim().parse().map_err(|_| wrong_type(name, "integer", value)),
            other => Err(wrong_type(name, "integer", other)),
        }
    }
}

impl Validator for f64 {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        match value {
            Yaml::Number(number) => number.as_f64().ok_or_else(|| wrong_type(name, "float", value)),
            other => Err(wrong_type(name, "float", other)),
        }
    }
}

/// Lists accept a single bare value as a list of one.
impl<T: Validator> Validator for Vec<T> {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        match value {
            Yaml::Sequence(items) => items
                .iter()
                .enumerate()
                .map(|(index, item)| T::validate_in(mode, &format!("{name}[{index}]"), item))
                .collect(),
            Yaml::Null => Ok(Vec::new()),
            single => Ok(vec![T::validate_in(mode, name, single)?]),
        }
    }
}

/// A mapping with arbitrary keys and uniformly validated values.
impl<T: Validator> Validator for BTreeMap<String, T> {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let Yaml::Mapping(mapping) = value else {
            return Err(wrong_type(name, "object", value));
        };
        let mut out = BTreeMap::new();
        for (key, item) in mapping {
            let key = scalar_to_string(key)
                .ok_or_else(|| ValidationError::new(name, "keys must be strings"))?;
            let item = T::validate_in(mode, &join_path(name, &key), item)?;
            out.insert(key, item);
        }
        Ok(out)
    }
}

/// Raw YAML kept as-is, e.g. `ytdl_options`.
impl Validator for Yaml {
    fn validate_in(_: Mode, _: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(value.clone())
    }
}

/// Checks that `value` is one of `options`.
pub fn select(name: &str, value: &Yaml, options: &[&str]) -> ValidationResult<String> {
    let text = String::validate(name, value)?;
    if options.contains(&text.as_str()) {
        Ok(text)
    } else {
        Err(ValidationError::new(
            name,
            format!("Must be one of the following values: {}", options.join(", ")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn error_message_names_the_path() {
        let error = bool::validate("presets.a.subtitles.embed_subtitles", &yaml("[1]")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Validation error in presets.a.subtitles.embed_subtitles: should be of type boolean, got list"
        );
    }

    #[test]
    fn list_accepts_single_value() -> anyhow::Result<()> {
        assert_eq!(Vec::<String>::validate("langs", &yaml("en"))?, vec!["en"]);
        assert_eq!(Vec::<String>::validate("langs", &yaml("[en, de]"))?, vec!["en", "de"]);
        let error = Vec::<i64>::validate("n", &yaml("[1, x]")).unwrap_err();
        assert_eq!(error.path(), "n[1]");
        Ok(())
    }

    #[test]
    fn select_lists_options() {
        let error = select("when_no_chapters", &yaml("maybe"), &["pass", "drop", "error"]).unwrap_err();
        assert!(error.message().contains("pass, drop, error"));
        assert!(select("when_no_chapters", &yaml("drop"), &["pass", "drop", "error"]).is_ok());
    }

    #[test]
    fn scalars_convert_to_strings() {
        assert_eq!(scalar_to_string(&yaml("1")).as_deref(), Some("1"));
        assert_eq!(scalar_to_string(&yaml("true")).as_deref(), Some("True"));
        assert_eq!(scalar_to_string(&yaml("[1]")), None);
    }

    #[test]
    fn dict_paths_are_dotted() {
        let error = BTreeMap::<String, i64>::validate("tags", &yaml("{a: 1, b: x}")).unwrap_err();
        assert_eq!(error.path(), "tags.b");
    }
}
