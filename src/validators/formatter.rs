use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::Value as Yaml;

use super::{Mode, ValidationError, ValidationResult, Validator, join_path, scalar_to_string, type_name};
use crate::script::{Script, ScriptError, SyntaxTree, Value, parse};

/// A string field evaluated by the script engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StringFormatter {
    name: String,
    source: String,
    tree: SyntaxTree,
}

impl Default for StringFormatter {
    fn default() -> Self {
        StringFormatter {
            name: String::new(),
            source: String::new(),
            tree: SyntaxTree::from_value(Value::string("")),
        }
    }
}

impl StringFormatter {
    pub fn parse(name: &str, source: impl Into<String>) -> ValidationResult<Self> {
        let source = source.into();
        let tree = parse(&source).map_err(|error| ValidationError::new(name, error.to_string()))?;
        Ok(StringFormatter {
            name: name.to_string(),
            source,
            tree,
        })
    }

    /// Dotted path of the field this formatter came from.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &SyntaxTree {
        &self.tree
    }

    pub fn resolve(
        &self,
        script: &Script,
        overlay: &BTreeMap<String, Value>,
    ) -> Result<Value, ScriptError> {
        script.resolve_formatter(&self.tree, overlay)
    }

    pub fn resolve_string(
        &self,
        script: &Script,
        overlay: &BTreeMap<String, Value>,
    ) -> Result<String, ScriptError> {
        Ok(self.resolve(script, overlay)?.to_display_string())
    }

    /// Fails if the formatter references names the script does not know.
    pub fn check(&self, script: &Script) -> ValidationResult<()> {
        script
            .validate_tree(&self.tree)
            .map_err(|error| ValidationError::new(&self.name, error.to_string()))
    }
}

impl Validator for StringFormatter {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let source = scalar_to_string(value).ok_or_else(|| {
            ValidationError::new(
                name,
                format!("should be of type string, got {}", type_name(value)),
            )
        })?;
        StringFormatter::parse(name, source)
    }
}

/// A formatter that must resolve from overrides alone, before any entry
/// exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverridesStringFormatter(StringFormatter);

impl OverridesStringFormatter {
    pub fn formatter(&self) -> &StringFormatter {
        &self.0
    }

    pub fn source(&self) -> &str {
        self.0.source()
    }

    /// Rejects references to any of `entry_names`, directly or through
    /// overrides.
    pub fn check(&self, script: &Script, entry_names: &BTreeSet<String>) -> ValidationResult<()> {
        self.0.check(script)?;
        let entry_dependent: Vec<String> = script
            .unresolved_dependencies(self.0.tree())
            .into_iter()
            .filter(|name| entry_names.contains(name))
            .collect();
        if entry_dependent.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(
                self.0.name(),
                format!(
                    "cannot use entry variables here, only override variables. Found: {}",
                    entry_dependent.join(", ")
                ),
            ))
        }
    }

    pub fn resolve(&self, script: &Script) -> Result<String, ScriptError> {
        self.0.resolve_string(script, &BTreeMap::new())
    }
}

impl Validator for OverridesStringFormatter {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        StringFormatter::validate_in(mode, name, value).map(OverridesStringFormatter)
    }
}

/// Override formatter that must evaluate to an integer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverridesIntegerFormatter(OverridesStringFormatter);

impl OverridesIntegerFormatter {
    pub fn inner(&self) -> &OverridesStringFormatter {
        &self.0
    }

    pub fn resolve(&self, script: &Script) -> crate::error::Result<i64> {
        let formatter = self.0.formatter();
        let value = formatter.resolve(script, &BTreeMap::new())?;
        let parsed = match &value {
            Value::Integer(number) => Some(*number),
            Value::Float(number) if number.fract() == 0.0 => Some(*number as i64),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| {
            ValidationError::new(
                formatter.name(),
                format!("should resolve to an integer, got '{}'", value.to_display_string()),
            )
            .into()
        })
    }
}

impl Validator for OverridesIntegerFormatter {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        OverridesStringFormatter::validate_in(mode, name, value).map(OverridesIntegerFormatter)
    }
}

/// Override formatter that must evaluate to a boolean.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverridesBooleanFormatter(OverridesStringFormatter);

impl OverridesBooleanFormatter {
    pub fn inner(&self) -> &OverridesStringFormatter {
        &self.0
    }

    pub fn resolve(&self, script: &Script) -> crate::error::Result<bool> {
        let formatter = self.0.formatter();
        let value = formatter.resolve(script, &BTreeMap::new())?;
        match &value {
            Value::Boolean(flag) => Ok(*flag),
            Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
            Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
            other => Err(ValidationError::new(
                formatter.name(),
                format!("should resolve to a boolean, got '{}'", other.to_display_string()),
            )
            .into()),
        }
    }
}

impl Validator for OverridesBooleanFormatter {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        OverridesStringFormatter::validate_in(mode, name, value).map(OverridesBooleanFormatter)
    }
}

/// Ordered mapping of keys to formatters, e.g. tag sets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DictFormatter {
    items: Vec<(String, StringFormatter)>,
}

impl DictFormatter {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StringFormatter)> {
        self.items.iter().map(|(key, formatter)| (key.as_str(), formatter))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn resolve(
        &self,
        script: &Script,
        overlay: &BTreeMap<String, Value>,
    ) -> Result<Vec<(String, String)>, ScriptError> {
        self.items
            .iter()
            .map(|(key, formatter)| Ok::<_, ScriptError>((key.clone(), formatter.resolve_string(script, overlay)?)))
            .collect()
    }
}

impl Validator for DictFormatter {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let Yaml::Mapping(mapping) = value else {
            return Err(ValidationError::new(
                name,
                format!("should be of type object, got {}", type_name(value)),
            ));
        };
        let mut items = Vec::with_capacity(mapping.len());
        for (key, item) in mapping {
            let key = scalar_to_string(key)
                .ok_or_else(|| ValidationError::new(name, "keys must be strings"))?;
            let formatter = StringFormatter::validate_in(mode, &join_path(name, &key), item)?;
            items.push((key, formatter));
        }
        Ok(DictFormatter { items })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn syntax_errors_become_validation_errors() {
        let error = StringFormatter::validate("output_options.file_name", &yaml("'{title'")).unwrap_err();
        assert_eq!(error.path(), "output_options.file_name");
        assert!(error.to_string().starts_with("Validation error in output_options.file_name: Invalid syntax"));
    }

    #[test]
    fn overrides_formatter_rejects_entry_variables() -> anyhow::Result<()> {
        let mut script = Script::new();
        script.declare(["title"]);
        script.add([("tv_show_name", "Show"), ("derived", "{title}")])?;
        let entry_names: BTreeSet<String> = ["title".to_string()].into();

        let good = OverridesStringFormatter::validate("output_options.output_directory", &yaml("'/tv/{tv_show_name}'"))?;
        good.check(&script, &entry_names)?;
        assert_eq!(good.resolve(&script)?, "/tv/Show");

        let bad = OverridesStringFormatter::validate("output_options.output_directory", &yaml("'/tv/{derived}'"))?;
        let error = bad.check(&script, &entry_names).unwrap_err();
        assert!(error.message().contains("title"));
        Ok(())
    }

    #[test]
    fn integer_and_boolean_formatters() -> anyhow::Result<()> {
        let mut script = Script::new();
        script.add([("limit", "{%add(2, 3)}"), ("flag", "{%bool(True)}")])?;
        let limit = OverridesIntegerFormatter::validate("keep_max_files", &yaml("'{limit}'"))?;
        assert_eq!(limit.resolve(&script)?, 5);
        let flag = OverridesBooleanFormatter::validate("enable", &yaml("'{flag}'"))?;
        assert!(flag.resolve(&script)?);
        let plain = OverridesBooleanFormatter::validate("enable", &yaml("false"))?;
        assert!(!plain.resolve(&script)?);
        Ok(())
    }

    #[test]
    fn dict_formatter_keeps_order() -> anyhow::Result<()> {
        let tags = DictFormatter::validate("tags", &yaml("{title: '{t}', artist: x, album: y}"))?;
        assert_eq!(tags.keys().collect::<Vec<_>>(), ["title", "artist", "album"]);
        let mut script = Script::new();
        script.add([("t", "T")])?;
        let resolved = tags.resolve(&script, &BTreeMap::new())?;
        assert_eq!(resolved[0], ("title".to_string(), "T".to_string()));
        Ok(())
    }
}
