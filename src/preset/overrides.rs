use serde_yaml::Value as Yaml;

use crate::entries::entry_variable_names;
use crate::validators::{Mode, ValidationError, ValidationResult, Validator, join_path, scalar_to_string, type_name};

/// Variables bound for every subscription before its overrides.
const BUILTIN_NAMES: &[&str] = &["subscription_name", "subscription_value"];

/// Lower snake case with a leading letter; functions carry a `%` prefix.
pub fn is_valid_name(name: &str) -> bool {
    let name = name.strip_prefix('%').unwrap_or(name);
    let mut chars = name.chars();
    chars.next().is_some_and(|first| first.is_ascii_lowercase())
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

/// User defined variables and `%functions`, in definition order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    items: Vec<(String, String)>,
}

impl Overrides {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.items.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .map(|(name, _)| name)
            .filter(|name| !name.starts_with('%'))
    }

    /// Sets `name`, replacing an existing definition in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let (name, value) = (name.into(), value.into());
        match self.items.iter_mut().find(|(key, _)| *key == name) {
            Some(item) => item.1 = value,
            None => self.items.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Validator for Overrides {
    fn validate_in(_: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let Yaml::Mapping(mapping) = value else {
            return Err(ValidationError::new(
                name,
                format!("should be of type object, got {}", type_name(value)),
            ));
        };
        let entry_names = entry_variable_names();
        let mut overrides = Overrides::default();
        for (key, item) in mapping {
            let key = scalar_to_string(key)
                .ok_or_else(|| ValidationError::new(name, "override names must be strings"))?;
            if !is_valid_name(&key) {
                return Err(ValidationError::new(
                    name,
                    format!(
                        "'{key}' is not a valid override name. Names must be lower snake case and start with a letter"
                    ),
                ));
            }
            if BUILTIN_NAMES.contains(&key.strip_suffix("_sanitized").unwrap_or(&key)) {
                return Err(ValidationError::new(
                    name,
                    format!("'{key}' cannot be used as an override name, it is set for every subscription"),
                ));
            }
            if entry_names.contains(&key) {
                return Err(ValidationError::new(
                    name,
                    format!("'{key}' cannot be used as an override name, it is an entry variable"),
                ));
            }
            let path = join_path(name, &key);
            let text = scalar_to_string(item).ok_or_else(|| {
                ValidationError::new(&path, format!("should be of type string, got {}", type_name(item)))
            })?;
            overrides.set(key, text);
        }
        Ok(overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn keeps_definition_order() -> anyhow::Result<()> {
        let overrides = Overrides::validate(
            "overrides",
            &yaml("{show: Foo, '%double': '{%mul($0, 2)}', season: 2, flag: true}"),
        )?;
        let names: Vec<&str> = overrides.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["show", "%double", "season", "flag"]);
        assert_eq!(overrides.get("flag"), Some("True"));
        assert_eq!(overrides.variable_names().count(), 3);
        Ok(())
    }

    #[test]
    fn rejects_bad_names() {
        for text in ["{Show: x}", "{1st: x}", "{title: x}", "{title_sanitized: x}"] {
            assert!(Overrides::validate("overrides", &yaml(text)).is_err(), "{text}");
        }
        assert!(Overrides::validate("overrides", &yaml("{list: [a]}")).is_err());
    }

    #[test]
    fn rejects_subscription_builtins() {
        for key in [
            "subscription_name",
            "subscription_name_sanitized",
            "subscription_value",
            "subscription_value_sanitized",
        ] {
            let error = Overrides::validate("overrides", &yaml(&format!("{{{key}: x}}"))).unwrap_err();
            assert!(error.to_string().contains("set for every subscription"), "{key}");
        }
        assert!(Overrides::validate("overrides", &yaml("{subscription_indent_1: x, subscription_value_2: y}")).is_ok());
    }
}
