use serde_yaml::{Mapping, Value as Yaml};

use super::{Mode, ValidationError, ValidationResult, Validator, join_path, type_name};

/// A mapping with a declared set of keys.
#[derive(Debug, Clone)]
pub struct StrictDict<'a> {
    name: String,
    mapping: &'a Mapping,
    mode: Mode,
}

impl<'a> StrictDict<'a> {
    /// Rejects unknown keys and, in [`Mode::Full`], missing required ones.
    pub fn new(
        mode: Mode,
        name: &str,
        value: &'a Yaml,
        required: &[&str],
        optional: &[&str],
    ) -> ValidationResult<Self> {
        let dict = Self::lax(mode, name, value, required)?;
        let mut allowed: Vec<&str> = required.iter().chain(optional).copied().collect();
        allowed.sort_unstable();
        for key in dict.keys() {
            if !allowed.contains(&key) {
                return Err(ValidationError::new(
                    name,
                    format!(
                        "'{key}' is not a valid field. Allowed fields: {}",
                        allowed.join(", ")
                    ),
                ));
            }
        }
        Ok(dict)
    }

    /// Like [`StrictDict::new`] but any extra key is allowed.
    pub fn lax(mode: Mode, name: &str, value: &'a Yaml, required: &[&str]) -> ValidationResult<Self> {
        let Yaml::Mapping(mapping) = value else {
            return Err(ValidationError::new(
                name,
                format!("should be of type object, got {}", type_name(value)),
            ));
        };
        if let Some(key) = mapping.keys().find(|key| !key.is_string()) {
            return Err(ValidationError::new(
                name,
                format!("keys must be strings, got {}", type_name(key)),
            ));
        }
        let dict = StrictDict {
            name: name.to_string(),
            mapping,
            mode,
        };
        if mode == Mode::Full
            && let Some(missing) = required.iter().find(|key| dict.get(key).is_none())
        {
            return Err(ValidationError::new(
                name,
                format!("missing the required field '{missing}'"),
            ));
        }
        Ok(dict)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn child_name(&self, key: &str) -> String {
        join_path(&self.name, key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &'a str> + use<'a> {
        self.mapping.keys().filter_map(Yaml::as_str)
    }

    /// The raw value of `key`; explicit nulls count as absent.
    pub fn get(&self, key: &str) -> Option<&'a Yaml> {
        self.mapping.get(key).filter(|value| !value.is_null())
    }

    pub fn required<T: Validator + Default>(&self, key: &str) -> ValidationResult<T> {
        match self.get(key) {
            Some(value) => T::validate_in(self.mode, &self.child_name(key), value),
            None if self.mode == Mode::Partial => Ok(T::default()),
            None => Err(ValidationError::new(
                &self.name,
                format!("missing the required field '{key}'"),
            )),
        }
    }

    pub fn optional<T: Validator>(&self, key: &str) -> ValidationResult<Option<T>> {
        self.get(key)
            .map(|value| T::validate_in(self.mode, &self.child_name(key), value))
            .transpose()
    }

    pub fn optional_or<T: Validator>(&self, key: &str, default: T) -> ValidationResult<T> {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    pub fn select(&self, key: &str, options: &[&str], default: &str) -> ValidationResult<String> {
        match self.get(key) {
            Some(value) => super::select(&self.child_name(key), value, options),
            None => Ok(default.to_string()),
        }
    }
}
