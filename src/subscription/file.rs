//! Subscription files: a mapping of subscription names to preset bodies,
//! parent lists, bare values or nested groups.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde_yaml::{Mapping, Value as Yaml};

use crate::error::Result;
use crate::preset::{PresetRegistry, deep_merge, parent_names};
use crate::validators::{
    Mode, StrictDict, ValidationError, ValidationResult, Validator, join_path, scalar_to_string,
    type_name,
};

pub const FILE_PRESET_KEY: &str = "__preset__";
pub const FILE_VALUE_KEY: &str = "__value__";

/// One subscription as written in a file, before its preset is composed.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionDefinition {
    pub name: String,
    /// Group presets, the body's own parents, then the file preset.
    pub parents: Vec<String>,
    /// Subscription body without its `preset` key.
    pub body: Yaml,
    /// Set when written as a bare string.
    pub value: Option<String>,
}

impl SubscriptionDefinition {
    /// Merges the parent chain and the body into one preset document.
    pub fn compose(&self, registry: &PresetRegistry) -> Result<Yaml> {
        registry.compose(&self.name, &self.parents, &self.body)
    }
}

/// A parsed subscription file together with the registry its subscriptions
/// compose against (extended by the file's `__preset__`).
#[derive(Debug, Clone)]
pub struct SubscriptionFile {
    pub registry: PresetRegistry,
    pub subscriptions: Vec<SubscriptionDefinition>,
}

/// Presets and indent values inherited from enclosing group keys.
#[derive(Debug, Clone, Default)]
struct GroupScope {
    presets: Vec<String>,
    indents: Vec<String>,
}

struct Parser<'a> {
    registry: &'a PresetRegistry,
    file_parents: Vec<String>,
    value_key: Option<String>,
    out: Vec<SubscriptionDefinition>,
}

fn overrides_yaml(pairs: impl IntoIterator<Item = (String, String)>) -> Yaml {
    let mut overrides = Mapping::new();
    for (key, value) in pairs {
        overrides.insert(Yaml::String(key), Yaml::String(value));
    }
    let mut body = Mapping::new();
    body.insert(Yaml::String("overrides".to_string()), Yaml::Mapping(overrides));
    Yaml::Mapping(body)
}

impl Parser<'_> {
    /// Components of a group key, or `None` when `key` names a subscription.
    fn group_components(&self, key: &str) -> Option<Vec<String>> {
        let components: Vec<String> = key.split('|').map(|part| part.trim().to_string()).collect();
        let is_group = components
            .iter()
            .all(|part| part.starts_with('=') || self.registry.contains(part));
        is_group.then_some(components)
    }

    fn mapping(&mut self, path: &str, value: &Yaml, scope: &GroupScope) -> ValidationResult<()> {
        let dict = StrictDict::lax(Mode::Full, path, value, &[])?;
        for key in dict.keys() {
            if scope.presets.is_empty() && scope.indents.is_empty() && key.starts_with("__") {
                continue;
            }
            let Some(body) = dict.get(key) else {
                continue;
            };
            let child_path = join_path(path, key);
            match self.group_components(key) {
                Some(components) if body.is_mapping() => {
                    let mut nested = scope.clone();
                    for component in components {
                        match component.strip_prefix('=') {
                            Some(indent) => nested.indents.push(indent.trim().to_string()),
                            None => nested.presets.push(component),
                        }
                    }
                    self.mapping(&child_path, body, &nested)?;
                }
                _ => self.subscription(&child_path, key, body, scope)?,
            }
        }
        Ok(())
    }

    fn subscription(
        &mut self,
        path: &str,
        key: &str,
        value: &Yaml,
        scope: &GroupScope,
    ) -> ValidationResult<()> {
        let indents = scope
            .indents
            .iter()
            .enumerate()
            .map(|(index, indent)| (format!("subscription_indent_{}", index + 1), indent.clone()));
        let mut body = overrides_yaml(indents);
        let mut parents = scope.presets.clone();
        let mut subscription_value = None;

        let name = match key.strip_prefix('~') {
            Some(name) => {
                let values = StrictDict::lax(Mode::Full, path, value, &[])?;
                let mut pairs = Vec::new();
                for override_name in values.keys() {
                    let text = values.get(override_name).and_then(scalar_to_string).ok_or_else(|| {
                        ValidationError::new(
                            join_path(path, override_name),
                            "override values of a '~' subscription must be strings or numbers",
                        )
                    })?;
                    pairs.push((override_name.to_string(), text));
                }
                deep_merge(&mut body, overrides_yaml(pairs));
                name.trim().to_string()
            }
            None => {
                match value {
                    Yaml::Mapping(_) => {
                        parents.extend(parent_names(path, value)?);
                        let mut own = value.clone();
                        if let Yaml::Mapping(mapping) = &mut own {
                            mapping.remove("preset");
                        }
                        deep_merge(&mut body, own);
                    }
                    Yaml::Sequence(_) => parents.extend(Vec::<String>::validate(path, value)?),
                    Yaml::Null => {}
                    scalar => {
                        let text = scalar_to_string(scalar).ok_or_else(|| {
                            ValidationError::new(
                                path,
                                format!("should be a preset, a list of presets or a value, got {}", type_name(scalar)),
                            )
                        })?;
                        let Some(value_key) = &self.value_key else {
                            return Err(ValidationError::new(
                                path,
                                format!("a bare value needs '{FILE_VALUE_KEY}' to be set in the subscription file"),
                            ));
                        };
                        deep_merge(&mut body, overrides_yaml([(value_key.clone(), text.clone())]));
                        subscription_value = Some(text);
                    }
                }
                key.to_string()
            }
        };

        parents.extend(self.file_parents.iter().cloned());
        self.out.push(SubscriptionDefinition {
            name,
            parents,
            body,
            value: subscription_value,
        });
        Ok(())
    }
}

/// Parses an already loaded subscription document.
pub fn parse_subscriptions(path: &str, document: &Yaml, registry: &PresetRegistry) -> Result<SubscriptionFile> {
    let dict = StrictDict::lax(Mode::Full, path, document, &[])?;
    let mut registry = registry.clone();
    let mut file_parents = Vec::new();
    match dict.get(FILE_PRESET_KEY) {
        None => {}
        Some(body @ Yaml::Mapping(_)) => {
            registry.add(FILE_PRESET_KEY, body.clone(), path)?;
            file_parents.push(FILE_PRESET_KEY.to_string());
        }
        Some(names) => file_parents.extend(Vec::<String>::validate(&dict.child_name(FILE_PRESET_KEY), names)?),
    }
    let value_key = dict
        .optional::<String>(FILE_VALUE_KEY)?
        .map(|key| key.trim().to_string());

    let mut parser = Parser {
        registry: &registry,
        file_parents,
        value_key,
        out: Vec::new(),
    };
    parser.mapping(path, document, &GroupScope::default())?;
    let subscriptions = parser.out;
    Ok(SubscriptionFile {
        registry,
        subscriptions,
    })
}

/// Reads and parses a subscription file.
pub fn load_subscription_file(path: &Path, registry: &PresetRegistry) -> Result<SubscriptionFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading subscription file {}", path.display()))?;
    let document: Yaml = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing subscription file {}", path.display()))?;
    parse_subscriptions(&path.display().to_string(), &document, registry)
}
