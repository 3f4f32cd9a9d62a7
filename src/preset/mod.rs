//! Preset composition: parent chains, deep merging and validation into a
//! typed [`Preset`].

mod output_options;
mod overrides;
mod prebuilt;

use std::collections::{BTreeMap, BTreeSet};

use serde_yaml::{Mapping, Value as Yaml};

use crate::error::{Error, Result};
use crate::plugins::{PluginSet, plugin_keys};
use crate::script::find_cycle;
use crate::validators::{
    Mode, StrictDict, ValidationError, ValidationResult, Validator, join_path, type_name,
};

pub use output_options::{DEFAULT_ARCHIVE_NAME, OutputOptions};
pub use overrides::{Overrides, is_valid_name};

/// Merges `overlay` into `base`. Mappings merge key by key; everything else,
/// lists included, is replaced.
pub fn deep_merge(base: &mut Yaml, overlay: Yaml) {
    match (base, overlay) {
        (Yaml::Mapping(base), Yaml::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Parent names of a preset body, from its `preset` key.
pub fn parent_names(name: &str, body: &Yaml) -> ValidationResult<Vec<String>> {
    match body.get("preset") {
        None | Some(Yaml::Null) => Ok(Vec::new()),
        Some(value) => Vec::<String>::validate(&join_path(name, "preset"), value),
    }
}

fn without_parents(body: &Yaml) -> Yaml {
    let mut body = body.clone();
    if let Yaml::Mapping(mapping) = &mut body {
        mapping.remove("preset");
    }
    body
}

/// Every preset a subscription can name: the bundled library plus the
/// config's own.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, Yaml>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry seeded with the presets shipped in the binary.
    pub fn bundled() -> Result<Self> {
        let mut registry = Self::new();
        for (file, text) in prebuilt::BUNDLED {
            let presets: Yaml = serde_yaml::from_str(text)
                .map_err(|error| Error::from(error).context(format!("bundled presets {file}")))?;
            registry.add_all(&presets, file)?;
        }
        Ok(registry)
    }

    /// Adds one preset. A name may only be defined once.
    pub fn add(&mut self, name: &str, body: Yaml, path: &str) -> ValidationResult<()> {
        if self.presets.contains_key(name) {
            return Err(ValidationError::new(
                join_path(path, name),
                format!("preset '{name}' is defined more than once"),
            ));
        }
        if !body.is_mapping() {
            return Err(ValidationError::new(
                join_path(path, name),
                format!("should be of type object, got {}", type_name(&body)),
            ));
        }
        self.presets.insert(name.to_string(), body);
        Ok(())
    }

    /// Adds every entry of a `name: body` mapping, e.g. the config's `presets`.
    pub fn add_all(&mut self, presets: &Yaml, path: &str) -> ValidationResult<()> {
        let dict = StrictDict::lax(Mode::Full, path, presets, &[])?;
        for name in dict.keys() {
            if let Some(body) = dict.get(name) {
                self.add(name, body.clone(), path)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Yaml> {
        self.presets.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    fn lookup(&self, name: &str, referrer: &str) -> ValidationResult<&Yaml> {
        self.get(name).ok_or_else(|| {
            ValidationError::new(
                join_path(referrer, "preset"),
                format!("preset '{name}' does not exist"),
            )
        })
    }

    /// Fails on the first reference cycle reachable from `roots`.
    fn check_cycles(&self, roots: &[String], referrer: &str) -> Result<()> {
        let mut reachable = BTreeSet::new();
        let mut pending: Vec<(String, String)> = roots
            .iter()
            .map(|root| (root.clone(), referrer.to_string()))
            .collect();
        while let Some((name, from)) = pending.pop() {
            if !reachable.insert(name.clone()) {
                continue;
            }
            let body = self.lookup(&name, &from)?;
            for parent in parent_names(&name, body)? {
                pending.push((parent, name.clone()));
            }
        }
        let edges = |name: &str| {
            self.get(name)
                .and_then(|body| parent_names(name, body).ok())
                .unwrap_or_default()
        };
        match find_cycle(reachable, edges) {
            Some(cycle) => Err(Error::PresetCycle(cycle.join(" -> "))),
            None => Ok(()),
        }
    }

    fn expand(&self, name: &str) -> Result<Yaml> {
        let body = self.lookup(name, name)?;
        let mut merged = Yaml::Mapping(Mapping::new());
        for parent in parent_names(name, body)? {
            deep_merge(&mut merged, self.expand(&parent)?);
        }
        deep_merge(&mut merged, without_parents(body));
        Ok(merged)
    }

    /// Applies `parents` left to right, then `body`'s own `preset` chain, then
    /// `body` itself.
    pub fn compose(&self, name: &str, parents: &[String], body: &Yaml) -> Result<Yaml> {
        let mut chain = parents.to_vec();
        chain.extend(parent_names(name, body)?);
        self.check_cycles(&chain, name)?;
        let mut merged = Yaml::Mapping(Mapping::new());
        for parent in &chain {
            deep_merge(&mut merged, self.expand(parent)?);
        }
        deep_merge(&mut merged, without_parents(body));
        Ok(merged)
    }
}

/// A fully merged and validated preset.
#[derive(Debug, Default)]
pub struct Preset {
    name: String,
    raw: Yaml,
    output_options: OutputOptions,
    overrides: Overrides,
    plugins: PluginSet,
}

impl Preset {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The merged YAML this preset was validated from.
    pub fn raw(&self) -> &Yaml {
        &self.raw
    }

    pub fn output_options(&self) -> &OutputOptions {
        &self.output_options
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut Overrides {
        &mut self.overrides
    }

    pub fn plugins(&self) -> &PluginSet {
        &self.plugins
    }
}

impl Validator for Preset {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let mut optional = vec!["preset", "overrides"];
        optional.extend(plugin_keys().filter(|key| *key != "download"));
        let dict = StrictDict::new(mode, name, value, &["download", "output_options"], &optional)?;
        let plugins = PluginSet::from_dict(&dict)?;
        let overrides: Overrides = dict.optional_or("overrides", Overrides::default())?;

        let added: BTreeSet<String> = plugins
            .added_variables()
            .into_iter()
            .flat_map(|(variable, _)| [format!("{variable}_sanitized"), variable])
            .collect();
        if let Some(shadowed) = overrides.variable_names().find(|variable| added.contains(*variable)) {
            return Err(ValidationError::new(
                dict.child_name("overrides"),
                format!("'{shadowed}' cannot be used as an override name, a plugin defines it"),
            ));
        }

        Ok(Preset {
            name: name.to_string(),
            raw: without_parents(value),
            output_options: dict.required("output_options")?,
            overrides,
            plugins,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    fn registry(text: &str) -> PresetRegistry {
        let mut registry = PresetRegistry::new();
        registry.add_all(&yaml(text), "presets").unwrap();
        registry
    }

    #[test]
    fn deep_merge_replaces_lists() {
        let mut base = yaml("{a: {x: 1, y: [1, 2]}, b: keep}");
        deep_merge(&mut base, yaml("{a: {y: [3], z: 4}, c: new}"));
        assert_eq!(base, yaml("{a: {x: 1, y: [3], z: 4}, b: keep, c: new}"));
    }

    #[test]
    fn chain_merges_left_to_right() -> anyhow::Result<()> {
        let registry = registry(
            "{A: {nfo_tags: {tags: {k1: A}}},
              B: {preset: A, nfo_tags: {tags: {k2: B}}},
              C: {preset: B, nfo_tags: {tags: {k2: C, k3: C}}}}",
        );
        let merged = registry.compose("sub", &["C".to_string()], &yaml("{}"))?;
        assert_eq!(merged, yaml("{nfo_tags: {tags: {k1: A, k2: C, k3: C}}}"));
        Ok(())
    }

    #[test]
    fn parents_apply_before_body() -> anyhow::Result<()> {
        let registry = registry("{base: {overrides: {a: base, b: base}}, other: {overrides: {b: other}}}");
        let merged = registry.compose(
            "sub",
            &["base".to_string()],
            &yaml("{preset: other, overrides: {a: sub}}"),
        )?;
        assert_eq!(merged, yaml("{overrides: {a: sub, b: other}}"));
        Ok(())
    }

    #[test]
    fn cycles_name_every_preset() {
        let registry = registry("{a: {preset: b}, b: {preset: [c]}, c: {preset: a}, d: {preset: d}}");
        let error = registry.compose("sub", &["a".to_string()], &yaml("{}")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Cycle detected within these presets: a -> b -> c -> a"
        );
        let error = registry.compose("sub", &["d".to_string()], &yaml("{}")).unwrap_err();
        assert_eq!(error.to_string(), "Cycle detected within these presets: d -> d");
    }

    #[test]
    fn unknown_and_duplicate_presets_fail() {
        let mut registry = registry("{a: {}}");
        let error = registry.compose("sub", &["missing".to_string()], &yaml("{}")).unwrap_err();
        assert!(error.to_string().contains("preset 'missing' does not exist"));
        assert!(registry.add("a", yaml("{}"), "presets").is_err());
    }

    #[test]
    fn bundled_presets_compose() -> anyhow::Result<()> {
        let registry = PresetRegistry::bundled()?;
        for name in ["Jellyfin TV Show by Date", "Kodi TV Show by Date", "Albums from Chapters"] {
            let merged = registry.compose("sub", &[name.to_string()], &yaml("{overrides: {url: 'https://x'}}"))?;
            Preset::validate(name, &merged)?;
        }
        Ok(())
    }

    #[test]
    fn validates_into_typed_parts() -> anyhow::Result<()> {
        let preset = Preset::validate(
            "sub",
            &yaml(
                "{download: 'https://x', format: best,
                  output_options: {output_directory: /m, file_name: '{title}.{ext}'},
                  overrides: {show: Foo}}",
            ),
        )?;
        assert_eq!(preset.overrides().get("show"), Some("Foo"));
        assert_eq!(preset.plugins().iter().count(), 2);
        assert!(Preset::validate("sub", &yaml("{download: x}")).is_err());
        assert!(Preset::partial_validate("sub", &yaml("{download: x}")).is_ok());
        Ok(())
    }

    #[test]
    fn overrides_cannot_shadow_plugin_variables() {
        let error = Preset::validate(
            "sub",
            &yaml(
                "{download: x, split_by_chapters: {when_no_chapters: pass},
                  output_options: {output_directory: /m, file_name: f},
                  overrides: {chapter_title: nope}}",
            ),
        )
        .unwrap_err();
        assert!(error.message().contains("chapter_title"));
    }
}
