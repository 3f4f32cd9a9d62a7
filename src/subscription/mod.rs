//! Subscriptions: a name, a validated preset and the run that applies it.

mod executor;
mod file;

pub use executor::{Executor, RunSettings, archive_path, build_script, fit_file_name};
pub use file::{
    FILE_PRESET_KEY, FILE_VALUE_KEY, SubscriptionDefinition, SubscriptionFile,
    load_subscription_file, parse_subscriptions,
};

use crate::error::Result;
use crate::preset::{Preset, PresetRegistry};
use crate::validators::Validator;

#[derive(Debug)]
pub struct Subscription {
    name: String,
    value: Option<String>,
    preset: Preset,
}

impl Subscription {
    pub fn new(name: impl Into<String>, value: Option<String>, preset: Preset) -> Self {
        Subscription {
            name: name.into(),
            value,
            preset,
        }
    }

    /// Composes and fully validates the preset of `definition`.
    pub fn from_definition(definition: &SubscriptionDefinition, registry: &PresetRegistry) -> Result<Self> {
        let merged = definition.compose(registry)?;
        let preset = Preset::validate(&definition.name, &merged)?;
        Ok(Subscription::new(&definition.name, definition.value.clone(), preset))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bare value the subscription was written with, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn preset(&self) -> &Preset {
        &self.preset
    }
}
