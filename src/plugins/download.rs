use std::collections::BTreeSet;

use serde_yaml::Value as Yaml;

use super::{Plugin, PluginOperation};
use crate::validators::{
    DictFormatter, Mode, OverridesStringFormatter, StrictDict, StringFormatter, ValidationError,
    ValidationResult, Validator,
};

/// One url to download plus the variables its entries receive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadUrl {
    pub url: OverridesStringFormatter,
    pub variables: DictFormatter,
}

impl Validator for DownloadUrl {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        if !value.is_mapping() {
            return Ok(DownloadUrl {
                url: OverridesStringFormatter::validate_in(mode, name, value)?,
                variables: DictFormatter::default(),
            });
        }
        let dict = StrictDict::new(mode, name, value, &["url"], &["variables"])?;
        Ok(DownloadUrl {
            url: dict.required("url")?,
            variables: dict.optional_or("variables", DictFormatter::default())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOptions {
    urls: Vec<DownloadUrl>,
}

impl DownloadOptions {
    pub fn urls(&self) -> &[DownloadUrl] {
        &self.urls
    }

    fn variable_names(&self) -> BTreeSet<String> {
        self.urls
            .iter()
            .flat_map(|url| url.variables.keys().map(str::to_string))
            .collect()
    }
}

impl Validator for DownloadOptions {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let urls = Vec::<DownloadUrl>::validate_in(mode, name, value)?;
        let options = DownloadOptions { urls };
        let expected = options.variable_names();
        for (index, url) in options.urls.iter().enumerate() {
            let defined: BTreeSet<String> = url.variables.keys().map(str::to_string).collect();
            if defined != expected {
                let missing: Vec<&str> = expected.difference(&defined).map(String::as_str).collect();
                return Err(ValidationError::new(
                    format!("{name}[{index}].variables"),
                    format!(
                        "every url must define the same variables, missing: {}",
                        missing.join(", ")
                    ),
                ));
            }
        }
        Ok(options)
    }
}

#[derive(Debug)]
pub struct DownloadPlugin {
    options: DownloadOptions,
}

impl Validator for DownloadPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        Ok(DownloadPlugin {
            options: DownloadOptions::validate_in(mode, name, value)?,
        })
    }
}

impl Plugin for DownloadPlugin {
    fn name(&self) -> &'static str {
        "download"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::Downloader]
    }

    fn added_variables(&self) -> Vec<(String, PluginOperation)> {
        self.options
            .variable_names()
            .into_iter()
            .map(|name| (name, PluginOperation::Downloader))
            .collect()
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        self.options
            .urls
            .iter()
            .flat_map(|url| url.variables.iter().map(|(_, formatter)| formatter))
            .map(|formatter| (formatter, PluginOperation::Downloader))
            .collect()
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        self.options.urls.iter().map(|url| &url.url).collect()
    }

    fn as_downloader(&self) -> Option<&DownloadOptions> {
        Some(&self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::yaml;
    use super::*;

    #[test]
    fn accepts_every_url_shape() -> anyhow::Result<()> {
        let single = DownloadOptions::validate("download", &yaml("'https://a'"))?;
        assert_eq!(single.urls()[0].url.source(), "https://a");

        let mixed = DownloadOptions::validate(
            "download",
            &yaml("[{url: 'https://a', variables: {season: '1'}}, {url: 'https://b', variables: {season: '2'}}]"),
        )?;
        assert_eq!(mixed.urls().len(), 2);
        assert_eq!(mixed.variable_names().into_iter().collect::<Vec<_>>(), ["season"]);
        Ok(())
    }

    #[test]
    fn urls_must_share_variables() {
        let error = DownloadOptions::validate(
            "download",
            &yaml("[{url: a, variables: {season: '1'}}, {url: b}]"),
        )
        .unwrap_err();
        assert_eq!(error.path(), "download[1].variables");
        assert!(error.message().contains("season"));
    }

    #[test]
    fn added_variables_are_available_from_the_downloader_phase() -> anyhow::Result<()> {
        let plugin = DownloadPlugin::validate("download", &yaml("{url: a, variables: {season: '1'}}"))?;
        assert_eq!(
            plugin.added_variables(),
            vec![("season".to_string(), PluginOperation::Downloader)]
        );
        Ok(())
    }
}
