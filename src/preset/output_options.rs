use serde_yaml::Value as Yaml;

use crate::validators::{
    Mode, OverridesBooleanFormatter, OverridesIntegerFormatter, OverridesStringFormatter,
    StrictDict, StringFormatter, ValidationError, ValidationResult, Validator,
};

pub const DEFAULT_ARCHIVE_NAME: &str = ".ytdl-sub-{subscription_name}-download-archive.json";

/// Where and under which names finished entries are written.
#[derive(Debug, Clone, Default)]
pub struct OutputOptions {
    pub output_directory: OverridesStringFormatter,
    pub file_name: StringFormatter,
    pub thumbnail_name: Option<StringFormatter>,
    pub info_json_name: Option<StringFormatter>,
    pub download_archive_name: OverridesStringFormatter,
    pub maintain_download_archive: OverridesBooleanFormatter,
    pub keep_files_before: Option<OverridesStringFormatter>,
    pub keep_files_after: Option<OverridesStringFormatter>,
    pub keep_max_files: Option<OverridesIntegerFormatter>,
}

impl OutputOptions {
    pub fn keeps_files(&self) -> bool {
        self.keep_files_before.is_some()
            || self.keep_files_after.is_some()
            || self.keep_max_files.is_some()
    }

    /// Entry formatters, all evaluated while saving an entry.
    pub fn entry_formatters(&self) -> impl Iterator<Item = &StringFormatter> {
        std::iter::once(&self.file_name)
            .chain(self.thumbnail_name.iter())
            .chain(self.info_json_name.iter())
    }

    pub fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        let mut formatters = vec![
            &self.output_directory,
            &self.download_archive_name,
            self.maintain_download_archive.inner(),
        ];
        formatters.extend(self.keep_files_before.iter());
        formatters.extend(self.keep_files_after.iter());
        formatters.extend(self.keep_max_files.iter().map(OverridesIntegerFormatter::inner));
        formatters
    }
}

impl Validator for OutputOptions {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(
            mode,
            name,
            value,
            &["output_directory", "file_name"],
            &[
                "thumbnail_name",
                "info_json_name",
                "download_archive_name",
                "maintain_download_archive",
                "keep_files_before",
                "keep_files_after",
                "keep_max_files",
            ],
        )?;
        let default_archive = Yaml::String(DEFAULT_ARCHIVE_NAME.to_string());
        let default_maintain = Yaml::String("True".to_string());
        let options = OutputOptions {
            output_directory: dict.required("output_directory")?,
            file_name: dict.required("file_name")?,
            thumbnail_name: dict.optional("thumbnail_name")?,
            info_json_name: dict.optional("info_json_name")?,
            download_archive_name: match dict.optional("download_archive_name")? {
                Some(name) => name,
                None => OverridesStringFormatter::validate_in(
                    mode,
                    &dict.child_name("download_archive_name"),
                    &default_archive,
                )?,
            },
            maintain_download_archive: match dict.optional("maintain_download_archive")? {
                Some(flag) => flag,
                None => OverridesBooleanFormatter::validate_in(
                    mode,
                    &dict.child_name("maintain_download_archive"),
                    &default_maintain,
                )?,
            },
            keep_files_before: dict.optional("keep_files_before")?,
            keep_files_after: dict.optional("keep_files_after")?,
            keep_max_files: dict.optional("keep_max_files")?,
        };
        if options.keeps_files()
            && dict.get("maintain_download_archive").and_then(Yaml::as_bool) == Some(false)
        {
            return Err(ValidationError::new(
                name,
                "keep_files_before, keep_files_after and keep_max_files require maintain_download_archive",
            ));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn defaults_archive_settings() -> anyhow::Result<()> {
        let options = OutputOptions::validate(
            "output_options",
            &yaml("{output_directory: /media, file_name: '{title}.{ext}'}"),
        )?;
        assert_eq!(options.download_archive_name.source(), DEFAULT_ARCHIVE_NAME);
        assert_eq!(options.maintain_download_archive.inner().source(), "True");
        assert!(!options.keeps_files());
        assert_eq!(options.entry_formatters().count(), 1);
        Ok(())
    }

    #[test]
    fn keep_files_needs_the_archive() {
        let error = OutputOptions::validate(
            "output_options",
            &yaml(
                "{output_directory: /m, file_name: f, maintain_download_archive: false, keep_files_after: today-1week}",
            ),
        )
        .unwrap_err();
        assert!(error.message().contains("require maintain_download_archive"));
    }

    #[test]
    fn file_name_is_required() {
        let error = OutputOptions::validate("output_options", &yaml("{output_directory: /m}")).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Validation error in output_options: missing the required field 'file_name'"
        );
        assert!(OutputOptions::partial_validate("output_options", &yaml("{output_directory: /m}")).is_ok());
    }
}
