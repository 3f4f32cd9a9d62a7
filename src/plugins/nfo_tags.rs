//! Kodi/Jellyfin style `.nfo` XML files.

use std::fmt::Write as _;
use std::fs;

use anyhow::Context;
use serde_yaml::Value as Yaml;

use super::{Plugin, PluginContext, PluginOperation};
use crate::entries::Entry;
use crate::error::{Error, Result};
use crate::file_handler::OutputWriter;
use crate::transaction_log::FileMetadata;
use crate::validators::{
    Mode, OverridesStringFormatter, StrictDict, StringFormatter, ValidationError, ValidationResult,
    Validator, join_path, scalar_to_string, type_name,
};

/// One XML element: either a bare value or `{attributes: {...}, tag: value}`.
#[derive(Debug, Clone, Default)]
struct NfoTag<F> {
    attributes: Vec<(String, F)>,
    value: F,
}

impl<F: Validator + Default> Validator for NfoTag<F> {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        if !value.is_mapping() {
            return Ok(NfoTag {
                attributes: Vec::new(),
                value: F::validate_in(mode, name, value)?,
            });
        }
        let dict = StrictDict::new(mode, name, value, &["tag"], &["attributes"])?;
        let mut attributes = Vec::new();
        if let Some(Yaml::Mapping(mapping)) = dict.get("attributes") {
            for (key, item) in mapping {
                let key = scalar_to_string(key)
                    .ok_or_else(|| ValidationError::new(name, "attribute names must be strings"))?;
                let formatter = F::validate_in(mode, &join_path(&dict.child_name("attributes"), &key), item)?;
                attributes.push((key, formatter));
            }
        } else if let Some(other) = dict.get("attributes") {
            return Err(ValidationError::new(
                dict.child_name("attributes"),
                format!("should be of type object, got {}", type_name(other)),
            ));
        }
        Ok(NfoTag {
            attributes,
            value: dict.required("tag")?,
        })
    }
}

/// Ordered tag name to one or more elements.
#[derive(Debug, Clone, Default)]
struct NfoTags<F> {
    tags: Vec<(String, Vec<NfoTag<F>>)>,
}

impl<F: Validator + Default> Validator for NfoTags<F> {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let Yaml::Mapping(mapping) = value else {
            return Err(ValidationError::new(
                name,
                format!("should be of type object, got {}", type_name(value)),
            ));
        };
        let mut tags = Vec::with_capacity(mapping.len());
        for (key, item) in mapping {
            let key = scalar_to_string(key)
                .ok_or_else(|| ValidationError::new(name, "tag names must be strings"))?;
            let path = join_path(name, &key);
            tags.push((key, Vec::<NfoTag<F>>::validate_in(mode, &path, item)?));
        }
        Ok(NfoTags { tags })
    }
}

impl<F> NfoTags<F> {
    fn formatters(&self) -> impl Iterator<Item = &F> {
        self.tags.iter().flat_map(|(_, elements)| {
            elements.iter().flat_map(|element| {
                element
                    .attributes
                    .iter()
                    .map(|(_, formatter)| formatter)
                    .chain(std::iter::once(&element.value))
            })
        })
    }

    fn resolve(&self, resolve: impl Fn(&F) -> Result<String>) -> Result<Vec<ResolvedTag>> {
        let mut resolved = Vec::new();
        for (name, elements) in &self.tags {
            for element in elements {
                let attributes = element
                    .attributes
                    .iter()
                    .map(|(key, formatter)| Ok::<_, Error>((key.clone(), resolve(formatter)?)))
                    .collect::<Result<Vec<_>>>()?;
                resolved.push(ResolvedTag {
                    name: name.clone(),
                    attributes,
                    value: resolve(&element.value)?,
                });
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ResolvedTag {
    name: String,
    attributes: Vec<(String, String)>,
    value: String,
}

fn escape_xml(text: &str, kodi_safe: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Kodi cannot display characters outside the basic multilingual plane.
            c if kodi_safe && c.len_utf8() > 3 => out.push('□'),
            c => out.push(c),
        }
    }
    out
}

fn render_xml(root: &str, tags: &[ResolvedTag], kodi_safe: bool) -> String {
    let root = escape_xml(root, kodi_safe);
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>\n");
    let _ = writeln!(xml, "<{root}>");
    for tag in tags {
        let name = escape_xml(&tag.name, kodi_safe);
        let _ = write!(xml, "  <{name}");
        for (key, value) in &tag.attributes {
            let _ = write!(xml, " {}=\"{}\"", escape_xml(key, kodi_safe), escape_xml(value, kodi_safe));
        }
        let _ = writeln!(xml, ">{}</{name}>", escape_xml(&tag.value, kodi_safe));
    }
    let _ = writeln!(xml, "</{root}>");
    xml
}

fn tags_metadata(title: &str, tags: &[ResolvedTag]) -> FileMetadata {
    FileMetadata::from_pairs(title, tags.iter().map(|tag| (tag.name.clone(), tag.value.clone())))
}

/// Writes `xml` into the working directory and hands it to the output writer.
fn save_nfo(
    ctx: &PluginContext<'_>,
    output: &mut OutputWriter<'_>,
    scratch_name: &str,
    relative: &str,
    xml: &str,
    metadata: FileMetadata,
) -> Result<()> {
    let scratch = ctx.working_directory.join(scratch_name);
    fs::write(&scratch, xml).with_context(|| format!("writing {}", scratch.display()))?;
    output.save_file(&scratch, relative, Some(metadata))
}

/// One NFO file per entry.
#[derive(Debug)]
pub struct NfoTagsPlugin {
    nfo_name: StringFormatter,
    nfo_root: StringFormatter,
    tags: NfoTags<StringFormatter>,
    kodi_safe: bool,
}

impl Validator for NfoTagsPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &["nfo_name", "nfo_root", "tags"], &["kodi_safe"])?;
        Ok(NfoTagsPlugin {
            nfo_name: dict.required("nfo_name")?,
            nfo_root: dict.required("nfo_root")?,
            tags: dict.required("tags")?,
            kodi_safe: dict.optional_or("kodi_safe", false)?,
        })
    }
}

impl Plugin for NfoTagsPlugin {
    fn name(&self) -> &'static str {
        "nfo_tags"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcess]
    }

    fn formatters(&self) -> Vec<(&StringFormatter, PluginOperation)> {
        [&self.nfo_name, &self.nfo_root]
            .into_iter()
            .chain(self.tags.formatters())
            .map(|formatter| (formatter, PluginOperation::PostProcess))
            .collect()
    }

    fn post_process_entry(
        &self,
        entry: &Entry,
        ctx: &PluginContext<'_>,
        output: &mut OutputWriter<'_>,
    ) -> Result<Option<FileMetadata>> {
        let tags = self.tags.resolve(|formatter| ctx.resolve(formatter, entry))?;
        let root = ctx.resolve(&self.nfo_root, entry)?;
        let relative = ctx.resolve(&self.nfo_name, entry)?;
        let xml = render_xml(&root, &tags, self.kodi_safe);
        let metadata = tags_metadata(&format!("NFO tags ({root})"), &tags);
        save_nfo(ctx, output, &format!("{}.nfo", entry.file_stem()), &relative, &xml, metadata)?;
        Ok(None)
    }
}

/// A single NFO describing the whole output directory, e.g. `tvshow.nfo`.
#[derive(Debug)]
pub struct OutputDirectoryNfoTagsPlugin {
    nfo_name: OverridesStringFormatter,
    nfo_root: OverridesStringFormatter,
    tags: NfoTags<OverridesStringFormatter>,
    kodi_safe: bool,
}

impl Validator for OutputDirectoryNfoTagsPlugin {
    fn validate_in(mode: Mode, name: &str, value: &Yaml) -> ValidationResult<Self> {
        let dict = StrictDict::new(mode, name, value, &["nfo_name", "nfo_root", "tags"], &["kodi_safe"])?;
        Ok(OutputDirectoryNfoTagsPlugin {
            nfo_name: dict.required("nfo_name")?,
            nfo_root: dict.required("nfo_root")?,
            tags: dict.required("tags")?,
            kodi_safe: dict.optional_or("kodi_safe", false)?,
        })
    }
}

impl Plugin for OutputDirectoryNfoTagsPlugin {
    fn name(&self) -> &'static str {
        "output_directory_nfo_tags"
    }

    fn operations(&self) -> &'static [PluginOperation] {
        &[PluginOperation::PostProcessSubscription]
    }

    fn overrides_formatters(&self) -> Vec<&OverridesStringFormatter> {
        [&self.nfo_name, &self.nfo_root]
            .into_iter()
            .chain(self.tags.formatters())
            .collect()
    }

    fn post_process_subscription(
        &self,
        ctx: &PluginContext<'_>,
        output: &mut OutputWriter<'_>,
    ) -> Result<()> {
        let resolve = |formatter: &OverridesStringFormatter| -> Result<String> {
            Ok(formatter.resolve(ctx.script)?)
        };
        let tags = self.tags.resolve(resolve)?;
        let root = resolve(&self.nfo_root)?;
        let relative = resolve(&self.nfo_name)?;
        let xml = render_xml(&root, &tags, self.kodi_safe);
        let metadata = tags_metadata(&format!("NFO tags ({root})"), &tags);
        save_nfo(ctx, output, "output_directory.nfo", &relative, &xml, metadata)
    }
}
