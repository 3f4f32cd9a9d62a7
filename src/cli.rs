//! Command-line surface: `sub`, `dl`, `view` and `inspect`.

use std::collections::BTreeMap;
use std::fs;
use std::mem;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde_yaml::{Mapping, Value as Yaml};
use tracing::{error, info, warn};

use crate::archive::ArchiveIndex;
use crate::config::{Config, ConfigOverrides, load_config};
use crate::downloader::{FetchOptions, Fetcher, YtDlp};
use crate::entries::{Entry, entry_variable_names, entry_variables};
use crate::ffmpeg::Ffmpeg;
use crate::logging::{self, LogHandle, LogLevel};
use crate::plugins::{PluginContext, PluginSet};
use crate::preset::{Preset, PresetRegistry, parent_names};
use crate::script::Script;
use crate::subscription::{
    Executor, RunSettings, Subscription, SubscriptionDefinition, archive_path, build_script,
    load_subscription_file,
};
use crate::system;
use crate::validators::{Mode, StrictDict, Validator};

pub const DEFAULT_SUBSCRIPTIONS_PATH: &str = "subscriptions.yaml";

#[derive(Debug, Parser)]
#[command(
    name = "ytdl-sub",
    version,
    about = "Download media from subscriptions and lay it out for media servers"
)]
pub struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Preview what would change without touching the output directory.
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,

    #[arg(short = 'l', long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub log_level: LogLevel,

    /// Overrides `configuration.working_directory`.
    #[arg(long, global = true)]
    pub working_directory: Option<PathBuf>,

    /// Also write every transaction log to this file.
    #[arg(long, global = true)]
    pub transaction_log: Option<PathBuf>,

    /// Do not print transaction logs.
    #[arg(long, global = true)]
    pub suppress_transaction_log: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process subscription files.
    Sub {
        #[arg(default_value = DEFAULT_SUBSCRIPTIONS_PATH)]
        paths: Vec<PathBuf>,
        /// Only run subscriptions whose name contains this text.
        #[arg(short = 'm', long = "match")]
        matches: Vec<String>,
    },
    /// Download with a preset given as `--dotted.key value` pairs.
    Dl {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print the variables of every entry behind a URL.
    View {
        url: String,
        #[arg(long)]
        split_chapters: bool,
    },
    /// Print the merged preset and override values of each subscription.
    Inspect {
        #[arg(default_value = DEFAULT_SUBSCRIPTIONS_PATH)]
        paths: Vec<PathBuf>,
    },
}

/// Splits an alias expansion into tokens, honouring single and double quotes.
pub fn split_words(text: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for ch in text.chars() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => current.push(ch),
            None if ch == '"' || ch == '\'' => {
                quote = Some(ch);
                in_word = true;
            }
            None if ch.is_whitespace() => {
                if in_word {
                    words.push(mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(ch);
                in_word = true;
            }
        }
    }
    if quote.is_some() {
        bail!("unterminated quote in '{text}'");
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Replaces every `--alias` token with its configured expansion.
pub fn expand_aliases(tokens: &[String], aliases: &BTreeMap<String, String>) -> Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token.strip_prefix("--").and_then(|name| aliases.get(name)) {
            Some(expansion) => expanded.extend(
                split_words(expansion).with_context(|| format!("expanding alias '{token}'"))?,
            ),
            None => expanded.push(token.clone()),
        }
    }
    Ok(expanded)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_segments(key: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in key.split('.') {
        let (name, mut rest) = match part.find('[') {
            Some(open) => part.split_at(open),
            None => (part, ""),
        };
        if name.is_empty() {
            bail!("'--{key}' has an empty key");
        }
        segments.push(Segment::Key(name.to_string()));
        while !rest.is_empty() {
            let Some((index, tail)) = rest
                .strip_prefix('[')
                .and_then(|inner| inner.split_once(']'))
            else {
                bail!("'--{key}' has a malformed list index");
            };
            let index = index
                .parse()
                .with_context(|| format!("'--{key}' has a non-numeric list index"))?;
            segments.push(Segment::Index(index));
            rest = tail;
        }
    }
    Ok(segments)
}

/// Builder for the `dl` preset. List indices only order the items.
#[derive(Debug, Default)]
enum Node {
    #[default]
    Empty,
    Value(Yaml),
    Map(BTreeMap<String, Node>),
    List(BTreeMap<usize, Node>),
}

impl Node {
    fn insert(&mut self, segments: &[Segment], value: Yaml, key: &str) -> Result<()> {
        let Some((first, rest)) = segments.split_first() else {
            if !matches!(self, Node::Empty) {
                bail!("'--{key}' is given more than once");
            }
            *self = Node::Value(value);
            return Ok(());
        };
        if matches!(self, Node::Empty) {
            *self = match first {
                Segment::Key(_) => Node::Map(BTreeMap::new()),
                Segment::Index(_) => Node::List(BTreeMap::new()),
            };
        }
        let child = match (self, first) {
            (Node::Map(children), Segment::Key(name)) => children.entry(name.clone()).or_default(),
            (Node::List(children), Segment::Index(index)) => children.entry(*index).or_default(),
            _ => bail!("'--{key}' conflicts with another argument"),
        };
        child.insert(rest, value, key)
    }

    fn into_yaml(self) -> Yaml {
        match self {
            Node::Empty => Yaml::Null,
            Node::Value(value) => value,
            Node::Map(children) => Yaml::Mapping(
                children
                    .into_iter()
                    .map(|(key, child)| (Yaml::String(key), child.into_yaml()))
                    .collect::<Mapping>(),
            ),
            Node::List(children) => Yaml::Sequence(children.into_values().map(Node::into_yaml).collect()),
        }
    }
}

/// A YAML scalar, or the raw text when it does not parse as one.
fn parse_scalar(text: &str) -> Yaml {
    match serde_yaml::from_str::<Yaml>(text) {
        Ok(value @ (Yaml::Bool(_) | Yaml::Number(_) | Yaml::String(_))) => value,
        _ => Yaml::String(text.to_string()),
    }
}

/// Turns `--a.b[0].c value` pairs into a preset document.
pub fn dl_preset(tokens: &[String]) -> Result<Yaml> {
    if tokens.len() % 2 != 0 {
        bail!("dl arguments must be '--key value' pairs, got {} tokens", tokens.len());
    }
    let mut root = Node::Map(BTreeMap::new());
    for pair in tokens.chunks(2) {
        let [flag, value] = pair else {
            continue;
        };
        let Some(key) = flag.strip_prefix("--") else {
            bail!("expected an argument starting with '--', got '{flag}'");
        };
        root.insert(&parse_segments(key)?, parse_scalar(value), key)?;
    }
    Ok(root.into_yaml())
}

fn dl_definition(tokens: &[String]) -> Result<SubscriptionDefinition> {
    let mut body = dl_preset(tokens)?;
    let hash = blake3::hash(tokens.join("\n").as_bytes());
    let name = format!("dl-{}", &hash.to_hex().as_str()[..8]);
    let parents = parent_names(&name, &body)?;
    if let Yaml::Mapping(mapping) = &mut body {
        mapping.remove("preset");
    }
    Ok(SubscriptionDefinition {
        name,
        parents,
        body,
        value: None,
    })
}

fn name_matches(name: &str, matches: &[String]) -> bool {
    matches.is_empty() || matches.iter().any(|needle| name.contains(needle.as_str()))
}

struct App<'a> {
    cli: &'a Cli,
    log: &'a LogHandle,
    config: Config,
    registry: PresetRegistry,
    transcoder: Ffmpeg,
    fetcher: YtDlp,
}

impl App<'_> {
    fn settings(&self) -> RunSettings {
        RunSettings {
            working_directory: self.config.working_directory.clone(),
            lock_directory: self.config.lock_directory.clone(),
            dry_run: self.cli.dry_run,
            experimental: self.config.experimental.clone(),
        }
    }

    fn ensure_tools(&self) -> Result<()> {
        system::ensure_program_available(self.fetcher.program(), "--version")?;
        system::ensure_program_available(&self.config.ffmpeg_path, "-version")?;
        system::ensure_program_available(&self.config.ffprobe_path, "-version")
    }

    /// Runs each subscription, reporting failures without stopping the rest.
    fn run_subscriptions(&self, definitions: &[(SubscriptionDefinition, PresetRegistry)]) -> Result<bool> {
        let settings = self.settings();
        let executor = Executor::new(&self.fetcher, &self.transcoder, &settings);
        let mut reports = Vec::new();
        let mut all_succeeded = true;

        for (definition, registry) in definitions {
            if system::interrupted() {
                warn!("Interrupted, skipping the remaining subscriptions");
                all_succeeded = false;
                break;
            }
            let outcome = Subscription::from_definition(definition, registry)
                .and_then(|subscription| executor.run(&subscription));
            let succeeded = match outcome {
                Ok(transaction_log) => {
                    let report = transaction_log.to_output_message();
                    if !self.cli.suppress_transaction_log {
                        println!("{}", report);
                    }
                    reports.push(format!("{}\n{}", definition.name, report));
                    true
                }
                Err(err) => {
                    error!("Subscription '{}' failed: {:#}", definition.name, err);
                    false
                }
            };
            all_succeeded &= succeeded;
            if let Some(persist) = &self.config.persist_logs
                && let Err(err) = logging::persist_log(
                    self.log.debug_log_path(),
                    persist,
                    &definition.name,
                    succeeded,
                    Local::now().naive_local(),
                )
            {
                warn!("Could not keep the log of '{}': {:#}", definition.name, err);
            }
        }

        if let Some(path) = &self.cli.transaction_log {
            fs::write(path, reports.join("\n\n"))
                .with_context(|| format!("writing transaction log {}", path.display()))?;
        }
        Ok(all_succeeded)
    }

    fn sub(&self, paths: &[PathBuf], matches: &[String]) -> Result<bool> {
        let mut definitions = Vec::new();
        for path in paths {
            let file = load_subscription_file(path, &self.registry)?;
            for definition in file.subscriptions {
                if name_matches(&definition.name, matches) {
                    definitions.push((definition, file.registry.clone()));
                }
            }
        }
        if definitions.is_empty() {
            warn!("No subscriptions to run");
            return Ok(true);
        }
        self.ensure_tools()?;
        info!("Running {} subscription(s)", definitions.len());
        self.run_subscriptions(&definitions)
    }

    fn dl(&self, args: &[String]) -> Result<bool> {
        let tokens = expand_aliases(args, &self.config.dl_aliases)?;
        let definition = dl_definition(&tokens)?;
        self.ensure_tools()?;
        self.run_subscriptions(&[(definition, self.registry.clone())])
    }

    fn view(&self, url: &str, split_chapters: bool) -> Result<()> {
        system::ensure_program_available(self.fetcher.program(), "--version")?;
        let working = tempfile::tempdir().context("creating a scratch directory")?;
        let plugins = if split_chapters {
            let document: Yaml = serde_yaml::from_str("{split_by_chapters: {when_no_chapters: pass}}")?;
            PluginSet::from_dict(&StrictDict::lax(Mode::Full, "view", &document, &[])?)?
        } else {
            PluginSet::default()
        };
        let mut script = Script::new();
        script.declare(entry_variable_names());
        script.declare(plugins.added_variables().into_iter().map(|(name, _)| name));
        let ctx = PluginContext {
            script: &script,
            transcoder: &self.transcoder,
            working_directory: working.path(),
            dry_run: true,
        };

        for metadata in self
            .fetcher
            .extract_metadata(url, &FetchOptions::new(), working.path())?
        {
            let entry = Entry::new(metadata, working.path())?;
            let entries = match plugins.split_plugin() {
                Some(plugin) => plugin.split_entry(entry, &ctx)?,
                None => vec![entry],
            };
            for entry in entries {
                println!("{}:", entry.title());
                for (name, value) in entry_variables(&entry) {
                    println!("  {name}: {value}");
                }
            }
        }
        Ok(())
    }

    fn inspect(&self, paths: &[PathBuf]) -> Result<()> {
        let mut archives = ArchiveIndex::default();
        for path in paths {
            let file = load_subscription_file(path, &self.registry)?;
            for definition in &file.subscriptions {
                let merged = definition.compose(&file.registry)?;
                let preset = Preset::validate_in(Mode::Partial, &definition.name, &merged)?;
                let script = build_script(
                    &definition.name,
                    definition.value.as_deref(),
                    &preset,
                    &self.config.experimental,
                )?;

                println!("{}:", definition.name);
                for line in serde_yaml::to_string(&merged)?.lines() {
                    println!("  {line}");
                }
                println!("  # override values");
                for (name, _) in preset.overrides().iter() {
                    if let Some(value) = script.get(name) {
                        println!("  {name}: {value}");
                    } else if let Some(tree) = script.definition(name) {
                        println!("  {name}: {tree}");
                    }
                }
                match archive_path(&preset, &script) {
                    Ok(archive) => archives.insert(definition.name.as_str(), archive),
                    Err(error) => warn!("No download archive for '{}': {error}", definition.name),
                }
            }
        }
        for (name, archive) in archives.iter() {
            let shared = archives.subscriptions_at(archive);
            if shared.len() > 1 {
                warn!("{} is shared by {}", archive.display(), shared.join(", "));
            }
            println!("# {name} download archive: {}", archive.display());
        }
        Ok(())
    }
}

/// Runs the parsed command line. `Ok(false)` means a subscription failed.
pub fn run(cli: &Cli, log: &LogHandle) -> Result<bool> {
    let config = load_config(ConfigOverrides {
        config_path: cli.config.clone(),
        working_directory: cli.working_directory.clone(),
    })?;
    if let Some(umask) = &config.umask {
        system::apply_umask(umask)?;
    }
    system::install_interrupt_handler()?;
    let registry = config.preset_registry()?;
    let app = App {
        cli,
        log,
        transcoder: Ffmpeg::new(&config.ffmpeg_path, &config.ffprobe_path),
        fetcher: YtDlp::new(),
        registry,
        config,
    };

    match &cli.command {
        Command::Sub { paths, matches } => app.sub(paths, matches),
        Command::Dl { args } => app.dl(args),
        Command::View { url, split_chapters } => app.view(url, *split_chapters).map(|()| true),
        Command::Inspect { paths } => app.inspect(paths).map(|()| true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    fn yaml(text: &str) -> Yaml {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn parses_global_flags_after_the_subcommand() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["ytdl-sub", "sub", "a.yaml", "-d", "-m", "News", "-l", "verbose"])?;
        assert!(cli.dry_run);
        assert_eq!(cli.log_level, LogLevel::Verbose);
        match cli.command {
            Command::Sub { paths, matches } => {
                assert_eq!(paths, [PathBuf::from("a.yaml")]);
                assert_eq!(matches, ["News"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn sub_defaults_to_the_subscriptions_file() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["ytdl-sub", "-c", "my.yaml", "sub"])?;
        assert_eq!(cli.config, Some(PathBuf::from("my.yaml")));
        let Command::Sub { paths, .. } = cli.command else {
            panic!("expected sub");
        };
        assert_eq!(paths, [PathBuf::from(DEFAULT_SUBSCRIPTIONS_PATH)]);
        Ok(())
    }

    #[test]
    fn dl_keeps_dashed_pairs() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["ytdl-sub", "dl", "--download", "https://x", "--mv"])?;
        let Command::Dl { args } = cli.command else {
            panic!("expected dl");
        };
        assert_eq!(args, ["--download", "https://x", "--mv"]);
        Ok(())
    }

    #[test]
    fn words_respect_quotes() -> anyhow::Result<()> {
        assert_eq!(
            split_words("--preset \"Jellyfin Music Videos\" --overrides.x 'a b'")?,
            ["--preset", "Jellyfin Music Videos", "--overrides.x", "a b"]
        );
        assert!(split_words("--preset \"open").is_err());
        Ok(())
    }

    #[test]
    fn aliases_expand_in_place() -> anyhow::Result<()> {
        let aliases = BTreeMap::from([(
            "mv".to_string(),
            "--preset \"Jellyfin Music Videos\"".to_string(),
        )]);
        let expanded = expand_aliases(&strings(&["--mv", "--download", "https://x"]), &aliases)?;
        assert_eq!(expanded, ["--preset", "Jellyfin Music Videos", "--download", "https://x"]);
        Ok(())
    }

    #[test]
    fn dl_pairs_build_nested_presets() -> anyhow::Result<()> {
        let preset = dl_preset(&strings(&[
            "--download[1].url",
            "https://b",
            "--download[0].url",
            "https://a",
            "--output_options.maintain_download_archive",
            "false",
            "--overrides.season",
            "2",
        ]))?;
        assert_eq!(
            preset,
            yaml(
                "{download: [{url: 'https://a'}, {url: 'https://b'}],
                  output_options: {maintain_download_archive: false},
                  overrides: {season: 2}}"
            )
        );
        Ok(())
    }

    #[test]
    fn dl_rejects_odd_and_conflicting_pairs() {
        assert!(dl_preset(&strings(&["--download"])).is_err());
        assert!(dl_preset(&strings(&["download", "x"])).is_err());
        let conflict = dl_preset(&strings(&["--a", "1", "--a.b", "2"])).unwrap_err();
        assert!(conflict.to_string().contains("conflicts"));
    }

    #[test]
    fn dl_definition_pulls_out_parents() -> anyhow::Result<()> {
        let definition = dl_definition(&strings(&["--preset", "Single", "--download", "https://x"]))?;
        assert!(definition.name.starts_with("dl-"));
        assert_eq!(definition.parents, ["Single"]);
        assert_eq!(definition.body, yaml("{download: 'https://x'}"));
        Ok(())
    }

    #[test]
    fn match_filters_by_substring() {
        assert!(name_matches("Daily News", &[]));
        assert!(name_matches("Daily News", &strings(&["News"])));
        assert!(!name_matches("Daily News", &strings(&["Music"])));
    }
}
