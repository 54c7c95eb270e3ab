//! Exposes the external downloader's own command-line flags on our CLI.
//!
//! The flag set is discovered at runtime, usually by scraping
//! `<downloader> --help`, and grafted onto the clap [`Command`] before parsing.
//! After parsing, every mirrored flag is read back as a [`FlagValue`] so that
//! "not given" and "given without a value" stay distinguishable.

use std::collections::HashSet;
use std::io;
use std::process::Command as Process;

use anyhow::Context;
use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use tracing::debug;

use crate::error::Error;

/// Description of the built-in help flag, used to skip the usage preamble.
pub const HELP_ANCHOR: &str = "Print this help text and exit";

/// Every flag line starts on a new line indented by four spaces.
const BLOCK_SEPARATOR: &str = "\n    -";

/// Flag names and descriptions are separated by a run of spaces.
const NAME_SEPARATOR: &str = "  ";

/// Indentation of flag lines and their description continuations.
const INDENT: &str = "    ";

const HELP_HEADING: &str = "Downloader options";

/// One downloader flag as it appears in the help output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirroredArg {
    /// Spellings as written, e.g. `["-f", "--format"]`.
    pub aliases: Vec<String>,
    /// Value placeholder; `None` for flags that take no value.
    pub metavar: Option<String>,
    pub help: String,
}

impl MirroredArg {
    pub fn takes_value(&self) -> bool {
        self.metavar.is_some()
    }

    /// First long name, without the leading dashes.
    pub fn long(&self) -> Option<&str> {
        self.aliases.iter().find_map(|a| a.strip_prefix("--"))
    }

    /// Long names after the first one.
    pub fn extra_longs(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .iter()
            .filter_map(|a| a.strip_prefix("--"))
            .skip(1)
    }

    pub fn short(&self) -> Option<char> {
        self.aliases.iter().find_map(|a| {
            if a.starts_with("--") {
                return None;
            }
            let mut chars = a.strip_prefix('-')?.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        })
    }

    /// The spelling used when forwarding the flag to the downloader.
    pub fn flag_name(&self) -> &str {
        self.aliases
            .iter()
            .find(|a| a.starts_with("--"))
            .or_else(|| self.aliases.first())
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// clap argument id.
    pub fn id(&self) -> String {
        self.flag_name().trim_start_matches('-').to_owned()
    }
}

/// Whether and how a mirrored flag was given on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlagValue {
    #[default]
    Absent,
    PresentNoValue,
    PresentWithValue(String),
}

impl FlagValue {
    pub fn to_args(&self, flag: &str) -> Vec<String> {
        match self {
            FlagValue::Absent => Vec::new(),
            FlagValue::PresentNoValue => vec![flag.to_owned()],
            FlagValue::PresentWithValue(value) => vec![flag.to_owned(), value.clone()],
        }
    }
}

/// Something that can list the downloader flags to mirror.
pub trait FlagSource {
    fn discover_flags(&self) -> anyhow::Result<Vec<MirroredArg>>;
}

/// Discovers flags by running `<program> --help`.
#[derive(Debug, Clone)]
pub struct HelpScraper {
    program: String,
}

impl HelpScraper {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl FlagSource for HelpScraper {
    fn discover_flags(&self) -> anyhow::Result<Vec<MirroredArg>> {
        let output = Process::new(&self.program)
            .arg("--help")
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => anyhow::Error::from(Error::DownloaderMissing {
                    program: self.program.clone(),
                    source: e,
                }),
                _ => anyhow::Error::from(e),
            })
            .with_context(|| format!("running `{} --help`", self.program))?;
        let text = String::from_utf8_lossy(&output.stdout);
        let flags = parse_help(&text)?;
        debug!(program = self.program, count = flags.len(), "Discovered downloader flags");
        Ok(flags)
    }
}

/// A fixed selection of commonly used downloader flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuratedFlags;

impl FlagSource for CuratedFlags {
    fn discover_flags(&self) -> anyhow::Result<Vec<MirroredArg>> {
        let curated: [(&[&str], Option<&str>, &str); 6] = [
            (&["-f", "--format"], Some("FORMAT"), "Video format code"),
            (&["-o", "--output"], Some("TEMPLATE"), "Output filename template"),
            (&["-r", "--limit-rate"], Some("RATE"), "Maximum download rate in bytes per second"),
            (&["--cookies"], Some("FILE"), "Netscape formatted file to read cookies from"),
            (&["-q", "--quiet"], None, "Activate quiet mode"),
            (&["--embed-subs"], None, "Embed subtitles in the video"),
        ];
        Ok(curated
            .iter()
            .map(|(aliases, metavar, help)| MirroredArg {
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                metavar: metavar.map(String::from),
                help: help.to_string(),
            })
            .collect())
    }
}

/// Parses the flag listing that follows the `--help` entry.
///
/// Fails when the anchor is missing or a block does not start with a flag;
/// there is no best-effort fallback.
pub fn parse_help(text: &str) -> Result<Vec<MirroredArg>, Error> {
    let (_, rest) = text.split_once(HELP_ANCHOR).ok_or(Error::HelpAnchorMissing)?;
    rest.split(BLOCK_SEPARATOR)
        .skip(1)
        .map(|block| parse_block(&format!("-{block}")))
        .collect()
}

fn parse_block(block: &str) -> Result<MirroredArg, Error> {
    let mut lines = block.lines();
    let header = lines.next().unwrap_or_default();
    let (names, first_help) = match header.split_once(NAME_SEPARATOR) {
        Some((names, help)) => (names.trim(), help),
        None => (header.trim(), ""),
    };

    let mut aliases: Vec<String> = names.split(", ").map(str::to_owned).collect();
    let mut metavar = None;
    // A trailing placeholder on the last alias, e.g. `--format FORMAT`.
    if let Some(last) = aliases.pop() {
        let tokens: Vec<&str> = last.split_whitespace().collect();
        match tokens[..] {
            [name, .., placeholder] => {
                metavar = Some(placeholder.to_owned());
                aliases.push(name.to_owned());
            }
            _ => aliases.push(last.clone()),
        }
    }
    if aliases.iter().any(|a| !is_flag(a)) {
        return Err(Error::MalformedFlagBlock(block.to_owned()));
    }

    // Section headings and blank lines sit at shallower indentation.
    let continuation = lines.filter(|line| line.starts_with(INDENT));
    let help = std::iter::once(first_help)
        .chain(continuation)
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");

    Ok(MirroredArg {
        aliases,
        metavar,
        help: escape_percent(&help),
    })
}

fn is_flag(alias: &str) -> bool {
    let name = alias.trim_start_matches('-');
    alias.starts_with('-')
        && !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Replaces `%` with alternating `<` and `>`.
pub fn escape_percent(text: &str) -> String {
    let mut open = true;
    text.chars()
        .map(|c| {
            if c != '%' {
                return c;
            }
            let bracket = if open { '<' } else { '>' };
            open = !open;
            bracket
        })
        .collect()
}

/// Adds `specs` to `command`, skipping any that clash with existing flags.
///
/// Returns the augmented command and the specs that were actually added.
pub fn augment(command: Command, specs: &[MirroredArg]) -> (Command, Vec<MirroredArg>) {
    let mut ids: HashSet<String> = HashSet::from([String::from("help"), String::from("version")]);
    let mut longs = ids.clone();
    let mut shorts: HashSet<char> = HashSet::from(['h', 'V']);
    for arg in command.get_arguments() {
        ids.insert(arg.get_id().to_string());
        longs.extend(arg.get_long().map(str::to_owned));
        shorts.extend(arg.get_short());
    }

    let mut command = command;
    let mut added = Vec::new();
    for spec in specs {
        let id = spec.id();
        let clashes = ids.contains(&id)
            || spec.long().is_some_and(|l| longs.contains(l))
            || spec.extra_longs().any(|l| longs.contains(l))
            || spec.short().is_some_and(|s| shorts.contains(&s));
        if clashes {
            debug!(flag = spec.flag_name(), "Skipping downloader flag that clashes with ours");
            continue;
        }

        ids.insert(id.clone());
        longs.extend(spec.long().map(str::to_owned));
        longs.extend(spec.extra_longs().map(str::to_owned));
        shorts.extend(spec.short());

        command = command.arg(to_clap_arg(spec, id));
        added.push(spec.clone());
    }
    (command, added)
}

fn to_clap_arg(spec: &MirroredArg, id: String) -> Arg {
    let mut arg = Arg::new(id)
        .help(spec.help.clone())
        .help_heading(HELP_HEADING);
    if let Some(long) = spec.long() {
        arg = arg.long(long.to_owned());
    }
    for alias in spec.extra_longs() {
        arg = arg.alias(alias.to_owned());
    }
    if let Some(short) = spec.short() {
        arg = arg.short(short);
    }
    match &spec.metavar {
        Some(metavar) => arg
            .value_name(metavar.clone())
            .num_args(1)
            .action(ArgAction::Set),
        None => arg.action(ArgAction::SetTrue),
    }
}

/// Reads back the mirrored flags after parsing. `specs` must be the list
/// returned by [`augment`].
pub fn collect(matches: &ArgMatches, specs: &[MirroredArg]) -> Vec<(MirroredArg, FlagValue)> {
    specs
        .iter()
        .map(|spec| {
            let id = spec.id();
            let value = if spec.takes_value() {
                match matches.get_one::<String>(&id) {
                    Some(value) => FlagValue::PresentWithValue(value.clone()),
                    None => FlagValue::Absent,
                }
            } else if matches.get_flag(&id) {
                FlagValue::PresentNoValue
            } else {
                FlagValue::Absent
            };
            (spec.clone(), value)
        })
        .collect()
}
