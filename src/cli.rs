use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::layout;

#[derive(Parser, Debug)]
#[command(name = "mirp")]
#[command(version)]
#[command(about = "MIRP: Minecraft Resource Pack Indexer", long_about = None)]
#[command(after_help = "Example:\n  \
  mirp -tag v1 -zip_file_path pack.zip -extract_to out\n  \
  extracts textures/stone.png from pack.zip to out/textures/stone/v1.png")]
pub struct Cli {
    /// Tag to rename the extracted files to
    #[arg(long = "tag", value_name = "TAG", value_parser = parse_tag, allow_hyphen_values = true)]
    pub tag: String,

    /// Path to the zip file to be processed
    #[arg(
        long = "zip_file_path",
        value_name = "FILE",
        value_parser = NonEmptyStringValueParser::new(),
        allow_hyphen_values = true
    )]
    pub zip_file_path: String,

    /// Directory to extract the contents to
    #[arg(
        long = "extract_to",
        value_name = "DIR",
        value_parser = NonEmptyStringValueParser::new(),
        allow_hyphen_values = true
    )]
    pub extract_to: String,

    /// Maximum number of files extracted at once (0 = one task per file)
    #[arg(long = "jobs", value_name = "N", default_value_t = 0)]
    pub jobs: usize,
}

impl Cli {
    /// Parse the process arguments, accepting single-dash long flags.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    pub fn zip_path(&self) -> PathBuf {
        PathBuf::from(&self.zip_file_path)
    }

    pub fn extract_dir(&self) -> PathBuf {
        PathBuf::from(&self.extract_to)
    }
}

fn parse_tag(value: &str) -> Result<String, String> {
    layout::validate_tag(value)
        .map(|()| value.to_string())
        .map_err(|e| e.to_string())
}

/// Long flags that take their value from the next argument.
const VALUE_FLAGS: [&str; 4] = ["tag", "zip_file_path", "extract_to", "jobs"];

/// Rewrite `-flag` and `-flag=value` into clap's `--flag` form.
///
/// Single-character flags such as `-h` and `-V` are left alone, as is
/// everything after a bare `--`. The argument following a value-taking flag
/// is its value and is never rewritten, so `-tag -beta` keeps `-beta`.
pub fn normalize_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut passthrough = false;
    let mut value_next = false;
    let mut out = Vec::new();

    for (i, arg) in args.into_iter().enumerate() {
        if i == 0 || passthrough || std::mem::take(&mut value_next) {
            out.push(arg);
            continue;
        }
        let rewritten = match arg.to_str() {
            Some("--") => {
                passthrough = true;
                None
            }
            Some(s) if is_single_dash_long(s) => Some(OsString::from(format!("-{s}"))),
            _ => None,
        };
        let arg = rewritten.unwrap_or(arg);
        value_next = arg
            .to_str()
            .and_then(|s| s.strip_prefix("--"))
            .is_some_and(|name| VALUE_FLAGS.contains(&name));
        out.push(arg);
    }

    out
}

fn is_single_dash_long(arg: &str) -> bool {
    let Some(rest) = arg.strip_prefix('-') else {
        return false;
    };
    let name = rest.split('=').next().unwrap_or_default();
    !rest.starts_with('-') && name.chars().count() > 1 && name.starts_with(|c: char| c.is_ascii_alphabetic())
}
