//! Command-line surface. This is the only module that knows about `clap`; everything
//! below it takes plain paths and structs.

use crate::output::OutputArgs;

use std::path::PathBuf;

use clap::Parser;

/// Resolve a Python project's dependencies into a cross-platform Nix-buildable lockfile.
#[derive(Parser)]
#[command(version, about)]
pub struct Args {
    /// Directory containing the project's `pyproject.toml`.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Where to write the generated build expression. Defaults to stdout-adjacent
    /// `--lock` when unset, since this crate stops at the typed lockfile view and
    /// leaves Nix-expression generation to a downstream exporter.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// A directory of pre-built packages, named `{name}-{version}/`, consulted before
    /// any index for every package this resolve touches. May be repeated.
    #[arg(long = "custom", value_name = "DIR")]
    pub custom_dirs: Vec<PathBuf>,

    /// Ignore any existing lockfile's pinned versions; re-resolve every package from
    /// scratch instead of feeding them in as resolver preferences.
    #[arg(long)]
    pub relock: bool,

    /// Path to read an existing lockfile's preferences from (unless `--relock`) and to
    /// write the freshly resolved one to.
    #[arg(long, value_name = "PATH", default_value = "nixpy.lock.json")]
    pub lock: PathBuf,

    #[command(flatten)]
    pub output_args: OutputArgs,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["nixpy"]).unwrap();
        assert_eq!(args.project, PathBuf::from("."));
        assert_eq!(args.lock, PathBuf::from("nixpy.lock.json"));
        assert!(args.output.is_none());
        assert!(args.custom_dirs.is_empty());
        assert!(!args.relock);
    }

    #[test]
    fn test_custom_may_repeat() {
        let args = Args::try_parse_from(["nixpy", "--custom", "a", "--custom", "b", "--relock"]).unwrap();
        assert_eq!(args.custom_dirs, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert!(args.relock);
    }
}
