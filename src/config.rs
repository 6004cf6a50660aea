//! Manifest configuration: the `[tool.nixpy]` table a project's `pyproject.toml` carries.
//!
//! Parsed with `toml_edit`, the same document type the Project Parser uses for
//! `pyproject.toml` itself (parser.rs) -- preserving the ability to round-trip an
//! existing manifest (rewrite a derived value back in) without disturbing formatting or
//! comments on keys this crate never touches.

use crate::error::ConfigError;
use crate::prelude::*;
use crate::system::PlatformTag;

use std::path::{Path, PathBuf};
use std::process::Command;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org/simple/";

/// One project's resolved `[tool.nixpy]` settings, defaults already applied.
#[derive(Debug, Clone)]
pub struct ManifestConfig {
    pub python_version: Version,
    pub platforms: Vec<PlatformTag>,
    pub index_urls: Vec<Url>,
    pub find_links: Vec<Url>,
    pub extra_links: Vec<PathBuf>,
    pub nixpkgs_overrides: Vec<PackageName>,
}

pub fn load(path: &Path) -> Result<ManifestConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc: toml_edit::Document = text.parse().with_context(|| format!("parsing {}", path.display()))?;
    Ok(parse(&doc, path)?)
}

fn parse(doc: &toml_edit::Document, path: &Path) -> Result<ManifestConfig, ConfigError> {
    let path = path.display().to_string();
    let table = doc
        .get("tool")
        .and_then(|i| i.as_table())
        .and_then(|t| t.get("nixpy"))
        .and_then(|i| i.as_table());

    let python_version = match table.and_then(|t| t.get("python-version")).and_then(|i| i.as_str()) {
        Some(s) => s.try_into().map_err(|e: anyhow::Error| ConfigError::InvalidValue {
            path: path.clone(),
            key: "python-version",
            reason: e.to_string(),
        })?,
        None => host_python_version().ok_or_else(|| ConfigError::MissingRequired {
            path: path.clone(),
            key: "python-version",
        })?,
    };

    let platforms = match string_list(table, "platforms") {
        Some(items) => items
            .iter()
            .map(|s| {
                s.as_str().try_into().map_err(|e: anyhow::Error| ConfigError::InvalidValue {
                    path: path.clone(),
                    key: "platforms",
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<PlatformTag>, ConfigError>>()?,
        None => vec![host_platform().ok_or_else(|| ConfigError::MissingRequired {
            path: path.clone(),
            key: "platforms",
        })?],
    };

    let index_urls = match string_list(table, "index-urls") {
        Some(items) => parse_urls(&items, &path, "index-urls")?,
        None => vec![Url::parse(DEFAULT_INDEX_URL).expect("default index url is valid")],
    };

    let find_links = parse_urls(&string_list(table, "find-links").unwrap_or_default(), &path, "find-links")?;

    let extra_links = string_list(table, "extra-links").unwrap_or_default().into_iter().map(PathBuf::from).collect();

    let nixpkgs_overrides = string_list(table, "nixpkgs-overrides")
        .unwrap_or_default()
        .iter()
        .map(|s| {
            s.as_str().try_into().map_err(|e: anyhow::Error| ConfigError::InvalidValue {
                path: path.clone(),
                key: "nixpkgs-overrides",
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<PackageName>, ConfigError>>()?;

    Ok(ManifestConfig {
        python_version,
        platforms,
        index_urls,
        find_links,
        extra_links,
        nixpkgs_overrides,
    })
}

fn string_list(table: Option<&toml_edit::Table>, key: &str) -> Option<Vec<String>> {
    table.and_then(|t| t.get(key)).and_then(|i| i.as_array()).map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
}

fn parse_urls(items: &[String], path: &str, key: &'static str) -> Result<Vec<Url>, ConfigError> {
    items
        .iter()
        .map(|s| {
            Url::parse(s).map_err(|e| ConfigError::InvalidValue {
                path: path.to_owned(),
                key,
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Best-effort host interpreter discovery: ask whatever `python3` is on `PATH` for its
/// own version. Returns `None` rather than erroring if there's no interpreter to ask --
/// a missing `python-version` key with nothing discoverable is the caller's
/// `ConfigError::MissingRequired`, not this function's problem to report.
fn host_python_version() -> Option<Version> {
    let output = Command::new("python3")
        .arg("-c")
        .arg("import sys; print('.'.join(map(str, sys.version_info[:3])))")
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()?.trim().try_into().ok()
}

fn host_platform() -> Option<PlatformTag> {
    match (std::env::consts::ARCH, std::env::consts::OS) {
        ("x86_64", "linux") => Some(PlatformTag::X86_64Linux),
        ("aarch64", "macos") => Some(PlatformTag::Aarch64Darwin),
        ("powerpc64le", "linux") | ("powerpc64", "linux") => Some(PlatformTag::Powerpc64leLinux),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("pyproject.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_explicit_values_override_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            indoc::indoc! {r#"
                [tool.nixpy]
                python-version = "3.11"
                platforms = ["x86_64-linux", "aarch64-darwin"]
                index-urls = ["https://example.com/simple/"]
                nixpkgs-overrides = ["numpy"]
            "#},
        );
        let config = load(&path).unwrap();
        assert_eq!(config.python_version, "3.11".try_into().unwrap());
        assert_eq!(config.platforms, vec![PlatformTag::X86_64Linux, PlatformTag::Aarch64Darwin]);
        assert_eq!(config.index_urls, vec![Url::parse("https://example.com/simple/").unwrap()]);
        assert_eq!(config.nixpkgs_overrides, vec!["numpy".try_into().unwrap()]);
    }

    #[test]
    fn test_missing_index_urls_defaults_to_pypi() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            indoc::indoc! {r#"
                [tool.nixpy]
                python-version = "3.11"
                platforms = ["x86_64-linux"]
            "#},
        );
        let config = load(&path).unwrap();
        assert_eq!(config.index_urls, vec![Url::parse(DEFAULT_INDEX_URL).unwrap()]);
        assert!(config.find_links.is_empty());
    }

    #[test]
    fn test_invalid_platform_tag_is_a_typed_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_manifest(
            tmp.path(),
            indoc::indoc! {r#"
                [tool.nixpy]
                python-version = "3.11"
                platforms = ["not-a-real-platform"]
            "#},
        );
        let err = load(&path).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
