//! Project Parser: turning one Distribution's bytes into a canonical [`Project`].
//!
//! Dispatch is purely on what's physically present, not on what the Distribution
//! Provider thinks it fetched: a wheel is whatever's inside a `.whl` zip; a source
//! distribution is unpacked and then picked apart the same way whether it came from a
//! `.tar.gz` or a bare local directory, by checking for `PKG-INFO`, `pyproject.toml`,
//! `setup.py` and `default.nix` in that order.

use crate::prelude::*;

use crate::build_backend;
use crate::distribution::Distribution;
use crate::project::{Project, ProjectFormat};
use crate::tree::{unpack_tar_gz_carefully, unpack_zip_carefully, WriteTreeFS};

use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// What a parser needs in order to run a project's build backend. Kept as a trait so
/// tests can hand in a fake rather than actually invoking a subprocess; the real
/// implementation shells out to whatever interpreter the Environment Closure resolved
/// for this build (see `build_backend`).
pub trait BuildInvoker {
    fn run_egg_info(&self, sdist_root: &Path) -> Result<PathBuf>;
    fn prepare_metadata(
        &self,
        sdist_root: &Path,
        build_backend_name: &str,
        backend_path: &[String],
    ) -> Result<WheelCoreMetadata>;
}

/// Invokes the ambient `python` interpreter directly. The Environment Closure is
/// responsible for making sure that interpreter actually has the declared build
/// dependencies installed before handing a parser one of these.
pub struct SubprocessBuildInvoker {
    pub python: String,
}

impl BuildInvoker for SubprocessBuildInvoker {
    fn run_egg_info(&self, sdist_root: &Path) -> Result<PathBuf> {
        build_backend::run_egg_info(&self.python, sdist_root)
    }

    fn prepare_metadata(
        &self,
        sdist_root: &Path,
        build_backend_name: &str,
        backend_path: &[String],
    ) -> Result<WheelCoreMetadata> {
        let tmp = tempfile::tempdir()?;
        let dist_info = build_backend::run_prepare_metadata(
            &self.python,
            sdist_root,
            build_backend_name,
            backend_path,
            tmp.path(),
        )?;
        let blob = std::fs::read(dist_info.join("METADATA"))?;
        Ok(blob.as_slice().try_into()?)
    }
}

/// The raw form a Distribution's content can take, once the Resource Fetcher has it in
/// hand. `SidecarMetadata` is the PEP 658 `.metadata` file served next to a wheel --
/// when it's present we never need to download the wheel itself.
pub enum Body {
    Wheel(Box<dyn ReadPlusSeek>),
    SidecarMetadata(Vec<u8>),
    Sdist(SdistFormat, Box<dyn ReadPlusSeek>),
    Directory(PathBuf),
}

fn malformed(distribution: &Distribution, reason: impl Into<String>) -> ParseError {
    ParseError::Malformed {
        distribution: distribution.to_string(),
        reason: reason.into(),
    }
}

/// Parse `distribution`'s `body` into a canonical Project. `version_hint`, usually
/// `distribution.version_hint()`, substitutes for a `0.0.0` placeholder version turned
/// up by static metadata (setup.py's egg_info run writes one when `setup()` computes
/// its version dynamically and the parser has no way to execute that code).
pub fn parse(
    distribution: Distribution,
    version_hint: Option<Version>,
    body: Body,
    build: &dyn BuildInvoker,
) -> Result<Project, ParseError> {
    let project = match body {
        Body::Wheel(reader) => parse_wheel(&distribution, reader)?,
        Body::SidecarMetadata(blob) => parse_metadata_blob(&distribution, &blob)?,
        Body::Sdist(format, reader) => parse_sdist(&distribution, format, reader, build)?,
        Body::Directory(path) => parse_tree(&distribution, &path, build)?,
    };

    let project = substitute_version_hint(project, version_hint, &distribution)?;
    project.canonicalize().map_err(|e| malformed(&distribution, e.to_string()))
}

fn substitute_version_hint(
    mut project: Project,
    hint: Option<Version>,
    distribution: &Distribution,
) -> Result<Project, ParseError> {
    static ZERO_VERSION: Lazy<Version> = Lazy::new(|| "0.0.0".try_into().unwrap());
    if project.version == *ZERO_VERSION {
        project.version = hint.ok_or_else(|| {
            malformed(distribution, "dynamic version with no filename hint to fall back on")
        })?;
    }
    Ok(project)
}

/// Some manifests write local-path dependencies in terms of `$PROJECT_ROOT`/
/// `${PROJECT_ROOT}` or `$PWD`/`${PWD}`, expecting the resolving tool to substitute the
/// archive root before parsing the requirement string. Applied to each decoded TOML
/// string value, never to the raw document text, so a literal `$` inside an unrelated
/// string can't be misread as the start of a token.
fn substitute_path_tokens(value: &str, root: &Path) -> String {
    let root = root.to_string_lossy();
    value
        .replace("${PROJECT_ROOT}", &root)
        .replace("$PROJECT_ROOT", &root)
        .replace("${PWD}", &root)
        .replace("$PWD", &root)
}

fn parse_wheel(distribution: &Distribution, reader: Box<dyn ReadPlusSeek>) -> Result<Project, ParseError> {
    let filename = distribution
        .filename()
        .map_err(|e| malformed(distribution, e.to_string()))?;
    let name: WheelName = filename
        .try_into()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;
    let mut wheel = Wheel::new(name, reader).map_err(|e| malformed(distribution, e.to_string()))?;
    let (_blob, metadata) = wheel.metadata().map_err(|e| malformed(distribution, e.to_string()))?;
    Ok(project_from_core_metadata(distribution.clone(), ProjectFormat::Wheel, metadata))
}

fn parse_metadata_blob(distribution: &Distribution, blob: &[u8]) -> Result<Project, ParseError> {
    let metadata: WheelCoreMetadata = blob
        .try_into()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;
    Ok(project_from_core_metadata(distribution.clone(), ProjectFormat::Metadata, metadata))
}

fn project_from_core_metadata(
    distribution: Distribution,
    format: ProjectFormat,
    metadata: WheelCoreMetadata,
) -> Project {
    Project {
        name: metadata.name,
        version: metadata.version,
        format,
        req_python: Some(metadata.requires_python),
        distribution,
        requirements: metadata.requires_dist,
        build_requirements: vec![],
    }
}

fn parse_sdist(
    distribution: &Distribution,
    format: SdistFormat,
    mut reader: Box<dyn ReadPlusSeek>,
    build: &dyn BuildInvoker,
) -> Result<Project, ParseError> {
    let tmp = tempfile::tempdir().map_err(|e| malformed(distribution, e.to_string()))?;
    let mut dest = WriteTreeFS::new(tmp.path());

    match format {
        SdistFormat::Zip => {
            reader.seek(SeekFrom::Start(0)).map_err(|e| malformed(distribution, e.to_string()))?;
            let mut z = ZipArchive::new(reader).map_err(|e| malformed(distribution, e.to_string()))?;
            unpack_zip_carefully(&mut z, &mut dest).map_err(|e| malformed(distribution, e.to_string()))?;
        }
        SdistFormat::TarGz => {
            reader.seek(SeekFrom::Start(0)).map_err(|e| malformed(distribution, e.to_string()))?;
            unpack_tar_gz_carefully(reader, dest).map_err(|e| malformed(distribution, e.to_string()))?;
        }
        SdistFormat::TarBz2 | SdistFormat::TarXz | SdistFormat::TarZst => {
            return Err(ParseError::UnsupportedArchive {
                distribution: distribution.to_string(),
            });
        }
    }

    let root = sdist_root(tmp.path()).map_err(|e| malformed(distribution, e.to_string()))?;
    let mut project = parse_tree(distribution, &root, build)?;
    project.format = match project.format {
        ProjectFormat::Wheel | ProjectFormat::Metadata => ProjectFormat::Metadata,
        other => other,
    };
    Ok(project)
}

/// Most sdists wrap everything in one `{name}-{version}/` directory; descend into it if
/// that's all there is, otherwise assume the archive is already flat.
fn sdist_root(extracted: &Path) -> Result<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(extracted)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    if entries.len() == 1 && entries[0].is_dir() {
        Ok(entries.remove(0))
    } else {
        Ok(extracted.to_owned())
    }
}

/// Walk a directory on disk (an sdist extraction or an in-place local checkout) and
/// produce a Project by whichever build-description format is present.
fn parse_tree(distribution: &Distribution, root: &Path, build: &dyn BuildInvoker) -> Result<Project, ParseError> {
    if root.join("PKG-INFO").is_file() {
        let blob = std::fs::read(root.join("PKG-INFO")).map_err(|e| malformed(distribution, e.to_string()))?;
        return parse_metadata_blob(distribution, &blob)
            .map(|p| Project { format: ProjectFormat::Setuptools, ..p });
    }
    if root.join("pyproject.toml").is_file() {
        return parse_pyproject(distribution, root, build);
    }
    if root.join("setup.py").is_file() {
        return parse_setup_py(distribution, root, build);
    }
    if root.join("default.nix").is_file() {
        return Ok(Project {
            name: distribution
                .filename()
                .ok()
                .and_then(|f| crate::distribution::strip_archive_extension(f))
                .and_then(|s| s.rsplit_once('-'))
                .and_then(|(n, _)| n.try_into().ok())
                .ok_or_else(|| malformed(distribution, "can't infer package name for a Nix-described project"))?,
            version: "0.0.0".try_into().unwrap(),
            format: ProjectFormat::Nix,
            req_python: None,
            distribution: distribution.clone(),
            requirements: vec![],
            build_requirements: vec![],
        });
    }
    Err(malformed(distribution, "no PKG-INFO, pyproject.toml, setup.py, or default.nix found"))
}

fn parse_setup_py(distribution: &Distribution, root: &Path, build: &dyn BuildInvoker) -> Result<Project, ParseError> {
    let egg_info_dir = build
        .run_egg_info(root)
        .map_err(|e| malformed(distribution, format!("setup.py egg_info failed: {e}")))?;

    let pkg_info = std::fs::read(egg_info_dir.join("PKG-INFO")).map_err(|e| malformed(distribution, e.to_string()))?;
    let mut project = parse_metadata_blob(distribution, &pkg_info)?;
    project.format = ProjectFormat::Setuptools;

    if let Ok(text) = std::fs::read_to_string(egg_info_dir.join("requires.txt")) {
        project.requirements = parse_requires_txt(&text).map_err(|e| malformed(distribution, e.to_string()))?;
    }
    project.build_requirements.push("setuptools".try_into().unwrap());
    Ok(project)
}

/// `setup.py egg_info`'s `requires.txt`: a flat list of requirement lines, followed by
/// `[extra_name]`-bracketed sections whose lines are implicitly conditioned on
/// `extra == "extra_name"`.
fn parse_requires_txt(text: &str) -> Result<Vec<PackageRequirement>> {
    let mut out = Vec::new();
    let mut current_extra: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current_extra = Some(section.to_owned());
            continue;
        }
        let req: PackageRequirement = match &current_extra {
            None => line.try_into()?,
            Some(extra) => format!("{line} ; extra == \"{extra}\"").as_str().try_into()?,
        };
        out.push(req);
    }
    Ok(out)
}

fn parse_pyproject(distribution: &Distribution, root: &Path, build: &dyn BuildInvoker) -> Result<Project, ParseError> {
    let text = std::fs::read_to_string(root.join("pyproject.toml")).map_err(|e| malformed(distribution, e.to_string()))?;
    let doc: toml_edit::Document = text
        .parse()
        .map_err(|e: toml_edit::TomlError| malformed(distribution, e.to_string()))?;

    let build_system = doc.get("build-system").and_then(|i| i.as_table());
    let mut build_requirements: Vec<PackageRequirement> = Vec::new();
    let build_backend_name = build_system
        .and_then(|t| t.get("build-backend"))
        .and_then(|i| i.as_str())
        .unwrap_or("setuptools.build_meta:__legacy__")
        .to_owned();
    let backend_path: Vec<String> = build_system
        .and_then(|t| t.get("backend-path"))
        .and_then(|i| i.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).map(String::from).collect())
        .unwrap_or_default();
    if let Some(requires) = build_system.and_then(|t| t.get("requires")).and_then(|i| i.as_array()) {
        for item in requires {
            let s = item
                .as_str()
                .ok_or_else(|| malformed(distribution, "build-system.requires entry isn't a string"))?;
            let s = substitute_path_tokens(s, root);
            build_requirements.push(s.as_str().try_into().map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?);
        }
    }

    if let Some(project) = doc.get("project").and_then(|i| i.as_table()) {
        return parse_pep621_project(distribution, root, project, build_requirements, &build_backend_name, &backend_path, build);
    }
    if let Some(poetry) = doc
        .get("tool")
        .and_then(|t| t.get("poetry"))
        .and_then(|i| i.as_table())
    {
        return parse_poetry_project(distribution, poetry, build_requirements);
    }
    // pyproject.toml present but carries only build-system config; the actual metadata
    // is wherever setup.py leaves it.
    if root.join("setup.py").is_file() {
        let mut project = parse_setup_py(distribution, root, build)?;
        build_requirements.append(&mut project.build_requirements);
        project.build_requirements = build_requirements;
        return Ok(project);
    }
    Err(malformed(distribution, "pyproject.toml has neither [project] nor [tool.poetry], and no setup.py to fall back on"))
}

fn parse_pep621_project(
    distribution: &Distribution,
    root: &Path,
    project: &toml_edit::Table,
    build_requirements: Vec<PackageRequirement>,
    build_backend_name: &str,
    backend_path: &[String],
    build: &dyn BuildInvoker,
) -> Result<Project, ParseError> {
    let dynamic: Vec<&str> = project
        .get("dynamic")
        .and_then(|i| i.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    if dynamic.iter().any(|&f| f == "dependencies" || f == "version" || f == "optional-dependencies") {
        let metadata = build
            .prepare_metadata(root, build_backend_name, backend_path)
            .map_err(|e| malformed(distribution, format!("failed to get dynamic metadata: {e}")))?;
        let mut out = project_from_core_metadata(distribution.clone(), ProjectFormat::Pyproject, metadata);
        out.build_requirements = build_requirements;
        return Ok(out);
    }

    let name: PackageName = project
        .get("name")
        .and_then(|i| i.as_str())
        .ok_or_else(|| malformed(distribution, "[project] is missing name"))?
        .try_into()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;
    let version: Version = match project.get("version").and_then(|i| i.as_str()) {
        Some(v) => v.try_into().map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?,
        None => "0.0.0".try_into().unwrap(),
    };
    let req_python: Option<Specifiers> = project
        .get("requires-python")
        .and_then(|i| i.as_str())
        .map(|s| s.try_into())
        .transpose()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;

    let mut requirements = Vec::new();
    if let Some(deps) = project.get("dependencies").and_then(|i| i.as_array()) {
        for item in deps {
            let s = item.as_str().ok_or_else(|| malformed(distribution, "dependencies entry isn't a string"))?;
            let s = substitute_path_tokens(s, root);
            requirements.push(s.as_str().try_into().map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?);
        }
    }
    if let Some(optional) = project.get("optional-dependencies").and_then(|i| i.as_table()) {
        for (extra_name, deps) in optional.iter() {
            let deps = deps
                .as_array()
                .ok_or_else(|| malformed(distribution, format!("optional-dependencies.{extra_name} isn't an array")))?;
            for item in deps {
                let s = item
                    .as_str()
                    .ok_or_else(|| malformed(distribution, "optional-dependencies entry isn't a string"))?;
                let s = substitute_path_tokens(s, root);
                let text = format!("{s} ; extra == \"{extra_name}\"");
                requirements.push(text.as_str().try_into().map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?);
            }
        }
    }

    Ok(Project {
        name,
        version,
        format: ProjectFormat::Pyproject,
        req_python,
        distribution: distribution.clone(),
        requirements,
        build_requirements,
    })
}

/// Translate a `[tool.poetry]` table into PEP 621 shape: `^1.2` becomes `~=1.2` and a
/// bare `1.2` becomes `==1.2`, which covers the common cases without reimplementing
/// Poetry's full caret-range semantics.
fn parse_poetry_project(
    distribution: &Distribution,
    poetry: &toml_edit::Table,
    build_requirements: Vec<PackageRequirement>,
) -> Result<Project, ParseError> {
    let name: PackageName = poetry
        .get("name")
        .and_then(|i| i.as_str())
        .ok_or_else(|| malformed(distribution, "[tool.poetry] is missing name"))?
        .try_into()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;
    let version: Version = poetry
        .get("version")
        .and_then(|i| i.as_str())
        .ok_or_else(|| malformed(distribution, "[tool.poetry] is missing version"))?
        .try_into()
        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?;

    let mut requirements = Vec::new();
    let mut req_python = None;
    if let Some(deps) = poetry.get("dependencies").and_then(|i| i.as_table()) {
        for (dep_name, value) in deps.iter() {
            let spec = match value {
                toml_edit::Item::Value(toml_edit::Value::String(s)) => s.value().clone(),
                toml_edit::Item::Value(toml_edit::Value::InlineTable(it)) => it
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("*")
                    .to_owned(),
                toml_edit::Item::Table(t) => t
                    .get("version")
                    .and_then(|i| i.as_str())
                    .unwrap_or("*")
                    .to_owned(),
                _ => "*".to_owned(),
            };
            let specifiers = translate_poetry_constraint(&spec);
            if dep_name == "python" {
                req_python = Some(
                    specifiers
                        .as_str()
                        .try_into()
                        .map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?,
                );
                continue;
            }
            let text = format!("{dep_name}{specifiers}");
            requirements.push(text.as_str().try_into().map_err(|e: anyhow::Error| malformed(distribution, e.to_string()))?);
        }
    }

    Ok(Project {
        name,
        version,
        format: ProjectFormat::Pyproject,
        req_python,
        distribution: distribution.clone(),
        requirements,
        build_requirements,
    })
}

fn translate_poetry_constraint(spec: &str) -> String {
    if spec == "*" {
        return String::new();
    }
    if let Some(rest) = spec.strip_prefix('^') {
        format!("~={rest}")
    } else if let Some(rest) = spec.strip_prefix('~') {
        format!("~={rest}")
    } else if spec.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        format!("=={spec}")
    } else {
        spec.to_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct FailingBuildInvoker;
    impl BuildInvoker for FailingBuildInvoker {
        fn run_egg_info(&self, _sdist_root: &Path) -> Result<PathBuf> {
            bail!("no interpreter available in tests")
        }
        fn prepare_metadata(&self, _sdist_root: &Path, _build_backend_name: &str, _backend_path: &[String]) -> Result<WheelCoreMetadata> {
            bail!("no interpreter available in tests")
        }
    }

    fn dist(filename: &str) -> Distribution {
        Distribution::new(
            Url::parse(&format!("https://example.com/{filename}")).unwrap(),
            Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
        )
    }

    fn make_wheel_bytes(metadata: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut w = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            w.start_file("demo-1.0.0.dist-info/METADATA", zip::write::FileOptions::default())
                .unwrap();
            use std::io::Write;
            w.write_all(metadata.as_bytes()).unwrap();
            w.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_parse_wheel() {
        let bytes = make_wheel_bytes("Metadata-Version: 2.1\nName: demo\nVersion: 1.0.0\nRequires-Dist: attrs\n\n");
        let distribution = dist("demo-1.0.0-py3-none-any.whl");
        let project = parse(
            distribution,
            None,
            Body::Wheel(Box::new(std::io::Cursor::new(bytes))),
            &FailingBuildInvoker,
        )
        .unwrap();
        assert_eq!(project.name.as_given(), "demo");
        assert_eq!(project.format, ProjectFormat::Wheel);
        assert_eq!(project.requirements.len(), 1);
    }

    #[test]
    fn test_parse_sidecar_metadata() {
        let blob = b"Metadata-Version: 2.1\nName: demo\nVersion: 1.0.0\n\n".to_vec();
        let distribution = dist("demo-1.0.0-py3-none-any.whl");
        let project = parse(distribution, None, Body::SidecarMetadata(blob), &FailingBuildInvoker).unwrap();
        assert_eq!(project.format, ProjectFormat::Metadata);
    }

    #[test]
    fn test_parse_pyproject_static() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            indoc::indoc! {r#"
                [build-system]
                requires = ["setuptools", "wheel"]
                build-backend = "setuptools.build_meta"

                [project]
                name = "demo"
                version = "1.0.0"
                dependencies = ["attrs>=19"]

                [project.optional-dependencies]
                test = ["pytest"]
            "#},
        )
        .unwrap();
        let distribution = dist("demo-1.0.0.tar.gz");
        let project = parse_tree(&distribution, tmp.path(), &FailingBuildInvoker).unwrap();
        assert_eq!(project.name.as_given(), "demo");
        assert_eq!(project.build_requirements.len(), 2);
        assert!(project.requirements.iter().any(|r| r.name.as_given() == "attrs"));
        assert!(project.requirements.iter().any(|r| r.name.as_given() == "pytest"));
    }

    #[test]
    fn test_substitute_path_tokens_replaces_both_spellings() {
        let root = Path::new("/srv/build/demo");
        assert_eq!(substitute_path_tokens("$PROJECT_ROOT/vendor", root), "/srv/build/demo/vendor");
        assert_eq!(substitute_path_tokens("${PROJECT_ROOT}/vendor", root), "/srv/build/demo/vendor");
        assert_eq!(substitute_path_tokens("$PWD/vendor", root), "/srv/build/demo/vendor");
        assert_eq!(substitute_path_tokens("${PWD}/vendor", root), "/srv/build/demo/vendor");
        assert_eq!(substitute_path_tokens("no tokens here", root), "no tokens here");
    }

    #[test]
    fn test_parse_pyproject_substitutes_project_root_tokens() {
        // The requirement grammar doesn't accept direct URL references (`name @ url`),
        // so this drives the substitution through a marker value instead -- it still
        // proves the decoded dependency and build-requires strings both get the archive
        // root substituted in before they're handed to the requirement parser.
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            indoc::indoc! {r#"
                [build-system]
                requires = ["setuptools; sys_platform == '$PROJECT_ROOT/vendor'"]
                build-backend = "setuptools.build_meta"

                [project]
                name = "demo"
                version = "1.0.0"
                dependencies = ["attrs; sys_platform == '${PROJECT_ROOT}/vendor'"]
            "#},
        )
        .unwrap();
        let distribution = dist("demo-1.0.0.tar.gz");
        let project = parse_tree(&distribution, tmp.path(), &FailingBuildInvoker).unwrap();

        let root = tmp.path().to_string_lossy().into_owned();
        assert!(project.build_requirements[0].to_string().contains(&root));
        assert!(project.requirements[0].to_string().contains(&root));
        assert!(!project.requirements[0].to_string().contains("PROJECT_ROOT"));
    }

    #[test]
    fn test_parse_poetry_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("pyproject.toml"),
            indoc::indoc! {r#"
                [build-system]
                requires = ["poetry-core"]
                build-backend = "poetry.core.masonry.api"

                [tool.poetry]
                name = "demo"
                version = "1.0.0"

                [tool.poetry.dependencies]
                python = "^3.8"
                attrs = "^19.0"
            "#},
        )
        .unwrap();
        let distribution = dist("demo-1.0.0.tar.gz");
        let project = parse_tree(&distribution, tmp.path(), &FailingBuildInvoker).unwrap();
        assert_eq!(project.name.as_given(), "demo");
        assert!(project.req_python.is_some());
        assert!(project.requirements.iter().any(|r| r.name.as_given() == "attrs"));
    }

    #[test]
    fn test_unsupported_sdist_format_rejected() {
        let distribution = dist("demo-1.0.0.tar.xz");
        let err = parse_sdist(
            &distribution,
            SdistFormat::TarXz,
            Box::new(std::io::Cursor::new(Vec::<u8>::new())),
            &FailingBuildInvoker,
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedArchive { .. }));
    }

    #[test]
    fn test_requires_txt_extras() {
        let text = "attrs>=19\n\n[test]\npytest\nmock\n";
        let reqs = parse_requires_txt(text).unwrap();
        assert_eq!(reqs.len(), 3);
        assert!(reqs[1].env_marker_expr.is_some());
    }
}
