#![forbid(unsafe_code)]

mod build_backend;
mod candidate;
mod cli;
mod closure;
mod config;
mod dist_provider;
mod distribution;
mod error;
mod fetch;
mod kvstore;
mod lockfile;
mod output;
mod parser;
mod prelude;
mod project;
mod project_provider;
mod resolver;
mod simple_api;
mod system;
mod target;
mod tree;
mod util;
mod vocab;

#[cfg(test)]
mod test_util;

use clap::Parser;

use crate::cli::Args;
use crate::config::ManifestConfig;
use crate::dist_provider::{CachedProvider, CombineMode, CombinedProvider, DirectoryProvider, DistributionProvider, IndexProvider};
use crate::distribution::Distribution;
use crate::fetch::Http;
use crate::parser::SubprocessBuildInvoker;
use crate::prelude::*;
use crate::project::Project;
use crate::project_provider::ProjectProvider;
use crate::system::SystemInfo;

use std::path::{Path, PathBuf};

/// Where this run's on-disk caches live: `$NIXPY_CACHE_DIR` if set, otherwise the
/// platform cache directory `directories::ProjectDirs` already resolves
/// (`prelude::PROJECT_DIRS`). The only environment variable this crate's correctness
/// depends on.
fn cache_root() -> PathBuf {
    std::env::var_os("NIXPY_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PROJECT_DIRS.cache_dir().to_owned())
}

/// Parse the root project itself: `--project` names a directory, and a directory is
/// parsed the same way any other local-directory distribution is -- `parser::parse`'s
/// `Body::Directory` arm already knows how to read `[project]` out of its
/// `pyproject.toml`.
fn load_root_project(project_dir: &Path, build: &dyn parser::BuildInvoker) -> Result<Project> {
    let distribution = Distribution::new(
        Url::from_directory_path(project_dir)
            .map_err(|_| anyhow!("{} is not an absolute directory path", project_dir.display()))?,
        None,
    );
    Ok(parser::parse(distribution, None, parser::Body::Directory(project_dir.to_owned()), build)?)
}

/// A Project's declared requirements still carry an unevaluated marker
/// (`env_marker_expr`) -- unlike `closure::as_user_requirement`, whose input has
/// already had its marker decided by `Candidate::evaluate_list`, this one feeds the
/// root of a fresh solve, so the marker has to survive for `resolver::resolve` to
/// evaluate it itself.
fn as_root_requirement(req: &PackageRequirement) -> UserRequirement {
    UserRequirement {
        name: req.name.clone(),
        extras: req.extras.clone(),
        specifiers: req.specifiers.clone(),
        env_marker: req.env_marker_expr.clone(),
    }
}

fn build_distribution_provider(
    config: &ManifestConfig,
    custom_dirs: &[PathBuf],
    http: Http,
    cache_dir: PathBuf,
) -> CachedProvider<CombinedProvider> {
    let mut providers: Vec<Box<dyn DistributionProvider>> = custom_dirs
        .iter()
        .map(|root| Box::new(DirectoryProvider { root: root.clone() }) as Box<dyn DistributionProvider>)
        .collect();

    for index_url in &config.index_urls {
        providers.push(Box::new(IndexProvider {
            http: http.clone(),
            index_url: index_url.clone(),
        }));
    }

    CachedProvider {
        inner: CombinedProvider { providers, mode: CombineMode::FirstHit },
        http,
        cache_dir,
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    output::init(&args.output_args);

    let cache_dir = cache_root();
    let http = Http::new(&cache_dir.join("http-cache"), &cache_dir.join("hash-cache"))?;

    let project_dir = std::fs::canonicalize(&args.project).with_context(|| format!("{}: no such directory", args.project.display()))?;
    let manifest_path = project_dir.join("pyproject.toml");
    let config = config::load(&manifest_path)?;

    let build = SubprocessBuildInvoker { python: "python3".to_owned() };

    // Only the declared runtime dependencies seed the environment closure's main solve --
    // the root project's own build requirements matter only if something needs to build
    // the root itself, which nothing here does; it's the thing asking for a lockfile, not
    // a Candidate inside one.
    let root = load_root_project(&project_dir, &build)?;
    let root_requirements: Vec<UserRequirement> = root.requirements.iter().map(as_root_requirement).collect();

    // Feeding an existing lockfile's pins into the solve as preferences (rather than
    // hard constraints) is what makes a plain `--lock` rerun stable against an
    // unrelated change elsewhere in the requirement graph; `--relock` skips this.
    let existing_lockfile = if args.relock {
        None
    } else {
        std::fs::File::open(&args.lock).ok().and_then(|f| lockfile::Lockfile::read(f).ok())
    };

    let distributions = build_distribution_provider(&config, &args.custom_dirs, http.clone(), cache_dir.join("source-cache"));
    let providers = ProjectProvider::new(&distributions, http, &cache_dir.join("project-cache"), &build)?;

    let mut lockfile = lockfile::Lockfile::new();
    for platform in &config.platforms {
        let system = SystemInfo { python_version: config.python_version.clone(), platform: *platform };
        context!("resolving {}", system);

        let preferences = existing_lockfile
            .as_ref()
            .map(|json| lockfile::Lockfile::preferences_for(json, platform))
            .unwrap_or_default();

        let environment = closure::close(&providers, &system, &root_requirements, &preferences)
            .with_context(|| format!("resolving dependencies for {system}"))?;
        lockfile.add_environment(environment);
    }

    let lock_path = args.output.as_ref().unwrap_or(&args.lock);
    let out = std::fs::File::create(lock_path).with_context(|| format!("writing {}", lock_path.display()))?;
    lockfile.write(out)?;

    Ok(())
}

fn main() -> eyre::Result<()> {
    run().map_err(|e| eyre::eyre!("{:#}", e))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::closure::close;
    use crate::dist_provider::DistributionProvider;
    use crate::system::PlatformTag;

    struct FailingBuild;
    impl parser::BuildInvoker for FailingBuild {
        fn run_egg_info(&self, _sdist_root: &Path) -> Result<PathBuf> {
            bail!("no python available in tests")
        }
        fn prepare_metadata(&self, _sdist_root: &Path, _build_backend_name: &str, _backend_path: &[String]) -> Result<WheelCoreMetadata> {
            bail!("no python available in tests")
        }
    }

    struct FixedIndex(HashMap<String, Vec<Distribution>>);
    impl DistributionProvider for FixedIndex {
        fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
            Ok(self.0.get(name.normalized()).cloned().unwrap_or_default())
        }
    }

    fn write_wheel(dir: &Path, name: &str, version: &str) -> Distribution {
        let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(format!("{name}-{version}.dist-info/METADATA"), zip::write::FileOptions::default())
            .unwrap();
        write!(zip, "Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n").unwrap();
        zip.finish().unwrap();
        Distribution::new(Url::from_file_path(&path).unwrap(), None)
    }

    fn write_project(dir: &Path, body: &str) -> PathBuf {
        std::fs::write(dir.join("pyproject.toml"), body).unwrap();
        dir.to_owned()
    }

    #[test]
    fn test_load_root_project_reads_pep621_table() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            indoc::indoc! {r#"
                [project]
                name = "app"
                version = "1.0.0"
                dependencies = ["foo >= 1.0; sys_platform == \"linux\""]
            "#},
        );
        let project = load_root_project(tmp.path(), &FailingBuild).unwrap();
        assert_eq!(project.name.as_given(), "app");
        assert_eq!(project.requirements.len(), 1);
        assert!(project.requirements[0].env_marker_expr.is_some());
    }

    #[test]
    fn test_as_root_requirement_preserves_marker() {
        let req: PackageRequirement = "foo >= 1.0; sys_platform == \"linux\"".try_into().unwrap();
        let user_req = as_root_requirement(&req);
        assert_eq!(user_req.name, req.name);
        assert!(user_req.env_marker.is_some());
    }

    #[test]
    fn test_build_distribution_provider_prefers_custom_dirs_first() {
        let tmp = tempfile::tempdir().unwrap();
        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let config = config::ManifestConfig {
            python_version: "3.10.0".try_into().unwrap(),
            platforms: vec![PlatformTag::X86_64Linux],
            index_urls: vec![Url::parse("https://example.com/simple/").unwrap()],
            find_links: vec![],
            extra_links: vec![],
            nixpkgs_overrides: vec![],
        };
        let provider = build_distribution_provider(&config, &[tmp.path().to_owned()], http, caches.path().join("source-cache"));
        // One DirectoryProvider for the custom dir plus one IndexProvider for the
        // configured index, combined first-hit so a local build always wins.
        assert_eq!(provider.inner.providers.len(), 2);
        assert_eq!(provider.inner.mode, CombineMode::FirstHit);
    }

    #[test]
    fn test_directory_root_resolves_against_local_wheel() {
        let project_dir = tempfile::tempdir().unwrap();
        write_project(
            project_dir.path(),
            indoc::indoc! {r#"
                [project]
                name = "app"
                version = "1.0.0"
                dependencies = ["foo"]
            "#},
        );

        let index_dir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert("foo".to_owned(), vec![write_wheel(index_dir.path(), "foo", "1.0.0")]);
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &caches.path().join("project-cache"), &build).unwrap();

        let root = load_root_project(project_dir.path(), &build).unwrap();
        let root_requirements: Vec<UserRequirement> = root.requirements.iter().map(as_root_requirement).collect();

        let system = SystemInfo { python_version: "3.10.0".try_into().unwrap(), platform: PlatformTag::X86_64Linux };
        let env = close(&providers, &system, &root_requirements, &HashMap::new()).unwrap();

        assert_eq!(env.runtime_target_ids.len(), 1);
        let foo_id = env.runtime_target_ids.iter().next().unwrap();
        assert_eq!(env.targets[foo_id].candidate.project.name.as_given(), "foo");
    }
}
