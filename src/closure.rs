//! The Environment Closure: turns a resolved name→Candidate map into a full graph of
//! Targets, where every Candidate has been rebuilt with both its runtime and build
//! dependencies populated.
//!
//! The SAT driver (`resolver`) only answers "which Candidate satisfies which
//! requirement" -- it says nothing about what's needed to *build* a Candidate from
//! source, and nothing keeps a package's build environment consistent with the runtime
//! it ships into. This module re-runs the driver once per distinct BuildCandidate (a
//! Candidate plus its frozen transitive runtime set), with that runtime set pinned as a
//! hard constraint, and folds the results into a content-addressed Target table.

use crate::candidate::Candidate;
use crate::prelude::*;
use crate::project_provider::ProjectProvider;
use crate::resolver::{self, Constraints};
use crate::system::SystemInfo;
use crate::target::Target;

use std::collections::VecDeque;
use std::rc::Rc;

/// One platform's fully-built dependency graph: the flat Target table plus which of its
/// ids were actually requested at the top level (as opposed to pulled in only to build
/// something else).
#[derive(Debug, Clone)]
pub struct Environment {
    pub system: SystemInfo,
    pub targets: HashMap<String, Target>,
    pub runtime_target_ids: HashSet<String>,
}

/// Run the main solve, then build a Target for every package it selected (recursively
/// pulling in whatever those builds need). `preferences` nudges the main solve toward an
/// existing lockfile's pinned versions without ruling anything else out; pass an empty
/// map for a `--relock`.
pub fn close(
    providers: &ProjectProvider,
    system: &SystemInfo,
    root_requirements: &[UserRequirement],
    preferences: &HashMap<PackageName, Version>,
) -> Result<Environment> {
    let main_constraints = Constraints {
        hard: HashMap::new(),
        preferences: preferences.clone(),
    };
    let main_env = resolver::resolve(providers, system, root_requirements, &main_constraints)?;

    let mut memo: HashMap<String, Rc<Target>> = HashMap::new();
    let mut in_progress: HashSet<String> = HashSet::new();
    let mut runtime_target_ids = HashSet::new();

    for name in main_env.keys() {
        let target = target_for(name, &main_env, providers, system, &mut memo, &mut in_progress)?;
        runtime_target_ids.insert(target.id().to_owned());
    }

    let targets = memo
        .into_values()
        .map(|t| {
            let id = t.id().to_owned();
            let target = Rc::try_unwrap(t).unwrap_or_else(|rc| (*rc).clone());
            (id, target)
        })
        .collect();

    Ok(Environment {
        system: system.clone(),
        targets,
        runtime_target_ids,
    })
}

/// Build (or fetch from the memo) the Target for `name` as resolved in `env`. `env` is
/// whichever solve this name was actually selected by -- `main_env` at the top, or a
/// BuildCandidate's own build-env solve once we're recursing into build requirements.
fn target_for(
    name: &PackageName,
    env: &HashMap<PackageName, Candidate>,
    providers: &ProjectProvider,
    system: &SystemInfo,
    memo: &mut HashMap<String, Rc<Target>>,
    in_progress: &mut HashSet<String>,
) -> Result<Rc<Target>> {
    let candidate = env
        .get(name)
        .ok_or_else(|| anyhow!("no candidate resolved for {} in this environment", name.as_given()))?
        .clone();

    let runtime = runtime_closure(&candidate.project.name, env)?;
    let key = build_candidate_key(&candidate, &runtime);

    if let Some(target) = memo.get(&key) {
        return Ok(target.clone());
    }
    if !in_progress.insert(key.clone()) {
        bail!("cycle detected while closing build environment for {candidate}");
    }

    let constraints = Constraints {
        hard: runtime,
        preferences: HashMap::new(),
    };

    let mut build_root_requirements: Vec<UserRequirement> =
        candidate.evaluated_requirements()?.iter().map(as_user_requirement).collect();
    build_root_requirements.extend(candidate.evaluated_build_requirements()?.iter().map(as_user_requirement));

    let build_env = resolver::resolve(providers, system, &build_root_requirements, &constraints)?;

    let mut dependencies = Vec::new();
    for req in candidate.evaluated_requirements()? {
        let target = target_for(&req.name, env, providers, system, memo, in_progress)?;
        dependencies.push(target.id().to_owned());
    }

    let mut build_dependencies = Vec::new();
    for req in candidate.evaluated_build_requirements()? {
        let target = target_for(&req.name, &build_env, providers, system, memo, in_progress)?;
        build_dependencies.push(target.id().to_owned());
    }

    in_progress.remove(&key);

    let target = Rc::new(Target::new(candidate, dependencies, build_dependencies)?);
    memo.insert(key, target.clone());
    Ok(target)
}

/// The transitive runtime set of `start` within `env`, reached by BFS through
/// `evaluated_requirements`. Includes `start` itself, since the point is to freeze a
/// consistent set of versions -- the package being built is part of that set too.
fn runtime_closure(start: &PackageName, env: &HashMap<PackageName, Candidate>) -> Result<HashMap<PackageName, Version>> {
    let mut closure = HashMap::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.clone());

    while let Some(name) = queue.pop_front() {
        if closure.contains_key(&name) {
            continue;
        }
        let candidate = env
            .get(&name)
            .ok_or_else(|| anyhow!("no resolved candidate for {} in this environment", name.as_given()))?;
        closure.insert(name.clone(), candidate.project.version.clone());
        for req in candidate.evaluated_requirements()? {
            if !closure.contains_key(&req.name) {
                queue.push_back(req.name);
            }
        }
    }
    Ok(closure)
}

/// A BuildCandidate's identity: which package, at which version, with which extras, is
/// being built against which frozen runtime set. Two packages that land on identical
/// values here can share one Target -- this is the memo key the recursion above is
/// built around.
fn build_candidate_key(candidate: &Candidate, runtime: &HashMap<PackageName, Version>) -> String {
    let mut extras: Vec<&str> = candidate.extras.iter().map(|e| e.normalized()).collect();
    extras.sort_unstable();

    let mut runtime_entries: Vec<(&str, String)> =
        runtime.iter().map(|(name, version)| (name.normalized(), version.to_string())).collect();
    runtime_entries.sort_unstable();

    format!(
        "{}=={}[{}]{{{}}}",
        candidate.project.name.normalized(),
        candidate.project.version,
        extras.join(","),
        runtime_entries.iter().map(|(n, v)| format!("{n}=={v}")).collect::<Vec<_>>().join(",")
    )
}

fn as_user_requirement(req: &PackageRequirement) -> UserRequirement {
    UserRequirement {
        name: req.name.clone(),
        extras: req.extras.clone(),
        specifiers: req.specifiers.clone(),
        env_marker: None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::distribution::Distribution;
    use crate::dist_provider::DistributionProvider;
    use crate::fetch::Http;
    use crate::parser::BuildInvoker;
    use crate::system::PlatformTag;
    use std::path::{Path, PathBuf};

    struct FailingBuild;
    impl BuildInvoker for FailingBuild {
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

    fn write_wheel(dir: &Path, name: &str, version: &str, requires: &[&str]) -> Distribution {
        let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(format!("{name}-{version}.dist-info/METADATA"), zip::write::FileOptions::default())
            .unwrap();
        write!(zip, "Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n").unwrap();
        for req in requires {
            write!(zip, "Requires-Dist: {req}\n").unwrap();
        }
        zip.finish().unwrap();
        Distribution::new(Url::from_file_path(&path).unwrap(), None)
    }

    fn write_sdist_tree(dir: &Path, name: &str, version: &str, dep: &str, build_dep: &str) -> Distribution {
        let project_dir = dir.join(format!("{name}-{version}"));
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(
            project_dir.join("pyproject.toml"),
            format!(
                "[build-system]\nrequires = [\"{build_dep}\"]\nbuild-backend = \"setuptools.build_meta\"\n\n\
                 [project]\nname = \"{name}\"\nversion = \"{version}\"\ndependencies = [\"{dep}\"]\n"
            ),
        )
        .unwrap();
        Distribution::new(Url::from_file_path(&project_dir).unwrap(), None)
    }

    fn system() -> SystemInfo {
        SystemInfo {
            python_version: "3.10.0".try_into().unwrap(),
            platform: PlatformTag::X86_64Linux,
        }
    }

    #[test]
    fn test_close_builds_target_with_runtime_dependency() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert("foo".to_owned(), vec![write_wheel(tempdir.path(), "foo", "1.0.0", &["bar"])]);
        index.insert("bar".to_owned(), vec![write_wheel(tempdir.path(), "bar", "1.0.0", &[])]);
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &tempdir.path().join("cache"), &build).unwrap();

        let requirements: Vec<UserRequirement> = vec!["foo".try_into().unwrap()];
        let env = close(&providers, &system(), &requirements, &HashMap::new()).unwrap();

        assert_eq!(env.runtime_target_ids.len(), 1);
        let foo_id = env.runtime_target_ids.iter().next().unwrap();
        let foo_target = &env.targets[foo_id];
        assert_eq!(foo_target.candidate.project.name.as_given(), "foo");
        assert_eq!(foo_target.dependencies.len(), 1);

        let bar_id = &foo_target.dependencies[0];
        let bar_target = &env.targets[bar_id];
        assert_eq!(bar_target.candidate.project.name.as_given(), "bar");
        assert!(bar_target.dependencies.is_empty());
    }

    #[test]
    fn test_close_populates_build_dependencies_from_sdist() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert(
            "foo".to_owned(),
            vec![write_sdist_tree(tempdir.path(), "foo", "1.0.0", "bar", "setuptools")],
        );
        index.insert("bar".to_owned(), vec![write_wheel(tempdir.path(), "bar", "1.0.0", &[])]);
        index.insert("setuptools".to_owned(), vec![write_wheel(tempdir.path(), "setuptools", "68.0.0", &[])]);
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &tempdir.path().join("cache"), &build).unwrap();

        let requirements: Vec<UserRequirement> = vec!["foo".try_into().unwrap()];
        let env = close(&providers, &system(), &requirements, &HashMap::new()).unwrap();

        let foo_id = env.runtime_target_ids.iter().next().unwrap();
        let foo_target = &env.targets[foo_id];
        assert_eq!(foo_target.dependencies.len(), 1);
        assert_eq!(foo_target.build_dependencies.len(), 1);

        let build_dep_id = &foo_target.build_dependencies[0];
        let build_dep_target = &env.targets[build_dep_id];
        assert_eq!(build_dep_target.candidate.project.name.as_given(), "setuptools");
    }

    #[test]
    fn test_shared_dependency_collapses_to_one_target() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert("foo".to_owned(), vec![write_wheel(tempdir.path(), "foo", "1.0.0", &["baz"])]);
        index.insert("bar".to_owned(), vec![write_wheel(tempdir.path(), "bar", "1.0.0", &["baz"])]);
        index.insert("baz".to_owned(), vec![write_wheel(tempdir.path(), "baz", "1.0.0", &[])]);
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &tempdir.path().join("cache"), &build).unwrap();

        let requirements: Vec<UserRequirement> = vec!["foo".try_into().unwrap(), "bar".try_into().unwrap()];
        let env = close(&providers, &system(), &requirements, &HashMap::new()).unwrap();

        assert_eq!(env.runtime_target_ids.len(), 2);
        let baz_ids: HashSet<&String> = env
            .runtime_target_ids
            .iter()
            .map(|id| &env.targets[id])
            .flat_map(|t| t.dependencies.iter())
            .collect();
        assert_eq!(baz_ids.len(), 1);
    }
}
