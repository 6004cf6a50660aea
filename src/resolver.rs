//! The SAT Resolver Driver: turns a set of root requirements into one [`Candidate`] per
//! package name.
//!
//! pubgrub-rs only understands a flat namespace of `(package, version)` pairs with range
//! constraints -- it has no native idea of PEP 508 extras. Extras are lifted into that
//! namespace as their own virtual package identity: `foo[bar]` is modeled as a package
//! distinct from bare `foo`, whose only dependencies are `foo`'s `extra=="bar"`
//! requirements plus an exact-version pin back onto bare `foo`. Two requirers of `foo`
//! -- one plain, one wanting `[bar]` -- still converge on a single selected version,
//! because pubgrub sees them as two packages pinned to the same version, not one
//! package with a unioned extras set.

use crate::candidate::Candidate;
use crate::prelude::*;
use crate::project::Project;
use crate::project_provider::ProjectProvider;
use crate::system::SystemInfo;

use pubgrub::error::PubGrubError;
use pubgrub::range::Range;
use pubgrub::solver::{Dependencies, DependencyConstraints};
use std::borrow::Borrow;
use std::cell::RefCell;
use std::rc::Rc;

/// Externally-imposed constraints on a solve: `hard` pins an identifier to an exact
/// version (used by the Environment Closure's build-env solve, §4.7 step 3, to keep a
/// build environment consistent with the runtime it ships into); `preferences` just
/// nudges version selection without ruling anything out (used to keep a relock stable
/// against an existing lockfile).
#[derive(Debug, Default, Clone)]
pub struct Constraints {
    pub hard: HashMap<PackageName, Version>,
    pub preferences: HashMap<PackageName, Version>,
}

impl Constraints {
    pub fn none() -> Constraints {
        Constraints::default()
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum ResPkg {
    Root,
    Package(PackageName, Option<Extra>),
}

static ROOT_VERSION: Lazy<Version> = Lazy::new(|| "0".try_into().unwrap());

impl Display for ResPkg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResPkg::Root => write!(f, "<root>"),
            ResPkg::Package(name, None) => write!(f, "{}", name.as_given()),
            ResPkg::Package(name, Some(extra)) => write!(f, "{}[{}]", name.as_given(), extra.as_given()),
        }
    }
}

fn specifiers_to_pubgrub(specs: &Specifiers) -> Result<Range<Version>> {
    let mut final_range = Range::any();
    for spec in &specs.0 {
        let spec_range = spec.to_ranges()?.into_iter().fold(Range::none(), |accum, r| {
            accum.union(&if r.end < *VERSION_INFINITY {
                Range::between(r.start, r.end)
            } else {
                Range::higher_than(r.start)
            })
        });
        final_range = final_range.intersection(&spec_range);
    }
    Ok(final_range)
}

struct ResolverState<'a> {
    providers: &'a ProjectProvider<'a>,
    system: &'a SystemInfo,
    root_requirements: &'a [UserRequirement],
    constraints: &'a Constraints,
    projects: RefCell<HashMap<(PackageName, Version), Rc<Project>>>,
    versions: RefCell<HashMap<PackageName, Rc<Vec<Version>>>>,
}

impl<'a> ResolverState<'a> {
    fn project_for(&self, name: &PackageName, version: &Version) -> Result<Rc<Project>> {
        let key = (name.clone(), version.clone());
        if let Some(p) = self.projects.borrow().get(&key) {
            return Ok(p.clone());
        }
        let spec: Specifiers = format!("=={version}").as_str().try_into()?;
        let mut projects = self.providers.find_projects(name, &spec)?;
        let project = projects
            .pop()
            .ok_or_else(|| anyhow!("no project found for {} {}", name.as_given(), version))?;
        let project = Rc::new(project);
        self.projects.borrow_mut().insert(key, project.clone());
        Ok(project)
    }

    fn candidate_for(&self, name: &PackageName, version: &Version, extra: Option<&Extra>) -> Result<Candidate> {
        let project = self.project_for(name, version)?;
        let mut extras = HashSet::new();
        if let Some(e) = extra {
            extras.insert(e.clone());
        }
        Ok(Candidate::new(project, extras, self.system.clone()))
    }

    /// Every version with at least one artifact, filtered by requires-python, sorted
    /// most-preferred first: a `preferences` hit sorts to the very front, then
    /// descending by version.
    fn versions(&self, name: &PackageName) -> Result<Rc<Vec<Version>>> {
        if let Some(v) = self.versions.borrow().get(name) {
            return Ok(v.clone());
        }
        let projects = self.providers.find_projects(name, &Specifiers::any())?;
        let mut versions: Vec<Version> = Vec::with_capacity(projects.len());
        for project in &projects {
            if let Some(req_python) = &project.req_python {
                if !req_python.satisfied_by(&self.system.python_version)? {
                    continue;
                }
            }
            versions.push(project.version.clone());
        }
        let preferred = self.constraints.preferences.get(name);
        versions.sort_unstable_by(|a, b| {
            let a_pref = preferred != Some(a);
            let b_pref = preferred != Some(b);
            (a_pref, std::cmp::Reverse(a.clone())).cmp(&(b_pref, std::cmp::Reverse(b.clone())))
        });
        let versions = Rc::new(versions);
        self.versions.borrow_mut().insert(name.clone(), versions.clone());
        Ok(versions)
    }

    fn requirements_to_pubgrub(
        &self,
        reqs: &[PackageRequirement],
        dc: &mut DependencyConstraints<ResPkg, Version>,
    ) -> Result<()> {
        for req in reqs {
            let mut extras: Vec<Option<Extra>> = req.extras.iter().cloned().map(Some).collect();
            if extras.is_empty() {
                extras.push(None);
            }
            for extra in extras {
                let pkg = ResPkg::Package(req.name.clone(), extra);
                let range = specifiers_to_pubgrub(&req.specifiers)?;
                trace!("adding dependency: {} {}", pkg, range);
                dc.insert(pkg, range);
            }
        }
        Ok(())
    }
}

impl<'a> pubgrub::solver::DependencyProvider<ResPkg, Version> for ResolverState<'a> {
    fn choose_package_version<T, U>(
        &self,
        mut potential_packages: impl Iterator<Item = (T, U)>,
    ) -> Result<(T, Option<Version>), Box<dyn std::error::Error>>
    where
        T: Borrow<ResPkg>,
        U: Borrow<Range<Version>>,
    {
        let (respkg, range) = potential_packages.next().unwrap();

        match respkg.borrow() {
            ResPkg::Root => Ok((respkg, Some(ROOT_VERSION.clone()))),
            ResPkg::Package(name, _) => {
                if let Some(pinned) = self.constraints.hard.get(name) {
                    let version = if range.borrow().contains(pinned) {
                        Some(pinned.clone())
                    } else {
                        None
                    };
                    return Ok((respkg, version));
                }

                for version in self.versions(name)?.iter() {
                    if range.borrow().contains(version) {
                        return Ok((respkg, Some(version.clone())));
                    }
                }
                Ok((respkg, None))
            }
        }
    }

    fn get_dependencies(
        &self,
        pkg: &ResPkg,
        version: &Version,
    ) -> Result<Dependencies<ResPkg, Version>, Box<dyn std::error::Error>> {
        match pkg {
            ResPkg::Root => {
                let mut dc: DependencyConstraints<ResPkg, Version> = Default::default();
                for req in self.root_requirements {
                    if let Some(m) = &req.env_marker {
                        if !m.eval(&self.system.python_environment())? {
                            continue;
                        }
                    }
                    let mut extras: Vec<Option<Extra>> = req.extras.iter().cloned().map(Some).collect();
                    if extras.is_empty() {
                        extras.push(None);
                    }
                    for extra in extras {
                        dc.insert(
                            ResPkg::Package(req.name.clone(), extra),
                            specifiers_to_pubgrub(&req.specifiers)?,
                        );
                    }
                }
                Ok(Dependencies::Known(dc))
            }
            ResPkg::Package(name, extra) => {
                let candidate = self.candidate_for(name, version, extra.as_ref())?;
                let mut dc: DependencyConstraints<ResPkg, Version> = Default::default();
                self.requirements_to_pubgrub(&candidate.evaluated_requirements()?, &mut dc)?;

                if let Some(extra) = extra {
                    if !project_declares_extra(&candidate.project, extra) {
                        Err(anyhow!(
                            "package {} has no extra [{}]",
                            name.as_given(),
                            extra.as_given()
                        ))?;
                    }
                    dc.insert(ResPkg::Package(name.clone(), None), Range::exact(version.clone()));
                }

                Ok(Dependencies::Known(dc))
            }
        }
    }
}

/// Whether any declared requirement is conditioned on this extra -- the closest thing
/// to a declared-extras list a flat `Requires-Dist` table gives us (there's no separate
/// `Provides-Extra` field in this crate's core metadata model).
fn project_declares_extra(project: &Project, extra: &Extra) -> bool {
    fn expr_mentions(expr: &marker::Expr, extra: &str) -> bool {
        match expr {
            marker::Expr::And(l, r) | marker::Expr::Or(l, r) => expr_mentions(l, extra) || expr_mentions(r, extra),
            marker::Expr::Operator { lhs, rhs, .. } => {
                matches!(lhs, marker::Value::Literal(v) if v == extra)
                    || matches!(rhs, marker::Value::Literal(v) if v == extra)
            }
        }
    }
    project
        .requirements
        .iter()
        .any(|r| r.env_marker_expr.as_ref().map(|e| expr_mentions(e, extra.normalized())).unwrap_or(false))
}

/// Run one solve: `root_requirements` resolved against `system`, subject to
/// `constraints`. Returns one [`Candidate`] per resolved package name (the virtual
/// per-extra packages are folded back into their base package's `Candidate`, which
/// already carries the full unioned extras set -- see below).
pub fn resolve(
    providers: &ProjectProvider,
    system: &SystemInfo,
    root_requirements: &[UserRequirement],
    constraints: &Constraints,
) -> Result<HashMap<PackageName, Candidate>> {
    let state = ResolverState {
        providers,
        system,
        root_requirements,
        constraints,
        projects: RefCell::new(HashMap::new()),
        versions: RefCell::new(HashMap::new()),
    };

    let solution = pubgrub::solver::resolve(&state, ResPkg::Root, ROOT_VERSION.clone())
        .map_err(|e| resolve_error(e))?;

    // Fold the virtual per-extra packages back into their base package: a selected
    // ResPkg::Package(name, Some(extra)) contributes `extra` to the final Candidate for
    // `name`, which is otherwise built without any extras at all.
    let mut extras_by_name: HashMap<PackageName, HashSet<Extra>> = HashMap::new();
    for pkg in solution.keys() {
        if let ResPkg::Package(name, Some(extra)) = pkg {
            extras_by_name.entry(name.clone()).or_default().insert(extra.clone());
        }
    }

    let mut result = HashMap::new();
    for (pkg, version) in &solution {
        if let ResPkg::Package(name, None) = pkg {
            let project = state.project_for(name, version)?;
            let extras = extras_by_name.remove(name).unwrap_or_default();
            result.insert(name.clone(), Candidate::new(project, extras, system.clone()));
        }
    }
    Ok(result)
}

fn resolve_error(err: PubGrubError<ResPkg, Version>) -> anyhow::Error {
    use PubGrubError::*;
    match err {
        ErrorRetrievingDependencies { package, version, source } => {
            anyhow!("fetching dependencies of {package} v{version}: {source}")
        }
        ErrorChoosingPackageVersion(boxed_err) => {
            anyhow!("error while choosing next package version to examine: {boxed_err}")
        }
        ErrorInShouldCancel(boxed_err) => anyhow!("{boxed_err}"),
        Failure(s) => anyhow!("{s}"),
        DependencyOnTheEmptySet { package, version, dependent } => anyhow!(
            "{package} v{version}'s dependency on {dependent} has self-contradictory version ranges"
        ),
        SelfDependency { package, version } => anyhow!("{package} v{version} depends on itself"),
        NoSolution(mut derivation_tree) => {
            derivation_tree.collapse_no_versions();
            anyhow!("{}", pubgrub::report::DefaultStringReporter::report(&derivation_tree))
        }
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

    fn write_wheel(dir: &Path, name: &str, version: &str, requires: &[&str]) -> Distribution {
        let path = dir.join(format!("{name}-{version}-py3-none-any.whl"));
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(
            format!("{name}-{version}.dist-info/METADATA"),
            zip::write::FileOptions::default(),
        )
        .unwrap();
        write!(zip, "Metadata-Version: 2.1\nName: {name}\nVersion: {version}\n").unwrap();
        for req in requires {
            write!(zip, "Requires-Dist: {req}\n").unwrap();
        }
        zip.finish().unwrap();
        Distribution::new(Url::from_file_path(&path).unwrap(), None)
    }

    struct FixedIndex(HashMap<String, Vec<Distribution>>);
    impl DistributionProvider for FixedIndex {
        fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
            Ok(self.0.get(name.normalized()).cloned().unwrap_or_default())
        }
    }

    fn system() -> SystemInfo {
        SystemInfo {
            python_version: "3.10.0".try_into().unwrap(),
            platform: PlatformTag::X86_64Linux,
        }
    }

    #[test]
    fn test_resolve_picks_newest_satisfying_version_and_dependency() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert(
            "foo".to_owned(),
            vec![
                write_wheel(tempdir.path(), "foo", "1.0.0", &["bar"]),
                write_wheel(tempdir.path(), "foo", "2.0.0", &["bar"]),
            ],
        );
        index.insert("bar".to_owned(), vec![write_wheel(tempdir.path(), "bar", "1.0.0", &[])]);
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &tempdir.path().join("cache"), &build).unwrap();

        let requirements: Vec<UserRequirement> = vec!["foo".try_into().unwrap()];
        let result = resolve(&providers, &system(), &requirements, &Constraints::none()).unwrap();

        assert_eq!(result.len(), 2);
        let foo: PackageName = "foo".try_into().unwrap();
        assert_eq!(result[&foo].project.version, "2.0.0".try_into().unwrap());
    }

    #[test]
    fn test_resolve_honors_hard_constraint() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut index = HashMap::new();
        index.insert(
            "foo".to_owned(),
            vec![
                write_wheel(tempdir.path(), "foo", "1.0.0", &[]),
                write_wheel(tempdir.path(), "foo", "2.0.0", &[]),
            ],
        );
        let distributions = FixedIndex(index);

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let build = FailingBuild;
        let providers = ProjectProvider::new(&distributions, http, &tempdir.path().join("cache"), &build).unwrap();

        let mut constraints = Constraints::none();
        constraints.hard.insert("foo".try_into().unwrap(), "1.0.0".try_into().unwrap());

        let requirements: Vec<UserRequirement> = vec!["foo".try_into().unwrap()];
        let result = resolve(&providers, &system(), &requirements, &constraints).unwrap();
        let foo: PackageName = "foo".try_into().unwrap();
        assert_eq!(result[&foo].project.version, "1.0.0".try_into().unwrap());
    }
}
