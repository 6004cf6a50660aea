//! The Candidate model: a Project bound to a requested extras set and a target system.
//!
//! This is where PEP 508 marker evaluation actually happens. A [`Project`] just carries
//! requirement strings with their markers intact; a [`Candidate`] is what you get once
//! you've decided which extras are active and which system you're evaluating for.

use crate::prelude::*;

use crate::project::Project;
use crate::system::SystemInfo;

/// A `(Project, extras, SystemInfo)` triple. Cheap to construct; the expensive part
/// (`evaluated_requirements`) is computed on demand, since the SAT driver constructs
/// many Candidates it ends up discarding.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub project: Rc<Project>,
    pub extras: HashSet<Extra>,
    pub system: SystemInfo,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.project.name == other.project.name
            && self.project.version == other.project.version
            && self.extras == other.extras
            && self.system == other.system
    }
}
impl Eq for Candidate {}

fn env_with_extra<'a>(
    base: &'a HashMap<String, String>,
    extra: &'a str,
) -> ExtraEnv<'a> {
    ExtraEnv { base, extra }
}

struct ExtraEnv<'a> {
    base: &'a HashMap<String, String>,
    extra: &'a str,
}

impl<'a> marker::Env for ExtraEnv<'a> {
    fn get_marker_var(&self, var: &str) -> Option<&str> {
        if var == "extra" {
            Some(self.extra)
        } else {
            self.base.get_marker_var(var)
        }
    }
}

impl Candidate {
    pub fn new(
        project: Rc<Project>,
        extras: HashSet<Extra>,
        system: SystemInfo,
    ) -> Candidate {
        Candidate {
            project,
            extras,
            system,
        }
    }

    fn evaluate_list(
        &self,
        declared: &[PackageRequirement],
        env: &HashMap<String, String>,
    ) -> Result<Vec<PackageRequirement>> {
        let mut extras = self.extras.clone();
        let mut out;
        loop {
            let values: Vec<String> = {
                let mut v: Vec<String> = extras.iter().map(|e| e.normalized().to_owned()).collect();
                v.push(String::new());
                v
            };

            out = Vec::new();
            let mut discovered_extras: HashSet<Extra> = Default::default();

            for req in declared {
                let included = match &req.env_marker_expr {
                    None => true,
                    Some(m) => {
                        let mut any = false;
                        for value in &values {
                            if m.eval(&env_with_extra(env, value))? {
                                any = true;
                                break;
                            }
                        }
                        any
                    }
                };
                if !included {
                    continue;
                }

                if req.name == self.project.name {
                    // Self-reference: contributes its extras to our effective set, and
                    // is otherwise dropped from the yielded requirement list.
                    discovered_extras.extend(req.extras.iter().cloned());
                    continue;
                }

                out.push(req.clone());
            }

            if discovered_extras.is_subset(&extras) {
                break;
            }
            extras.extend(discovered_extras);
        }
        Ok(out)
    }

    pub fn evaluated_requirements(&self) -> Result<Vec<PackageRequirement>> {
        let env = self.system.python_environment();
        self.evaluate_list(&self.project.requirements, &env)
    }

    pub fn evaluated_build_requirements(&self) -> Result<Vec<PackageRequirement>> {
        let env = self.system.python_environment();
        self.evaluate_list(&self.project.build_requirements, &env)
    }

    pub fn with_extras(&self) -> String {
        if self.extras.is_empty() {
            self.project.name.as_given().to_owned()
        } else {
            let extras: Vec<&str> = self.extras.iter().map(|e| e.as_given()).collect();
            format!("{}[{}]", self.project.name.as_given(), extras.join(","))
        }
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={} ({})", self.with_extras(), self.project.version, self.system)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::distribution::Distribution;
    use crate::project::ProjectFormat;

    fn make_project(name: &str, reqs: &[&str]) -> Rc<Project> {
        Rc::new(Project {
            name: name.try_into().unwrap(),
            version: "1.0".try_into().unwrap(),
            format: ProjectFormat::Wheel,
            req_python: None,
            distribution: Distribution::new(
                Url::parse("https://example.com/x-1.0-py3-none-any.whl").unwrap(),
                Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
            ),
            requirements: reqs.iter().map(|s| (*s).try_into().unwrap()).collect(),
            build_requirements: vec![],
        })
    }

    fn system() -> SystemInfo {
        SystemInfo {
            python_version: "3.10.0".try_into().unwrap(),
            platform: crate::system::PlatformTag::X86_64Linux,
        }
    }

    #[test]
    fn test_marker_excludes_by_platform() {
        let project = make_project("foo", &["pywin32 ; sys_platform == \"win32\""]);
        let candidate = Candidate::new(project, Default::default(), system());
        assert!(candidate.evaluated_requirements().unwrap().is_empty());
    }

    #[test]
    fn test_extras_fixed_point() {
        let project = Rc::new(Project {
            name: "foo".try_into().unwrap(),
            version: "1.0".try_into().unwrap(),
            format: ProjectFormat::Wheel,
            req_python: None,
            distribution: Distribution::new(
                Url::parse("https://example.com/foo-1.0-py3-none-any.whl").unwrap(),
                Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
            ),
            requirements: vec![
                "pytest ; extra == \"test\"".try_into().unwrap(),
                "foo[extra2] ; extra == \"test\"".try_into().unwrap(),
                "mock ; extra == \"extra2\"".try_into().unwrap(),
            ],
            build_requirements: vec![],
        });
        let mut extras = HashSet::new();
        extras.insert(Extra::try_from("test").unwrap());
        let candidate = Candidate::new(project, extras, system());
        let names: Vec<String> = candidate
            .evaluated_requirements()
            .unwrap()
            .iter()
            .map(|r| r.name.as_given().to_owned())
            .collect();
        assert!(names.contains(&"pytest".to_owned()));
        assert!(names.contains(&"mock".to_owned()));
    }
}
