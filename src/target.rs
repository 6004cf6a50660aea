//! Targets: the immutable, content-addressed output of the Environment Closure.
//!
//! A Target is a Candidate plus the *ids* of its runtime and build dependencies -- never
//! the dependencies themselves, so the graph serializes as a flat table keyed by id
//! rather than a tree, and two Targets that happen to resolve identically collapse to
//! one id.

use crate::prelude::*;

use crate::candidate::Candidate;
use crate::project::Project;
use ring::digest;

/// The serialized shape of a Target, used both for hashing (`Target::id`) and as the
/// lockfile's per-target JSON record. Field order here is also the field order emitted
/// by `serde_json::to_string`, and since none of these types carry a `HashMap`, that
/// order is deterministic -- which is what makes the id stable under re-serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetJson {
    pub candidate: CandidateJson,
    pub dependencies: Vec<String>,
    pub build_dependencies: Vec<String>,
}

/// The full `Project` record, not just its name -- two distributions that happen to
/// share a name and version but differ in content hash or declared dependencies must
/// not collapse to the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateJson {
    pub project: Project,
    pub with_extras: Vec<Extra>,
    pub system: crate::system::SystemInfo,
}

/// A `(Candidate, dependencies[], build_dependencies[])` tuple, where the two lists hold
/// other Targets' ids rather than the Targets themselves.
#[derive(Debug, Clone)]
pub struct Target {
    pub candidate: Candidate,
    pub dependencies: Vec<String>,
    pub build_dependencies: Vec<String>,
    id: String,
}

impl Target {
    /// Construct a Target and compute its id. Both dependency lists are sorted first,
    /// so two Targets built from the same inputs in a different discovery order still
    /// hash identically.
    pub fn new(
        candidate: Candidate,
        mut dependencies: Vec<String>,
        mut build_dependencies: Vec<String>,
    ) -> Result<Target> {
        dependencies.sort();
        dependencies.dedup();
        build_dependencies.sort();
        build_dependencies.dedup();

        let json = TargetJson {
            candidate: CandidateJson {
                project: (*candidate.project).clone(),
                with_extras: {
                    let mut extras: Vec<Extra> = candidate.extras.iter().cloned().collect();
                    extras.sort_by(|a, b| a.normalized().cmp(b.normalized()));
                    extras
                },
                system: candidate.system.clone(),
            },
            dependencies: dependencies.clone(),
            build_dependencies: build_dependencies.clone(),
        };

        let canonical = canonical_json(&json)?;
        let digest = digest::digest(&digest::SHA256, canonical.as_bytes());
        let id = format!(
            "{}-{}-{}",
            candidate.project.name.as_given(),
            candidate.project.version,
            data_encoding::HEXLOWER.encode(digest.as_ref())
        );

        Ok(Target {
            candidate,
            dependencies,
            build_dependencies,
            id,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn as_json(&self) -> TargetJson {
        TargetJson {
            candidate: CandidateJson {
                project: (*self.candidate.project).clone(),
                with_extras: {
                    let mut extras: Vec<Extra> = self.candidate.extras.iter().cloned().collect();
                    extras.sort_by(|a, b| a.normalized().cmp(b.normalized()));
                    extras
                },
                system: self.candidate.system.clone(),
            },
            dependencies: self.dependencies.clone(),
            build_dependencies: self.build_dependencies.clone(),
        }
    }
}

/// Serialize with recursively sorted object keys, so the resulting bytes are stable
/// regardless of struct field-declaration order or HashMap iteration order.
fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let sorted = sort_json(value);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            for k in keys {
                sorted.insert(k.clone(), sort_json(map[&k].clone()));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_json).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::distribution::Distribution;
    use crate::project::{Project, ProjectFormat};
    use crate::system::{PlatformTag, SystemInfo};

    fn candidate() -> Candidate {
        let project = Rc::new(Project {
            name: "foo".try_into().unwrap(),
            version: "1.0".try_into().unwrap(),
            format: ProjectFormat::Wheel,
            req_python: None,
            distribution: Distribution::new(
                Url::parse("https://example.com/foo-1.0-py3-none-any.whl").unwrap(),
                Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
            ),
            requirements: vec![],
            build_requirements: vec![],
        });
        Candidate::new(
            project,
            Default::default(),
            SystemInfo {
                python_version: "3.10.0".try_into().unwrap(),
                platform: PlatformTag::X86_64Linux,
            },
        )
    }

    #[test]
    fn test_id_stable_under_dependency_order() {
        let t1 = Target::new(candidate(), vec!["b".into(), "a".into()], vec![]).unwrap();
        let t2 = Target::new(candidate(), vec!["a".into(), "b".into()], vec![]).unwrap();
        assert_eq!(t1.id(), t2.id());
    }

    #[test]
    fn test_id_changes_with_dependencies() {
        let t1 = Target::new(candidate(), vec!["a".into()], vec![]).unwrap();
        let t2 = Target::new(candidate(), vec!["a".into(), "b".into()], vec![]).unwrap();
        assert_ne!(t1.id(), t2.id());
    }

    #[test]
    fn test_id_changes_with_content_hash() {
        let same_name_version = Candidate::new(
            Rc::new(Project {
                name: "foo".try_into().unwrap(),
                version: "1.0".try_into().unwrap(),
                format: ProjectFormat::Wheel,
                req_python: None,
                distribution: Distribution::new(
                    Url::parse("https://example.com/foo-1.0-py3-none-any.whl").unwrap(),
                    Some(ArtifactHash::from_hex("sha256", "cd").unwrap()),
                ),
                requirements: vec![],
                build_requirements: vec![],
            }),
            Default::default(),
            SystemInfo {
                python_version: "3.10.0".try_into().unwrap(),
                platform: PlatformTag::X86_64Linux,
            },
        );

        let t1 = Target::new(candidate(), vec![], vec![]).unwrap();
        let t2 = Target::new(same_name_version, vec![], vec![]).unwrap();
        assert_ne!(t1.id(), t2.id());
    }

    #[test]
    fn test_json_round_trip_preserves_id_inputs() {
        let t = Target::new(candidate(), vec!["a".into()], vec!["b".into()]).unwrap();
        let json = t.as_json();
        let text = serde_json::to_string(&json).unwrap();
        let back: TargetJson = serde_json::from_str(&text).unwrap();
        assert_eq!(back.dependencies, json.dependencies);
        assert_eq!(back.build_dependencies, json.build_dependencies);
    }
}
