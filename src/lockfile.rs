//! Lockfile / Export Interface: the serialized view of one or more closed [`Environment`]s.
//!
//! A lockfile is a flat Target table keyed by content-addressed id -- so two platforms
//! that happen to select an identical Target share one entry -- plus one record per
//! platform tag naming its SystemInfo and which ids it needs. Turning this into a
//! build-system expression is the downstream exporter's job; this module stops at the
//! typed, serializable view it consumes.

use crate::closure::Environment;
use crate::prelude::*;
use crate::system::PlatformTag;
use crate::target::{Target, TargetJson};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub system: SystemInfo,
    pub target_ids: Vec<String>,
    pub runtime_target_ids: Vec<String>,
}

/// The on-disk shape: `environments` keyed by platform tag's string form, since JSON
/// object keys are strings and `PlatformTag` already round-trips through one losslessly
/// (`Display`/`TryFrom<&str>`, see system.rs).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockfileJson {
    pub targets: HashMap<String, TargetJson>,
    pub environments: HashMap<String, EnvironmentRecord>,
}

/// The live, in-memory accumulation of one resolver run -- one [`Environment`] added per
/// requested platform -- before it's serialized out.
#[derive(Debug, Default)]
pub struct Lockfile {
    pub targets: HashMap<String, Target>,
    pub environments: HashMap<PlatformTag, EnvironmentRecord>,
}

impl Lockfile {
    pub fn new() -> Lockfile {
        Lockfile::default()
    }

    /// Fold a closed Environment in. A Target's id already covers everything that makes
    /// it distinct, so a later environment re-adding the same id is a harmless overwrite
    /// with byte-identical content, not a conflict.
    pub fn add_environment(&mut self, env: Environment) {
        let mut target_ids: Vec<String> = env.targets.keys().cloned().collect();
        target_ids.sort();
        let mut runtime_target_ids: Vec<String> = env.runtime_target_ids.iter().cloned().collect();
        runtime_target_ids.sort();

        self.environments.insert(
            env.system.platform,
            EnvironmentRecord {
                system: env.system.clone(),
                target_ids,
                runtime_target_ids,
            },
        );
        self.targets.extend(env.targets);
    }

    pub fn as_json(&self) -> LockfileJson {
        LockfileJson {
            targets: self.targets.iter().map(|(id, t)| (id.clone(), t.as_json())).collect(),
            environments: self.environments.iter().map(|(tag, record)| (tag.to_string(), record.clone())).collect(),
        }
    }

    pub fn write(&self, writer: impl Write) -> Result<()> {
        Ok(serde_json::to_writer_pretty(writer, &self.as_json())?)
    }

    pub fn read(reader: impl Read) -> Result<LockfileJson> {
        Ok(serde_json::from_reader(reader).context("malformed lockfile")?)
    }

    /// The preferences set for one platform out of a previously-read lockfile: every
    /// `(name, version)` it had pinned for that platform's runtime closure. Fed into
    /// `resolver::Constraints::preferences` on a relock so an unrelated change elsewhere
    /// in the requirement graph doesn't also bump packages that didn't need to move.
    pub fn preferences_for(json: &LockfileJson, platform: &PlatformTag) -> HashMap<PackageName, Version> {
        let mut preferences = HashMap::new();
        let Some(record) = json.environments.get(&platform.to_string()) else {
            return preferences;
        };
        for id in &record.target_ids {
            if let Some(target) = json.targets.get(id) {
                preferences.insert(target.candidate.project.name.clone(), target.candidate.project.version.clone());
            }
        }
        preferences
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::candidate::Candidate;
    use crate::distribution::Distribution;
    use crate::project::{Project, ProjectFormat};

    fn system(platform: PlatformTag) -> SystemInfo {
        SystemInfo {
            python_version: "3.10.0".try_into().unwrap(),
            platform,
        }
    }

    fn target(name: &str, version: &str, system: SystemInfo) -> Target {
        let project = Rc::new(Project {
            name: name.try_into().unwrap(),
            version: version.try_into().unwrap(),
            format: ProjectFormat::Wheel,
            req_python: None,
            distribution: Distribution::new(
                Url::parse(&format!("https://example.com/{name}-{version}-py3-none-any.whl")).unwrap(),
                Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
            ),
            requirements: vec![],
            build_requirements: vec![],
        });
        let candidate = Candidate::new(project, Default::default(), system);
        Target::new(candidate, vec![], vec![]).unwrap()
    }

    fn environment(platform: PlatformTag) -> Environment {
        let system = system(platform);
        let t = target("demo", "1.0.0", system.clone());
        let mut targets = HashMap::new();
        let mut runtime_target_ids = HashSet::new();
        runtime_target_ids.insert(t.id().to_owned());
        targets.insert(t.id().to_owned(), t);
        Environment {
            system,
            targets,
            runtime_target_ids,
        }
    }

    #[test]
    fn test_round_trip_preserves_environment_and_target() {
        let mut lockfile = Lockfile::new();
        lockfile.add_environment(environment(PlatformTag::X86_64Linux));

        let mut bytes = Vec::new();
        lockfile.write(&mut bytes).unwrap();
        let json = Lockfile::read(bytes.as_slice()).unwrap();

        assert_eq!(json.targets.len(), 1);
        let record = &json.environments[&PlatformTag::X86_64Linux.to_string()];
        assert_eq!(record.target_ids.len(), 1);
        assert_eq!(record.runtime_target_ids, record.target_ids);
    }

    #[test]
    fn test_two_platforms_share_table_but_have_separate_records() {
        let mut lockfile = Lockfile::new();
        lockfile.add_environment(environment(PlatformTag::X86_64Linux));
        lockfile.add_environment(environment(PlatformTag::Aarch64Darwin));

        assert_eq!(lockfile.environments.len(), 2);
        // both platforms locked the same demo==1.0.0, but under a content hash tied to
        // that platform's SystemInfo, so they don't collapse to one target entry.
        assert_eq!(lockfile.targets.len(), 2);
    }

    #[test]
    fn test_preferences_for_extracts_pinned_versions() {
        let mut lockfile = Lockfile::new();
        lockfile.add_environment(environment(PlatformTag::X86_64Linux));
        let json = lockfile.as_json();

        let preferences = Lockfile::preferences_for(&json, &PlatformTag::X86_64Linux);
        let name: PackageName = "demo".try_into().unwrap();
        assert_eq!(preferences[&name], "1.0.0".try_into().unwrap());

        let empty = Lockfile::preferences_for(&json, &PlatformTag::Aarch64Darwin);
        assert!(empty.is_empty());
    }
}
