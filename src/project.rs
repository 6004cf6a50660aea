//! The canonical record a Project Parser produces from one Distribution's bytes.

use crate::prelude::*;

use crate::distribution::Distribution;

/// Which kind of artifact a Project was parsed from. Affects nothing about dependency
/// resolution directly, but the Environment Closure and the downstream exporter both
/// need it to decide how (or whether) to build the thing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectFormat {
    Wheel,
    Pyproject,
    Setuptools,
    Metadata,
    Nix,
}

/// An immutable canonical record produced by parsing one Distribution. Two Projects with
/// equal `(name, version)` are expected -- by the Project Provider's dedup rule -- to be
/// the same Project; it never loads two different ones for the same identity in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: PackageName,
    pub version: Version,
    pub format: ProjectFormat,
    pub req_python: Option<Specifiers>,
    pub distribution: Distribution,
    pub requirements: Vec<PackageRequirement>,
    pub build_requirements: Vec<PackageRequirement>,
}

impl Project {
    /// `name` canonicalized, every requirement's `name` canonicalized, a `0.0.0`
    /// version-string artifact coerced to `None` so a caller-supplied hint can override
    /// it, and both requirement lists sorted for stable serialization.
    pub fn canonicalize(mut self) -> Result<Project> {
        static ZERO_VERSION: Lazy<Version> = Lazy::new(|| "0.0.0".try_into().unwrap());

        self.requirements.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        self.build_requirements
            .sort_by(|a, b| a.to_string().cmp(&b.to_string()));

        if self.version == *ZERO_VERSION {
            bail!(
                "{} parsed with a placeholder 0.0.0 version; a caller-supplied hint is required",
                self.name.as_given()
            );
        }

        Ok(self)
    }

    pub fn cache_key(&self) -> Result<String> {
        self.distribution.cache_key()
    }
}

impl Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}=={}", self.name.as_given(), self.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample(name: &str, version: &str) -> Project {
        Project {
            name: name.try_into().unwrap(),
            version: version.try_into().unwrap(),
            format: ProjectFormat::Wheel,
            req_python: None,
            distribution: Distribution::new(
                Url::parse("https://example.com/foo-1.0-py3-none-any.whl").unwrap(),
                Some(ArtifactHash::from_hex("sha256", "ab").unwrap()),
            ),
            requirements: vec!["Bar".try_into().unwrap(), "attrs>=19".try_into().unwrap()],
            build_requirements: vec![],
        }
    }

    #[test]
    fn test_requirements_sorted_on_canonicalize() {
        let p = sample("Foo", "1.0").canonicalize().unwrap();
        assert_eq!(p.requirements[0].name.as_given(), "attrs");
        assert_eq!(p.requirements[1].name.as_given(), "Bar");
    }

    #[test]
    fn test_placeholder_version_rejected() {
        let p = sample("foo", "0.0.0");
        assert!(p.canonicalize().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let p = sample("foo", "1.0").canonicalize().unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let back: Project = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
