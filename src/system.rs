//! A target profile: which interpreter and which platform a resolve is computed for.
//!
//! One [`SystemInfo`] per entry in a manifest's `platforms` list; the resolver runs the
//! whole pipeline once per `SystemInfo`, and an [`crate::Environment`] is the result.

use crate::prelude::*;

/// Canonical platform tags this crate knows how to target. Matches the vocabulary a Nix
/// flake would use for `system`, not Python's own `platform_machine`/`sys_platform`
/// split -- the marker-environment mapping below bridges the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformTag {
    X86_64Linux,
    Aarch64Darwin,
    Powerpc64leLinux,
}

impl PlatformTag {
    fn os_name(&self) -> &'static str {
        match self {
            PlatformTag::X86_64Linux | PlatformTag::Powerpc64leLinux => "posix",
            PlatformTag::Aarch64Darwin => "posix",
        }
    }

    fn sys_platform(&self) -> &'static str {
        match self {
            PlatformTag::X86_64Linux | PlatformTag::Powerpc64leLinux => "linux",
            PlatformTag::Aarch64Darwin => "darwin",
        }
    }

    fn platform_system(&self) -> &'static str {
        match self {
            PlatformTag::X86_64Linux | PlatformTag::Powerpc64leLinux => "Linux",
            PlatformTag::Aarch64Darwin => "Darwin",
        }
    }

    fn platform_machine(&self) -> &'static str {
        match self {
            PlatformTag::X86_64Linux => "x86_64",
            PlatformTag::Aarch64Darwin => "arm64",
            PlatformTag::Powerpc64leLinux => "ppc64le",
        }
    }
}

impl Display for PlatformTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PlatformTag::X86_64Linux => "x86_64-linux",
            PlatformTag::Aarch64Darwin => "aarch64-darwin",
            PlatformTag::Powerpc64leLinux => "powerpc64le-linux",
        };
        write!(f, "{s}")
    }
}

impl TryFrom<&str> for PlatformTag {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(match value {
            "x86_64-linux" => PlatformTag::X86_64Linux,
            "aarch64-darwin" => PlatformTag::Aarch64Darwin,
            "powerpc64le-linux" => PlatformTag::Powerpc64leLinux,
            _ => bail!("unrecognized platform tag {:?}", value),
        })
    }
}

try_from_str_boilerplate!(PlatformTag);

/// A target profile: interpreter version plus platform. Cheap to clone; every Candidate
/// and every cache key that needs "which system is this for" carries one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemInfo {
    pub python_version: Version,
    pub platform: PlatformTag,
}

impl SystemInfo {
    /// The PEP 508 marker-evaluation environment for this system: every variable a
    /// `Requires-Dist` marker might reference, except `extra`, which is bound
    /// per-requirement by the Candidate model (see `crate::candidate`).
    pub fn python_environment(&self) -> HashMap<String, String> {
        let release = &self.python_version.0.release;
        let major = release.first().copied().unwrap_or(0);
        let minor = release.get(1).copied().unwrap_or(0);

        let mut env = HashMap::new();
        env.insert(
            "python_version".to_owned(),
            format!("{major}.{minor}"),
        );
        env.insert(
            "python_full_version".to_owned(),
            self.python_version.to_string(),
        );
        env.insert("implementation_name".to_owned(), "cpython".to_owned());
        env.insert(
            "implementation_version".to_owned(),
            self.python_version.to_string(),
        );
        env.insert("platform_python_implementation".to_owned(), "CPython".to_owned());
        env.insert("os_name".to_owned(), self.platform.os_name().to_owned());
        env.insert("sys_platform".to_owned(), self.platform.sys_platform().to_owned());
        env.insert(
            "platform_system".to_owned(),
            self.platform.platform_system().to_owned(),
        );
        env.insert(
            "platform_machine".to_owned(),
            self.platform.platform_machine().to_owned(),
        );
        env.insert("platform_release".to_owned(), "".to_owned());
        env.insert("platform_version".to_owned(), "".to_owned());
        env
    }
}

impl Display for SystemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}", self.python_version, self.platform)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_python_environment_fields() {
        let system = SystemInfo {
            python_version: "3.10.8".try_into().unwrap(),
            platform: PlatformTag::X86_64Linux,
        };
        let env = system.python_environment();
        assert_eq!(env.get("python_version").unwrap(), "3.10");
        assert_eq!(env.get("sys_platform").unwrap(), "linux");
        assert_eq!(env.get("platform_machine").unwrap(), "x86_64");
    }

    #[test]
    fn test_platform_tag_round_trip() {
        let tag: PlatformTag = "aarch64-darwin".try_into().unwrap();
        assert_eq!(tag.to_string(), "aarch64-darwin");
    }
}
