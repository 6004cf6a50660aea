use crate::prelude::*;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SdistFormat {
    Zip,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SdistName {
    pub distribution: PackageName,
    pub version: Version,
    pub format: SdistFormat,
}

impl TryFrom<&str> for SdistName {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        static SDIST_NAME_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^(.*)-([^-]*)\.(zip|tar\.gz|tar\.bz2|tar\.xz|tar\.zst|tgz)$").unwrap()
        });

        match SDIST_NAME_RE.captures(value) {
            None => bail!("invalid sdist name: {:?}", value),
            Some(captures) => {
                let distribution: PackageName = captures.get(1).unwrap().as_str().parse()?;
                let version: Version = captures.get(2).unwrap().as_str().parse()?;
                let format = match captures.get(3).unwrap().as_str() {
                    "zip" => SdistFormat::Zip,
                    "tar.gz" | "tgz" => SdistFormat::TarGz,
                    "tar.bz2" => SdistFormat::TarBz2,
                    "tar.xz" => SdistFormat::TarXz,
                    "tar.zst" => SdistFormat::TarZst,
                    _ => unreachable!(),
                };
                Ok(SdistName {
                    distribution,
                    version,
                    format,
                })
            }
        }
    }
}

try_from_str_boilerplate!(SdistName);

impl Display for SdistName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}.{}",
            self.distribution.as_given(),
            self.version,
            match self.format {
                SdistFormat::Zip => "zip",
                SdistFormat::TarGz => "tar.gz",
                SdistFormat::TarBz2 => "tar.bz2",
                SdistFormat::TarXz => "tar.xz",
                SdistFormat::TarZst => "tar.zst",
            }
        )
    }
}

// https://packaging.python.org/specifications/binary-distribution-format/#file-name-convention
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct WheelName {
    pub distribution: PackageName,
    pub version: Version,
    // According to the spec, the build tag "sorts as an empty tuple if
    // unspecified, else sort as a two-item tuple with the first item being
    // the initial digits as an 'int', and the second item being the remainder
    // of the tag as a 'str'". This is ill-defined, b/c what the heck do
    // you do if there aren't any initial digits? So instead we do:
    //
    //   <no build tag> => (None, "")
    //   1              => (Some(1), "")
    //   1stuff         => (Some(1), "stuff")
    //   stuff          => (None, "stuff")
    //
    // And it sorts like a tuple, where None sorts ahead of Some.
    pub build_number: Option<u32>,
    pub build_name: String,
    pub py_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub arch_tags: Vec<String>,
}

impl WheelName {
    pub fn all_tags(&self) -> HashSet<String> {
        let mut retval = HashSet::new();
        for py in &self.py_tags {
            for abi in &self.abi_tags {
                for arch in &self.arch_tags {
                    retval.insert(format!("{}-{}-{}", py, abi, arch));
                }
            }
        }
        retval
    }
}

fn generic_parse(
    value: &str,
    suffix: &str,
    tag_parts: u8,
) -> Result<(PackageName, Version, Option<u32>, String, Vec<Vec<String>>)> {
    static VALID_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.+!-]*$").unwrap());

    if !VALID_CHARS.is_match(value) {
        bail!("Invalid characters in {} name: {:?}", suffix, value);
    }
    let stem = value
        .strip_suffix(suffix)
        .ok_or_else(|| anyhow!("expected {:?} to end in .{}", value, suffix))?;

    let mut pieces: Vec<&str> = stem.split('-').collect();

    static BUILD_TAG_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^[0-9]*)(.*)$").unwrap());

    let build_number: Option<u32>;
    let build_name: String;
    if pieces.len() == 3 + tag_parts as usize {
        let build_tag = pieces.remove(2);
        if build_tag.is_empty() {
            bail!("found empty build tag: {:?}", value);
        }
        // unwrap safe because: the regex cannot fail
        let captures = BUILD_TAG_SPLIT.captures(build_tag).unwrap();
        build_number = captures.get(1).and_then(|m| m.as_str().parse().ok());
        // unwrap safe because: this group will always match something, even
        // if only the empty string
        build_name = captures.get(2).unwrap().as_str().into();
    } else {
        build_number = None;
        build_name = "".to_owned();
    }

    if pieces.len() != 2 + tag_parts as usize {
        bail!("can't parse wheel name {:?}", value);
    }

    let distribution: PackageName = pieces[0].try_into()?;
    let version: Version = pieces[1].try_into()?;
    let tag_sets: Vec<Vec<String>> = pieces[2..]
        .iter()
        .map(|compressed_tag| compressed_tag.split('.').map(|tag| tag.into()).collect())
        .collect();

    Ok((distribution, version, build_number, build_name, tag_sets))
}

fn format_build_tag(build_number: Option<u32>, build_name: &str) -> String {
    match (build_number, build_name) {
        (None, "") => String::from(""),
        (None, name) => format!("-{}", name),
        (Some(num), name) => format!("-{}{}", num, name),
    }
}

impl TryFrom<&str> for WheelName {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let (distribution, version, build_number, build_name, mut tag_sets) =
            generic_parse(value, ".whl", 3)?;

        tag_sets.reverse();

        Ok(WheelName {
            distribution,
            version,
            build_number,
            build_name,
            py_tags: tag_sets.pop().unwrap(),
            abi_tags: tag_sets.pop().unwrap(),
            arch_tags: tag_sets.pop().unwrap(),
        })
    }
}

try_from_str_boilerplate!(WheelName);

impl Display for WheelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{dist}-{ver}{build}-{py_tags}-{abi_tags}-{arch_tags}.whl",
            dist = self.distribution.as_given(),
            ver = self.version,
            build = format_build_tag(self.build_number, &self.build_name),
            py_tags = self.py_tags.join("."),
            abi_tags = self.abi_tags.join("."),
            arch_tags = self.arch_tags.join("."),
        )
    }
}

/// Either a source distribution or a built wheel -- the two artifact shapes the
/// resolver ever needs to fetch metadata from. There's no `PybiName` here: which
/// CPython build to target is an input to a resolve (`SystemInfo`), never an
/// output of one.
#[derive(Debug, Clone, PartialEq, Eq, SerializeDisplay)]
pub enum ArtifactName {
    Sdist(SdistName),
    Wheel(WheelName),
}

impl ArtifactName {
    pub fn distribution(&self) -> &PackageName {
        match self {
            ArtifactName::Sdist(inner) => &inner.distribution,
            ArtifactName::Wheel(inner) => &inner.distribution,
        }
    }

    pub fn version(&self) -> &Version {
        match self {
            ArtifactName::Sdist(inner) => &inner.version,
            ArtifactName::Wheel(inner) => &inner.version,
        }
    }
}

pub trait ArtifactNameUnwrap<T: Clone> {
    fn try_borrow(&self) -> Option<&T>;
}

macro_rules! impl_unwrap {
    ($enum:ident, $type:ty) => {
        impl ArtifactNameUnwrap<$type> for ArtifactName {
            fn try_borrow(&self) -> Option<&$type> {
                if let ArtifactName::$enum(inner) = self {
                    Some(inner)
                } else {
                    None
                }
            }
        }
    };
}

impl_unwrap!(Sdist, SdistName);
impl_unwrap!(Wheel, WheelName);

impl TryFrom<&str> for ArtifactName {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.ends_with(".whl") {
            Ok(ArtifactName::Wheel(value.try_into()?))
        } else {
            Ok(ArtifactName::Sdist(value.try_into()?))
        }
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactName::Sdist(inner) => write!(f, "{}", &inner),
            ArtifactName::Wheel(inner) => write!(f, "{}", &inner),
        }
    }
}
