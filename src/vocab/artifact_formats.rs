//! Opening artifacts (sdists and wheels) far enough to read their metadata.
//!
//! This core never unpacks a wheel onto disk or generates console-script trampolines --
//! that's an installer's job, not a resolver's. What it does need is: given a wheel's
//! bytes, find the `.dist-info/METADATA` member and parse it; given an sdist's bytes,
//! hand back a generic archive reader so the project parser can pull out `PKG-INFO`,
//! `pyproject.toml`, or invoke a build backend on the extracted tree.

use crate::prelude::*;
use std::io::{Read, Seek};
use zip::ZipArchive;

pub trait ReadPlusSeek: Read + Seek {}
impl<T: Read + Seek> ReadPlusSeek for T {}

pub struct Sdist {
    name: SdistName,
    body: Box<dyn ReadPlusSeek>,
}

pub struct Wheel {
    name: WheelName,
    z: ZipArchive<Box<dyn ReadPlusSeek>>,
}

pub trait Artifact: Sized {
    type Name: Clone;

    fn new(name: Self::Name, f: Box<dyn ReadPlusSeek>) -> Result<Self>;
    fn name(&self) -> &Self::Name;
}

impl Artifact for Sdist {
    type Name = SdistName;

    fn new(name: Self::Name, body: Box<dyn ReadPlusSeek>) -> Result<Self> {
        Ok(Sdist { name, body })
    }

    fn name(&self) -> &Self::Name {
        &self.name
    }
}

impl Sdist {
    /// Give the caller a raw handle on the archive bytes; which unpack routine applies
    /// depends on `self.name.format` and lives in the project parser, which already
    /// knows how to walk both zip and tar archives for `pyproject.toml`/`setup.py`.
    pub fn format(&self) -> SdistFormat {
        self.name.format
    }

    pub fn body_mut(&mut self) -> &mut dyn ReadPlusSeek {
        self.body.as_mut()
    }
}

impl Artifact for Wheel {
    type Name = WheelName;

    fn new(name: Self::Name, f: Box<dyn ReadPlusSeek>) -> Result<Self> {
        Ok(Wheel {
            name,
            z: ZipArchive::new(f)?,
        })
    }

    fn name(&self) -> &Self::Name {
        &self.name
    }
}

fn slurp_from_zip<T: Read + Seek>(z: &mut ZipArchive<T>, name: &str) -> Result<Vec<u8>> {
    context!("extracting {name}");
    slurp(&mut z.by_name(name)?)
}

impl Wheel {
    /// Locate the wheel's single `.dist-info` directory among its top-level entries.
    fn find_dist_info(&mut self) -> Result<String> {
        static SPECIAL_WHEEL_DIR_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(.*)-(.*)\.dist-info$").unwrap());

        let top_levels: Vec<String> = self
            .z
            .file_names()
            .map(|n| {
                n.split_once(['/', '\\'])
                    .map(|(base, _rest)| base)
                    .unwrap_or(n)
                    .to_owned()
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let mut candidates: Vec<&String> = top_levels
            .iter()
            .filter(|n| n.ends_with(".dist-info"))
            .collect();

        let candidate = candidates
            .pop()
            .ok_or_else(|| anyhow!(".dist-info/ missing from {}", self.name))?;
        if !candidates.is_empty() {
            bail!("found multiple .dist-info/ directories in {}", self.name);
        }

        context!("parsing wheel directory {candidate}");
        let captures = SPECIAL_WHEEL_DIR_RE
            .captures(candidate)
            .ok_or_else(|| anyhow!("invalid .dist-info name: {candidate:?}"))?;
        let got_name: PackageName = captures.get(1).unwrap().as_str().try_into()?;
        if &got_name != &self.name.distribution {
            bail!(
                "wrong name in {candidate}: expected {}",
                self.name.distribution.as_given()
            );
        }
        let got_version: Version = captures.get(2).unwrap().as_str().try_into()?;
        if got_version != self.name.version {
            bail!("wrong version in {candidate}: expected {}", self.name.version);
        }
        Ok(candidate.clone())
    }

    /// Extract and parse `METADATA`, returning the raw bytes (for caching, see
    /// fetch::CachingFetcher) alongside the parsed form.
    pub fn metadata(&mut self) -> Result<(Vec<u8>, WheelCoreMetadata)> {
        context!("Reading metadata from {}", self.name);
        let dist_info = self.find_dist_info()?;
        let metadata_path = format!("{dist_info}/METADATA");
        let metadata_blob = slurp_from_zip(&mut self.z, &metadata_path)?;
        let metadata: WheelCoreMetadata = metadata_blob.as_slice().try_into()?;

        if metadata.name != self.name.distribution {
            bail!(
                "name mismatch between {dist_info}/METADATA and filename ({} != {})",
                metadata.name.as_given(),
                self.name.distribution.as_given()
            );
        }
        if metadata.version != self.name.version {
            bail!(
                "version mismatch between {dist_info}/METADATA and filename ({} != {})",
                metadata.version,
                self.name.version
            );
        }

        Ok((metadata_blob, metadata))
    }
}
