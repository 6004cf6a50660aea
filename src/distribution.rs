//! Distributions: the thing a Distribution Provider hands the Project Parser.
//!
//! Only one variant exists today -- a URL plus an optional content hash -- but it's kept
//! as a tagged enum (`type` discriminator when serialized) so a directory-scheme or
//! VCS-scheme distribution could join the set later without breaking the on-disk cache
//! format.

use crate::prelude::*;

/// A URL Distribution is *unresolved* until it carries a content hash; the Distribution
/// Provider is responsible for resolving one (via `fetch::get_hashed`) before handing
/// the distribution on to the Project Provider, except for local directories, which
/// never get a hash at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "url")]
pub struct Distribution {
    pub url: Url,
    pub hash: Option<ArtifactHash>,
}

impl Distribution {
    pub fn new(url: Url, hash: Option<ArtifactHash>) -> Distribution {
        Distribution { url, hash }
    }

    /// Resolved iff we already know a content hash -- i.e. it's safe to treat two
    /// Distributions referring to the same bytes as interchangeable.
    pub fn is_resolved(&self) -> bool {
        self.hash.is_some()
    }

    pub fn is_local(&self) -> bool {
        self.url.scheme() == "file"
    }

    pub fn filename(&self) -> Result<&str> {
        self.url
            .path_segments()
            .and_then(|mut segs| segs.next_back())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("distribution URL has no filename: {}", self.url))
    }

    pub fn is_wheel(&self) -> bool {
        self.filename().map(|f| f.ends_with(".whl")).unwrap_or(false)
    }

    /// A guess at the version encoded in the filename, used as a hint when parsing
    /// metadata doesn't turn one up on its own (sdists from URLs that don't conform to
    /// `{name}-{version}{ext}` have no reliable alternative).
    pub fn version_hint(&self) -> Option<Version> {
        let filename = self.filename().ok()?;
        let stem = strip_archive_extension(filename)?;
        let (_, version_str) = stem.rsplit_once('-')?;
        let version: Version = version_str.try_into().ok()?;
        Some(version)
    }

    /// `"{filename}-{content_hash}"`, this distribution's identity once resolved. Used
    /// both as the Resource Fetcher's artifact-cache key and as the Project cache key.
    pub fn cache_key(&self) -> Result<String> {
        let hash = self
            .hash
            .as_ref()
            .ok_or_else(|| anyhow!("distribution {} has no content hash yet", self.url))?;
        Ok(format!("{}-{}", self.filename()?, hash.hex()))
    }
}

impl Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Known archive extensions, longest-first so `.tar.gz` doesn't fall through to a bare
/// `.gz` match. Stripping strictly against this set (rather than chained blind
/// `Path::file_stem` calls) rejects a pathological name like `foo-1.tar.gz.tar` instead
/// of silently mis-parsing it.
const ARCHIVE_EXTENSIONS: &[&str] =
    &[".tar.gz", ".tar.bz2", ".tar.xz", ".tar.zst", ".tgz", ".zip", ".whl"];

pub fn strip_archive_extension(filename: &str) -> Option<&str> {
    ARCHIVE_EXTENSIONS
        .iter()
        .find_map(|ext| filename.strip_suffix(ext))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unresolved_distribution() {
        let d = Distribution::new(Url::parse("https://example.com/foo-1.0.tar.gz").unwrap(), None);
        assert!(!d.is_resolved());
        assert!(d.cache_key().is_err());
    }

    #[test]
    fn test_cache_key() {
        let hash = ArtifactHash::from_hex("sha256", "ab").unwrap();
        let d = Distribution::new(
            Url::parse("https://example.com/foo-1.0.tar.gz").unwrap(),
            Some(hash),
        );
        assert_eq!(d.cache_key().unwrap(), "foo-1.0.tar.gz-ab");
    }

    #[test]
    fn test_version_hint() {
        let d = Distribution::new(
            Url::parse("https://example.com/foo-1.2.3.tar.gz").unwrap(),
            None,
        );
        assert_eq!(d.version_hint().unwrap(), "1.2.3".try_into().unwrap());
    }

    #[test]
    fn test_pathological_double_extension_not_mis_stripped() {
        assert_eq!(strip_archive_extension("foo-1.tar.gz.tar"), None);
    }

    #[test]
    fn test_local_distribution() {
        let d = Distribution::new(Url::parse("file:///home/me/myapp").unwrap(), None);
        assert!(d.is_local());
    }
}
