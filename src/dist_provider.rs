//! Distribution Provider: turns a package name (plus an optional direct URL) into a
//! version-descending list of Distributions, each one resolved to a content hash unless
//! it's a local directory.
//!
//! Several variants compose: an index-backed crawler, a flat local directory of
//! pre-built packages, a combinator that queries several providers together, and a
//! cache that persists one provider's results to disk so a repeat resolve of an
//! unchanged project skips the network entirely.

use crate::prelude::*;
use crate::simple_api;

use indexmap::IndexMap;
use std::fs;
use std::path::PathBuf;

/// Implemented by every provider variant. Callers go through [`find_distributions`],
/// not this trait directly -- that's where the URL short-circuit lives, uniformly
/// across every variant.
pub trait DistributionProvider {
    fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>>;
}

/// A requirement that names a direct URL bypasses every provider entirely: whatever it
/// points at *is* the distribution, full stop. (Nothing in this crate's requirement
/// grammar emits `direct_url` today -- `@ url` requirement syntax isn't accepted by the
/// parser -- but the dispatch point exists so that restriction can be lifted later
/// without touching any provider.)
pub fn find_distributions<P: DistributionProvider + ?Sized>(
    provider: &P,
    name: &PackageName,
    direct_url: Option<&Url>,
) -> Result<Vec<Distribution>> {
    if let Some(url) = direct_url {
        return Ok(vec![Distribution::new(url.clone(), None)]);
    }
    provider.find_distributions_for_name(name)
}

fn compute_hash(http: &Http, url: &Url) -> Result<ArtifactHash> {
    let mut body = http.get_hashed(url, None, CacheMode::Default)?;
    let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    Ok(ArtifactHash {
        mode: "sha256".to_owned(),
        raw_data: ctx.finish().as_ref().to_vec(),
    })
}

/// Wraps one index URL's Simple API. Within each version, prefers a wheel over an
/// sdist, and (among artifacts of the preferred kind) prefers one that already carries
/// a sha256 hash.
pub struct IndexProvider {
    pub http: Http,
    pub index_url: Url,
}

impl DistributionProvider for IndexProvider {
    fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
        context!("querying {} for {}", self.index_url, name.as_given());
        let page = simple_api::fetch_project_page(&self.http, &self.index_url, name, CacheMode::Default)?;

        let mut by_version: IndexMap<Version, Vec<simple_api::ArtifactInfo>> = IndexMap::new();
        for artifact in page.artifacts {
            if artifact.name.distribution().normalized() != name.normalized() {
                continue;
            }
            if artifact.yanked.is_some() {
                continue;
            }
            by_version.entry(artifact.name.version().clone()).or_default().push(artifact);
        }

        let mut versions: Vec<Version> = by_version.keys().cloned().collect();
        versions.sort_unstable_by(|a, b| b.cmp(a));

        let mut out = Vec::with_capacity(versions.len());
        for version in versions {
            let mut candidates = by_version.swap_remove(&version).unwrap();
            candidates.sort_by_key(|ai| (!matches!(ai.name, ArtifactName::Wheel(_)), ai.hash.is_none()));
            let best = candidates.into_iter().next().unwrap();
            out.push(Distribution::new(best.url, best.hash));
        }
        Ok(out)
    }
}

/// Scans a flat directory for `{name}-{version}/` subdirectories, used to inject
/// pre-built local packages into a resolve without going through an index at all.
pub struct DirectoryProvider {
    pub root: PathBuf,
}

impl DistributionProvider for DirectoryProvider {
    fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
        context!("scanning {} for {}", self.root.display(), name.as_given());
        let mut out: Vec<(Version, Distribution)> = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dirname = entry.file_name();
            let dirname = dirname.to_string_lossy();
            let (dir_name, version_str) = match dirname.rsplit_once('-') {
                Some(split) => split,
                None => continue,
            };
            let dir_name: PackageName = match dir_name.try_into() {
                Ok(n) => n,
                Err(_) => continue,
            };
            if dir_name.normalized() != name.normalized() {
                continue;
            }
            let version: Version = match version_str.try_into() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let url = Url::from_directory_path(entry.path())
                .map_err(|_| anyhow!("not an absolute path: {}", entry.path().display()))?;
            out.push((version, Distribution::new(url, None)));
        }
        out.sort_unstable_by(|(v1, _), (v2, _)| v2.cmp(v1));
        Ok(out.into_iter().map(|(_, d)| d).collect())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CombineMode {
    /// Stop at the first provider that returns a non-empty list.
    FirstHit,
    /// Concatenate every provider's results.
    Union,
}

pub struct CombinedProvider {
    pub providers: Vec<Box<dyn DistributionProvider>>,
    pub mode: CombineMode,
}

impl DistributionProvider for CombinedProvider {
    fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
        match self.mode {
            CombineMode::FirstHit => {
                for provider in &self.providers {
                    let found = provider.find_distributions_for_name(name)?;
                    if !found.is_empty() {
                        return Ok(found);
                    }
                }
                Ok(Vec::new())
            }
            CombineMode::Union => {
                let mut out = Vec::new();
                for provider in &self.providers {
                    out.extend(provider.find_distributions_for_name(name)?);
                }
                Ok(out)
            }
        }
    }
}

/// Persists one inner provider's per-name result list to `{cache_dir}/{name}.json`, and
/// resolves a content hash (§4.1) for every non-local URL before writing it out --
/// downstream consumers can assume every cached Distribution is already hash-resolved.
///
/// A cached entry that contains any local-directory distribution is never trusted on
/// its own: local directories mutate in place, so the inner provider is re-queried
/// every time one shows up in the cached set.
pub struct CachedProvider<P> {
    pub inner: P,
    pub http: Http,
    pub cache_dir: PathBuf,
}

impl<P: DistributionProvider> CachedProvider<P> {
    fn cache_path(&self, name: &PackageName) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name.normalized()))
    }

    fn load_cached(&self, name: &PackageName) -> Option<Vec<Distribution>> {
        let path = self.cache_path(name);
        let blob = fs::read(path).ok()?;
        serde_json::from_slice(&blob).ok()
    }

    fn store(&self, name: &PackageName, distributions: &[Distribution]) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let blob = serde_json::to_vec_pretty(distributions)?;
        fs::write(self.cache_path(name), blob)?;
        Ok(())
    }
}

impl<P: DistributionProvider> DistributionProvider for CachedProvider<P> {
    fn find_distributions_for_name(&self, name: &PackageName) -> Result<Vec<Distribution>> {
        if let Some(cached) = self.load_cached(name) {
            if !cached.iter().any(Distribution::is_local) {
                return Ok(cached);
            }
        }

        let mut found = self.inner.find_distributions_for_name(name)?;
        for distribution in found.iter_mut() {
            if !distribution.is_local() && !distribution.is_resolved() {
                let hash = compute_hash(&self.http, &distribution.url)?;
                distribution.hash = Some(hash);
            }
        }
        self.store(name, &found)?;
        Ok(found)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pkg(name: &str) -> PackageName {
        name.try_into().unwrap()
    }

    #[test]
    fn test_directory_provider_groups_and_sorts() {
        let tempdir = tempfile::tempdir().unwrap();
        fs::create_dir(tempdir.path().join("demo-1.0.0")).unwrap();
        fs::create_dir(tempdir.path().join("demo-2.0.0")).unwrap();
        fs::create_dir(tempdir.path().join("other-1.0.0")).unwrap();

        let provider = DirectoryProvider { root: tempdir.path().to_owned() };
        let found = provider.find_distributions_for_name(&pkg("demo")).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].url.as_str().ends_with("demo-2.0.0/"));
        assert!(found[1].url.as_str().ends_with("demo-1.0.0/"));
    }

    #[test]
    fn test_directory_provider_missing_dir_returns_empty() {
        let provider = DirectoryProvider { root: PathBuf::from("/does/not/exist") };
        assert!(provider.find_distributions_for_name(&pkg("demo")).unwrap().is_empty());
    }

    struct FakeProvider(Vec<Distribution>);
    impl DistributionProvider for FakeProvider {
        fn find_distributions_for_name(&self, _name: &PackageName) -> Result<Vec<Distribution>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_combined_first_hit_skips_empty_providers() {
        let want = Distribution::new(Url::parse("https://example.com/demo-1.0.0.tar.gz").unwrap(), None);
        let combined = CombinedProvider {
            providers: vec![
                Box::new(FakeProvider(Vec::new())),
                Box::new(FakeProvider(vec![want.clone()])),
            ],
            mode: CombineMode::FirstHit,
        };
        assert_eq!(combined.find_distributions_for_name(&pkg("demo")).unwrap(), vec![want]);
    }

    #[test]
    fn test_combined_union_concatenates() {
        let a = Distribution::new(Url::parse("https://a.example.com/demo-1.0.0.tar.gz").unwrap(), None);
        let b = Distribution::new(Url::parse("https://b.example.com/demo-1.0.0.tar.gz").unwrap(), None);
        let combined = CombinedProvider {
            providers: vec![Box::new(FakeProvider(vec![a.clone()])), Box::new(FakeProvider(vec![b.clone()]))],
            mode: CombineMode::Union,
        };
        assert_eq!(combined.find_distributions_for_name(&pkg("demo")).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_direct_url_short_circuits_every_provider() {
        let provider = FakeProvider(Vec::new());
        let url = Url::parse("https://example.com/demo-1.0.0.tar.gz").unwrap();
        let found = find_distributions(&provider, &pkg("demo"), Some(&url)).unwrap();
        assert_eq!(found, vec![Distribution::new(url, None)]);
    }

    #[test]
    fn test_cached_provider_bypasses_cache_for_local_entries() {
        let tempdir = tempfile::tempdir().unwrap();
        let local_url = Url::from_directory_path(tempdir.path()).unwrap();
        let cache_dir = tempdir.path().join("cache");
        fs::create_dir(&cache_dir).unwrap();
        let local_dist = Distribution::new(local_url, None);
        fs::write(
            cache_dir.join("demo.json"),
            serde_json::to_vec(&vec![local_dist]).unwrap(),
        )
        .unwrap();

        let caches = tempfile::tempdir().unwrap();
        let http = Http::new(&caches.path().join("http"), &caches.path().join("hash")).unwrap();
        let fresh = Distribution::new(Url::parse("https://example.com/demo-1.0.0.tar.gz").unwrap(), None);
        let cached = CachedProvider {
            inner: FakeProvider(vec![fresh.clone()]),
            http,
            cache_dir,
        };
        // local entry in the cache means we re-query the inner provider rather than
        // trusting the stale cache -- note the inner provider here can't resolve a
        // real hash for `fresh` since example.com isn't reachable in tests, so we just
        // check that it got past the cache-trust check and called through.
        let err = cached.find_distributions_for_name(&pkg("demo"));
        assert!(err.is_err() || err.unwrap()[0].url == fresh.url);
    }
}
