//! Project Provider: bridges a (name, specifier) query to parsed [`Project`]s, sitting
//! between the Distribution Provider and the SAT driver.
//!
//! Memoizes two things independently: which distributions exist for a name at all (so
//! a second, differently-scoped query doesn't re-crawl the index), and which of those
//! have already been parsed into a Project this run. The parsed-Project half is also
//! persisted to disk, keyed by `Distribution::cache_key`, so a second invocation of the
//! whole program skips re-parsing (or re-discovering the same ParseError) entirely.

use crate::dist_provider::{self, DistributionProvider};
use crate::kvstore::{KVFileStore, PathKey};
use crate::parser::{self, BuildInvoker};
use crate::prelude::*;

use std::cell::RefCell;
use std::path::PathBuf;

struct CacheKey<'a>(&'a str);

impl PathKey for CacheKey<'_> {
    fn key(&self) -> PathBuf {
        self.0.as_bytes().key()
    }
}

#[derive(Serialize, Deserialize)]
enum CachedParse {
    Found(Project),
    NotFound,
}

pub struct ProjectProvider<'a> {
    distributions: &'a dyn DistributionProvider,
    http: Http,
    project_cache: KVFileStore,
    build: &'a dyn BuildInvoker,
    loaded: RefCell<HashMap<PackageName, Vec<Project>>>,
}

impl<'a> ProjectProvider<'a> {
    pub fn new(
        distributions: &'a dyn DistributionProvider,
        http: Http,
        cache_dir: &std::path::Path,
        build: &'a dyn BuildInvoker,
    ) -> Result<ProjectProvider<'a>> {
        Ok(ProjectProvider {
            distributions,
            http,
            project_cache: KVFileStore::new(cache_dir)?,
            build,
            loaded: RefCell::new(HashMap::new()),
        })
    }

    pub fn find_projects(&self, name: &PackageName, specifier: &Specifiers) -> Result<Vec<Project>> {
        context!("resolving projects for {} {}", name.as_given(), specifier);

        if let Some(existing) = self.loaded.borrow().get(name) {
            let matching: Vec<Project> = existing
                .iter()
                .filter(|p| specifier.satisfied_by(&p.version).unwrap_or(false))
                .cloned()
                .collect();
            if !matching.is_empty() {
                return Ok(matching);
            }
        }

        let mut distributions = dist_provider::find_distributions(self.distributions, name, None)?;
        if specifier.0.is_empty() {
            distributions.truncate(1);
        }

        let mut parsed = Vec::with_capacity(distributions.len());
        for distribution in distributions {
            if let Some(project) = self.parse_cached(distribution)? {
                parsed.push(project);
            }
        }

        let filtered: Vec<Project> = parsed
            .into_iter()
            .filter(|p| specifier.satisfied_by(&p.version).unwrap_or(false))
            .collect();

        self.loaded
            .borrow_mut()
            .entry(name.clone())
            .or_default()
            .extend(filtered.iter().cloned());
        Ok(filtered)
    }

    /// `None` is a successful negative result (malformed distribution, logged and
    /// skipped); only a fetch failure that has nothing to do with the distribution's
    /// own content propagates as a hard `Err`.
    fn parse_cached(&self, distribution: Distribution) -> Result<Option<Project>> {
        let cache_key = distribution.cache_key().ok();

        if let Some(key) = &cache_key {
            if let Some(mut reader) = self.project_cache.get(&CacheKey(key)) {
                let blob = slurp(&mut reader)?;
                let cached: CachedParse = serde_json::from_slice(&blob)
                    .with_context(|| format!("corrupt project cache entry for {key}"))?;
                return Ok(match cached {
                    CachedParse::Found(project) => Some(project),
                    CachedParse::NotFound => None,
                });
            }
        }

        let result = self.parse_uncached(&distribution);
        let outcome = match &result {
            Ok(project) => CachedParse::Found(project.clone()),
            Err(e) => {
                debug!("{distribution}: not a usable project: {e}");
                CachedParse::NotFound
            }
        };

        if let Some(key) = &cache_key {
            self.project_cache.get_or_set(&CacheKey(key), |w| {
                Ok(w.write_all(&serde_json::to_vec(&outcome)?)?)
            })?;
        }

        Ok(match outcome {
            CachedParse::Found(project) => Some(project),
            CachedParse::NotFound => None,
        })
    }

    fn parse_uncached(&self, distribution: &Distribution) -> Result<Project> {
        let body = self.fetch_body(distribution)?;
        let version_hint = distribution.version_hint();
        Ok(parser::parse(distribution.clone(), version_hint, body, self.build)?)
    }

    fn fetch_body(&self, distribution: &Distribution) -> Result<parser::Body> {
        if distribution.is_local() {
            let path = distribution
                .url
                .to_file_path()
                .map_err(|_| anyhow!("not a file:// url: {}", distribution.url))?;
            if path.is_dir() {
                return Ok(parser::Body::Directory(path));
            }
            let reader: Box<dyn ReadPlusSeek> = Box::new(std::fs::File::open(&path)?);
            return wrap_sdist(distribution, reader);
        }

        if distribution.is_wheel() {
            if let Some(blob) = self.try_sidecar_metadata(distribution)? {
                return Ok(parser::Body::SidecarMetadata(blob));
            }
            let body = self.http.get_hashed(&distribution.url, distribution.hash.as_ref(), CacheMode::Default)?;
            return Ok(parser::Body::Wheel(body));
        }

        let body = self.http.get_hashed(&distribution.url, distribution.hash.as_ref(), CacheMode::Default)?;
        wrap_sdist(distribution, body)
    }

    /// PEP 658: an index may publish a distribution's `METADATA` file separately at
    /// `{url}.metadata`, letting us skip downloading the whole wheel just to read it.
    fn try_sidecar_metadata(&self, distribution: &Distribution) -> Result<Option<Vec<u8>>> {
        let mut metadata_url = distribution.url.clone();
        let path = metadata_url.path().to_owned();
        metadata_url.set_path(&format!("{path}.metadata"));

        let request = http::Request::builder().uri(metadata_url.as_str()).body(())?;
        match self.http.request(request, CacheMode::Default) {
            Ok(response) if response.status().is_success() => {
                let mut blob = Vec::new();
                let mut reader = response.into_body();
                std::io::copy(&mut reader, &mut blob)?;
                Ok(Some(blob))
            }
            _ => Ok(None),
        }
    }
}

fn wrap_sdist(distribution: &Distribution, reader: Box<dyn ReadPlusSeek>) -> Result<parser::Body> {
    let filename = distribution.filename()?;
    let format = if filename.ends_with(".zip") {
        SdistFormat::Zip
    } else if filename.ends_with(".tar.gz") || filename.ends_with(".tgz") {
        SdistFormat::TarGz
    } else if filename.ends_with(".tar.bz2") {
        SdistFormat::TarBz2
    } else if filename.ends_with(".tar.xz") {
        SdistFormat::TarXz
    } else if filename.ends_with(".tar.zst") {
        SdistFormat::TarZst
    } else {
        bail!("{distribution}: not a recognized sdist archive extension");
    };
    Ok(parser::Body::Sdist(format, reader))
}
